//! Named action templates from the config file's `actions` section
//! (spec §6): `initialize`, `shutdown`, `begin`, `end`, `need_host`,
//! `quick_shutdown`.

use serde::Deserialize;

/// Address-family constraint enforced at candidate creation (spec
/// §4.5). A mismatch is "action not applicable", not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeedHost {
    No,
    Any,
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl Default for NeedHost {
    fn default() -> Self {
        NeedHost::Any
    }
}

/// A named, parameterised begin/end action. `initialize` and
/// `shutdown` are one-shot variants fired at daemon start/stop with a
/// "sentinel-max" (never-expiring) deadline (spec §4.4).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionTemplate {
    pub name: String,
    #[serde(default)]
    pub initialize: Option<String>,
    #[serde(default)]
    pub shutdown: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub need_host: NeedHost,
    #[serde(default)]
    pub quick_shutdown: bool,
}
