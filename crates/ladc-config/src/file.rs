//! Raw YAML config file loading, including `include` glob resolution
//! (spec §6).

use std::path::Path;

use serde::Deserialize;

use ladc_common::LadcError;

use crate::action::ActionTemplate;
use crate::defaults::DefaultsRaw;
use crate::rule::RuleRaw;
use crate::source::SourceRaw;

/// Top-level shape of a single config file or fragment. `include` is a
/// list of glob patterns resolved relative to the including file's
/// directory (spec §6: "Includes are resolved via glob at parse time").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct FileRaw {
    pub include: Vec<String>,
    pub defaults: Option<DefaultsRaw>,
    pub actions: Vec<ActionTemplate>,
    pub sources: Vec<SourceRaw>,
    pub rules: Vec<RuleRaw>,
    pub local: bool,
}

/// The merged result of a root file and everything it (transitively)
/// includes.
#[derive(Debug, Default)]
pub struct RawConfig {
    pub defaults: Option<DefaultsRaw>,
    pub actions: Vec<ActionTemplate>,
    pub sources: Vec<SourceRaw>,
    pub rules: Vec<RuleRaw>,
    pub local: bool,
}

pub fn load_raw(path: &Path) -> Result<RawConfig, LadcError> {
    let mut merged = RawConfig::default();
    let mut seen = Vec::new();
    load_into(path, &mut merged, &mut seen)?;
    Ok(merged)
}

fn load_into(path: &Path, merged: &mut RawConfig, seen: &mut Vec<std::path::PathBuf>) -> Result<(), LadcError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| LadcError::config(format!("cannot read config file: {e}")).with_path(path))?;
    if seen.contains(&canonical) {
        return Err(LadcError::config("include cycle detected").with_path(path));
    }
    seen.push(canonical);

    let text = std::fs::read_to_string(path)
        .map_err(|e| LadcError::config(format!("cannot read config file: {e}")).with_path(path))?;
    let file: FileRaw =
        serde_yaml::from_str(&text).map_err(|e| LadcError::config(format!("invalid config: {e}")).with_path(path))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    for pattern in &file.include {
        let full_pattern = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            base_dir.join(pattern).to_string_lossy().into_owned()
        };
        let mut matched: Vec<_> = glob::glob(&full_pattern)
            .map_err(|e| LadcError::config(format!("invalid include glob \"{pattern}\": {e}")).with_path(path))?
            .filter_map(Result::ok)
            .collect();
        matched.sort();
        for included in matched {
            load_into(&included, merged, seen)?;
        }
    }

    if file.defaults.is_some() {
        merged.defaults = file.defaults;
    }
    merged.actions.extend(file.actions);
    merged.sources.extend(file.sources);
    merged.rules.extend(file.rules);
    merged.local = merged.local || file.local;

    Ok(())
}
