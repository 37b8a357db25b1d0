//! A `sources` entry (spec §6): a name, the file glob the tailer
//! follows, and an optional per-source pattern prefix (spec §4.1).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceRaw {
    pub name: String,
    pub glob: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub glob: String,
    pub prefix: Option<String>,
}

impl From<SourceRaw> for Source {
    fn from(raw: SourceRaw) -> Self {
        Source {
            name: raw.name,
            glob: raw.glob,
            prefix: raw.prefix,
        }
    }
}
