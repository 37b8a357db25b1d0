//! Configuration file parsing and rule/pattern compilation (spec §3, §4.1,
//! §6).
//!
//! A [`Config`] is an immutable, validated value assembled from the
//! hierarchical YAML file: `defaults`, `actions`, `sources`, `rules`,
//! `local`. Reload is "atomic swap" (spec §9): callers hold a
//! `Config` behind `std::sync::RwLock<Arc<Config>>` and replace the
//! whole value rather than mutating it in place.

mod action;
mod config;
mod defaults;
mod file;
mod pattern;
mod rule;
mod source;

pub use action::{ActionTemplate, NeedHost};
pub use config::Config;
pub use defaults::Defaults;
pub use pattern::{compile as compile_pattern, CompiledPattern, PatternToken};
pub use rule::Rule;
pub use source::Source;

pub use ladc_common::LadcError;

/// Loads and validates the configuration rooted at `path`, resolving
/// `include` globs along the way (spec §6).
pub fn load(path: impl AsRef<std::path::Path>) -> Result<Config, LadcError> {
    let raw = file::load_raw(path.as_ref())?;
    config::Config::from_raw(raw)
}
