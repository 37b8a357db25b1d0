//! The assembled, validated configuration (spec §3, §6).

use std::collections::HashMap;

use ladc_common::LadcError;

use crate::action::ActionTemplate;
use crate::defaults::Defaults;
use crate::file::RawConfig;
use crate::rule::Rule;
use crate::source::Source;

/// An immutable, validated configuration. Reload replaces the whole
/// `Arc<Config>` behind the caller's `RwLock` rather than mutating
/// fields in place (spec §9 "process-global configuration ...
/// single read-mostly value ... reload is atomic swap").
#[derive(Debug)]
pub struct Config {
    pub defaults: Defaults,
    pub actions: HashMap<String, ActionTemplate>,
    pub sources: HashMap<String, Source>,
    pub rules: Vec<Rule>,
    pub local: bool,
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> Result<Self, LadcError> {
        let defaults = Defaults::from_raw(raw.defaults.unwrap_or_default())?;

        let mut actions = HashMap::new();
        for action in raw.actions {
            if actions.insert(action.name.clone(), action).is_some() {
                return Err(LadcError::config("duplicate action name"));
            }
        }

        let mut sources = HashMap::new();
        for source in raw.sources {
            let source: Source = source.into();
            if sources.insert(source.name.clone(), source).is_some() {
                return Err(LadcError::config("duplicate source name"));
            }
        }

        let mut rule_names = std::collections::HashSet::new();
        let mut rules = Vec::with_capacity(raw.rules.len());
        for rule_raw in raw.rules {
            if !rule_names.insert(rule_raw.name.clone()) {
                return Err(LadcError::config(format!("duplicate rule name \"{}\"", rule_raw.name)));
            }
            let source = sources.get(&rule_raw.source).ok_or_else(|| {
                LadcError::config(format!(
                    "rule \"{}\" refers to unknown source \"{}\"",
                    rule_raw.name, rule_raw.source
                ))
            })?;
            for action_name in &rule_raw.actions {
                if !actions.contains_key(action_name) {
                    return Err(LadcError::config(format!(
                        "rule \"{}\" refers to unknown action \"{action_name}\"",
                        rule_raw.name
                    )));
                }
            }
            let prefix = source.prefix.clone();
            rules.push(Rule::from_raw(rule_raw, prefix.as_deref(), &defaults)?);
        }

        Ok(Config {
            defaults,
            actions,
            sources,
            rules,
            local: raw.local,
        })
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn rules_for_source(&self, source: &str) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.source == source)
    }

    pub fn action(&self, name: &str) -> Option<&ActionTemplate> {
        self.actions.get(name)
    }
}
