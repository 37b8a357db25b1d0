//! A rule: patterns, begin-action templates, thresholds and the live
//! counters the daemon's status dump reports (spec §3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Deserialize;

use ladc_common::Property;

use crate::pattern::{self, CompiledPattern};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleRaw {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: String,
    pub patterns: Vec<String>,
    pub actions: Vec<String>,
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub dnsbl_enabled: Option<bool>,
    #[serde(default)]
    pub dnsbl_duration: Option<u64>,
    #[serde(default)]
    pub dnsbl_zones: Vec<String>,
    #[serde(default)]
    pub meta_enabled: Option<bool>,
    #[serde(default)]
    pub meta_factor: Option<u32>,
    #[serde(default)]
    pub meta_max: Option<u64>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub properties: std::collections::BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// One compiled pattern plus the live counters the status dumper
/// reports (spec §3 "Pattern" counters).
#[derive(Debug)]
pub struct RulePattern {
    pub compiled: CompiledPattern,
    pub detection_count: AtomicU64,
    pub invocation_count: AtomicU64,
}

impl RulePattern {
    fn new(compiled: CompiledPattern) -> Self {
        RulePattern {
            compiled,
            detection_count: AtomicU64::new(0),
            invocation_count: AtomicU64::new(0),
        }
    }
}

/// A fully validated rule. Patterns live behind a mutex because a
/// successful match promotes its pattern one step towards the front of
/// the list (spec §4.2 MRU bias); the rest of the rule is immutable for
/// the lifetime of the `Config` it belongs to.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub enabled: std::sync::atomic::AtomicBool,
    pub source: String,
    pub patterns: Mutex<Vec<RulePattern>>,
    pub action_names: Vec<String>,
    pub threshold: u32,
    pub period: u64,
    pub duration: u64,
    pub dnsbl_enabled: bool,
    pub dnsbl_duration: u64,
    pub dnsbl_zones: Mutex<ladc_common::mru::MruList<String>>,
    pub meta_enabled: bool,
    pub meta_factor: u32,
    pub meta_max: u64,
    pub service: Option<String>,
    pub unit: Option<String>,
    pub properties: Vec<Property>,
    pub detections: AtomicU64,
    pub invocations: AtomicU64,
    pub queued: AtomicU64,
}

impl Rule {
    pub fn from_raw(raw: RuleRaw, source_prefix: Option<&str>, defaults: &crate::Defaults) -> Result<Self, ladc_common::LadcError> {
        if raw.name.len() > 63 || raw.name.contains(',') {
            return Err(ladc_common::LadcError::config(format!(
                "rule name \"{}\" must be <= 63 chars and must not contain ','",
                raw.name
            )));
        }
        let threshold = raw.threshold.unwrap_or(defaults.threshold);
        if threshold < 1 {
            return Err(ladc_common::LadcError::config(format!("rule \"{}\": threshold must be >= 1", raw.name)));
        }
        let duration = raw.duration.unwrap_or(defaults.duration);
        let meta_factor = raw.meta_factor.unwrap_or(defaults.meta_factor);
        if meta_factor < 1 {
            return Err(ladc_common::LadcError::config(format!("rule \"{}\": meta_factor must be >= 1", raw.name)));
        }
        let meta_max = raw.meta_max.unwrap_or(defaults.meta_max);
        if meta_max < duration {
            return Err(ladc_common::LadcError::config(format!(
                "rule \"{}\": meta_max must be >= duration",
                raw.name
            )));
        }

        let mut compiled_patterns = Vec::with_capacity(raw.patterns.len());
        for template in &raw.patterns {
            let compiled = pattern::compile(template, source_prefix, raw.service.as_deref())?;
            compiled_patterns.push(RulePattern::new(compiled));
        }

        let properties = raw
            .properties
            .into_iter()
            .map(|(k, v)| Property::new(k, v))
            .collect();

        Ok(Rule {
            name: raw.name,
            enabled: std::sync::atomic::AtomicBool::new(raw.enabled),
            source: raw.source,
            patterns: Mutex::new(compiled_patterns),
            action_names: raw.actions,
            threshold,
            period: raw.period.unwrap_or(defaults.period),
            duration,
            dnsbl_enabled: raw.dnsbl_enabled.unwrap_or(defaults.dnsbl_enabled),
            dnsbl_duration: raw.dnsbl_duration.unwrap_or(defaults.dnsbl_duration),
            dnsbl_zones: Mutex::new(ladc_common::mru::MruList::from_vec(raw.dnsbl_zones)),
            meta_enabled: raw.meta_enabled.unwrap_or(defaults.meta_enabled),
            meta_factor,
            meta_max,
            service: raw.service,
            unit: raw.unit,
            properties,
            detections: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            queued: AtomicU64::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
