//! Meta (escalation) store: per-(address, rule) factor tracking across
//! successive bans (spec §3 "Meta entry", §4.4).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use ladc_common::HostAddress;

/// -1 is the sentinel meaning "capped at meta_max" (spec glossary
/// "Factor").
pub const FACTOR_CAPPED: i64 = -1;

struct MetaEntry {
    factor: i64,
    window_end: SystemTime,
}

/// Tracks escalation state across rules. Purged lazily: an entry past
/// its window is dropped the next time its key is looked at (spec §3
/// "purged lazily when encountered past its window end").
#[derive(Default)]
pub struct MetaStore {
    entries: HashMap<(HostAddress, String), MetaEntry>,
}

impl MetaStore {
    pub fn new() -> Self {
        MetaStore { entries: HashMap::new() }
    }

    /// Applies the escalation rule on a fresh fire of `rule` against
    /// `address`, returning the factor to use for this ban's deadline
    /// (spec §4.4):
    ///
    /// - absent -> insert factor 1, window = now + `duration`; return 1
    /// - present, window still open -> same offence, keep factor
    /// - present, window elapsed -> `f' = factor * meta_factor`; if
    ///   `duration * f' < meta_max`, adopt it; else cap at `FACTOR_CAPPED`
    ///   with window = now + `meta_max`
    pub fn on_fire(
        &mut self,
        address: &HostAddress,
        rule_name: &str,
        duration: Duration,
        meta_factor: u32,
        meta_max: Duration,
    ) -> i64 {
        let now = SystemTime::now();
        let key = (address.clone(), rule_name.to_string());

        if let Some(entry) = self.entries.get(&key) {
            if entry.window_end > now {
                return entry.factor;
            }
        }

        let previous_factor = self.entries.get(&key).map(|e| e.factor);
        let (new_factor, window_end) = match previous_factor {
            None => (1i64, now + duration),
            Some(prev) => {
                let candidate = prev.saturating_mul(i64::from(meta_factor));
                let candidate_duration = duration.saturating_mul(candidate.max(0) as u32);
                if candidate > 0 && candidate_duration < meta_max {
                    (candidate, now + candidate_duration)
                } else {
                    (FACTOR_CAPPED, now + meta_max)
                }
            }
        };

        self.entries.insert(key, MetaEntry {
            factor: new_factor,
            window_end,
        });
        new_factor
    }

    /// Walk-and-prune: drops every entry whose window has already
    /// elapsed (spec §4.4 "Walk-and-prune").
    pub fn prune(&mut self) {
        let now = SystemTime::now();
        self.entries.retain(|_, e| e.window_end > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
