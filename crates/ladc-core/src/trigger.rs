//! Per-rule trigger list: short-term accounting that promotes repeated
//! matches into a fire (spec §4.3).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ladc_common::HostAddress;

use crate::command::CommandInstance;

/// (action-template name, bound address) identifies one threshold
/// window; two different begin-action templates on the same rule never
/// share a counter.
pub type TriggerKey = (String, Option<HostAddress>);

struct TriggerEntry {
    candidate: CommandInstance,
    start_time: Instant,
    n_triggers: u32,
}

/// One rule's trigger list. Entries persist across `feed` calls, so
/// every rule owns its own `TriggerList` for the lifetime of the loaded
/// config (spec §3 "each rule exclusively owns ... its trigger list").
#[derive(Default)]
pub struct TriggerList {
    entries: HashMap<TriggerKey, TriggerEntry>,
}

impl TriggerList {
    pub fn new() -> Self {
        TriggerList { entries: HashMap::new() }
    }

    /// Advances the window for `key`. On the first candidate for a key,
    /// or after the window restarts, the counter is reset to 1; a
    /// `period` of zero means the window is considered expired on
    /// every subsequent call, so it restarts instead of accumulating
    /// (spec §4.3: "period = 0 ... effectively disables the list").
    ///
    /// `make_candidate` is only invoked when no prior candidate exists
    /// for this key; otherwise the prior candidate is reused verbatim
    /// (spec §4.2 step 3: "that candidate is reused").
    ///
    /// Returns `Some(instance)` once `n_triggers` reaches `threshold`,
    /// removing the entry; `threshold <= 1` always fires immediately,
    /// bypassing the list (spec §8 boundary behaviour).
    pub fn advance(
        &mut self,
        key: TriggerKey,
        threshold: u32,
        period: u64,
        make_candidate: impl FnOnce() -> CommandInstance,
    ) -> Option<CommandInstance> {
        self.reap_expired(period);

        let now = Instant::now();
        let window = Duration::from_secs(period);

        if let Some(entry) = self.entries.get_mut(&key) {
            if period == 0 || now.duration_since(entry.start_time) > window {
                entry.start_time = now;
                entry.n_triggers = 1;
            } else {
                entry.n_triggers += 1;
            }
            if entry.n_triggers >= threshold.max(1) {
                return self.entries.remove(&key).map(|e| e.candidate);
            }
            return None;
        }

        let candidate = make_candidate();
        if threshold <= 1 {
            return Some(candidate);
        }
        self.entries.insert(
            key,
            TriggerEntry {
                candidate,
                start_time: now,
                n_triggers: 1,
            },
        );
        None
    }

    /// Drops candidates whose window has elapsed without reaching
    /// threshold again (spec §4.3: "Expired candidates are reaped
    /// lazily during scans").
    pub fn reap_expired(&mut self, period: u64) {
        if period == 0 {
            return;
        }
        let window = Duration::from_secs(period);
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.start_time) <= window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
