//! The engine: ties config, trigger lists, end-queue and meta store
//! together behind the lock order spec §5 mandates (configuration lock,
//! then end-queue lock, then snapshot lock).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use ladc_common::{HostAddress, LadcError, Property};
use ladc_config::Config;

use crate::command::{deadline_after, substitute, CommandInstance, CommandTemplate, Deadline, SubmissionKind};
use crate::dnsbl::{first_listed_zone, DnsblClient};
use crate::endqueue::{EndQueueError, EndQueueHandle};
use crate::meta::{MetaStore, FACTOR_CAPPED};
use crate::trigger::TriggerList;

/// Shared engine state. Cloned as `Arc<Engine>` by every task that
/// needs it (scheduler, control dispatcher, source readers).
pub struct Engine {
    config: RwLock<Arc<Config>>,
    end_queue: EndQueueHandle,
    meta: tokio::sync::Mutex<MetaStore>,
    trigger_lists: StdMutex<HashMap<String, TriggerList>>,
    dnsbl: Arc<dyn DnsblClient>,
    log_level: AtomicU8,
    monitor_level: AtomicU8,
}

impl Engine {
    pub fn new(config: Config, dnsbl: Arc<dyn DnsblClient>) -> Self {
        let trigger_lists = config
            .rules
            .iter()
            .map(|r| (r.name.clone(), TriggerList::new()))
            .collect();
        Engine {
            config: RwLock::new(Arc::new(config)),
            end_queue: EndQueueHandle::new(),
            meta: tokio::sync::Mutex::new(MetaStore::new()),
            trigger_lists: StdMutex::new(trigger_lists),
            dnsbl,
            log_level: AtomicU8::new(6),
            monitor_level: AtomicU8::new(0),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().unwrap().clone()
    }

    pub fn end_queue(&self) -> &EndQueueHandle {
        &self.end_queue
    }

    /// Atomic reload: the new config replaces the old wholesale under
    /// the configuration lock (spec §9). Trigger lists are rebuilt by
    /// rule name; rule ids referenced by live end-queue entries simply
    /// stop resolving, which is the tolerated "post-reload nil-rule"
    /// case (spec §9).
    pub fn reload(&self, new_config: Config) {
        let mut lists = self.trigger_lists.lock().unwrap();
        lists.clear();
        for rule in &new_config.rules {
            lists.insert(rule.name.clone(), TriggerList::new());
        }
        drop(lists);
        *self.config.write().unwrap() = Arc::new(new_config);
        info!("configuration reloaded");
    }

    pub fn set_log_level(&self, level: u8) {
        self.log_level.store(level.min(9), Ordering::Relaxed);
    }

    pub fn log_level(&self) -> u8 {
        self.log_level.load(Ordering::Relaxed)
    }

    pub fn set_monitor_level(&self, level: u8) {
        self.monitor_level.store(level.min(2), Ordering::Relaxed);
    }

    pub fn monitor_level(&self) -> u8 {
        self.monitor_level.load(Ordering::Relaxed)
    }

    pub fn set_rule_enabled(&self, rule_name: &str, enabled: bool) -> bool {
        let config = self.config();
        match config.rule(rule_name) {
            Some(rule) => {
                rule.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn reset_counters(&self) {
        let config = self.config();
        for rule in &config.rules {
            rule.detections.store(0, Ordering::Relaxed);
            rule.invocations.store(0, Ordering::Relaxed);
            for pattern in rule.patterns.lock().unwrap().iter() {
                pattern.detection_count.store(0, Ordering::Relaxed);
                pattern.invocation_count.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Detection pipeline entry point (spec §4.2): tries every enabled
    /// rule bound to `source`, in turn trying each of its patterns in
    /// arrival order, stopping at the first match per rule. Returns
    /// every instance that actually got queued, so a caller wired to
    /// `ladc-net` can `broadcast_add` them (spec §4.8 "each live fire").
    pub async fn feed(&self, source: &str, line: &str, unit: Option<&str>) -> Vec<CommandInstance> {
        let config = self.config();
        let mut queued = Vec::new();
        for rule in config.rules_for_source(source) {
            if !rule.is_enabled() {
                continue;
            }
            if want_unit_mismatch(rule.unit.as_deref(), unit) {
                continue;
            }

            let hit = {
                let mut patterns = rule.patterns.lock().unwrap();
                let mut matched_index = None;
                for (idx, rp) in patterns.iter().enumerate() {
                    if let Some(bindings) = crate::detect::extract_bindings(&rp.compiled, line) {
                        matched_index = Some((idx, bindings));
                        break;
                    }
                }
                matched_index.map(|(idx, bindings)| {
                    patterns[idx].detection_count.fetch_add(1, Ordering::Relaxed);
                    if idx > 0 {
                        patterns.swap(idx - 1, idx);
                    }
                    bindings
                })
            };

            if let Some(bindings) = hit {
                rule.detections.fetch_add(1, Ordering::Relaxed);
                queued.extend(self.trigger_all_actions(&config, rule, bindings).await);
            }
        }
        queued
    }

    async fn trigger_all_actions(&self, config: &Arc<Config>, rule: &ladc_config::Rule, bindings: Vec<Property>) -> Vec<CommandInstance> {
        let address = crate::detect::host_binding(&bindings);

        if let Some(addr) = &address {
            let mut ignore_list = config.defaults.ignore_list.lock().unwrap();
            if ignore_list.find_containing(addr).is_some() {
                debug!(address = %addr, "address on ignore-list, not triggering");
                return Vec::new();
            }
        }

        let mut queued = Vec::new();
        for action_name in &rule.action_names {
            let Some(action) = config.action(action_name) else {
                warn!(rule = %rule.name, action = %action_name, "rule references unknown action at trigger time");
                continue;
            };
            if let Some(instance) = self.trigger_single_action(config, rule, action, &bindings, address.clone()).await {
                queued.push(instance);
            }
        }
        queued
    }

    async fn trigger_single_action(
        &self,
        config: &Arc<Config>,
        rule: &ladc_config::Rule,
        action: &ladc_config::ActionTemplate,
        bindings: &[Property],
        address: Option<HostAddress>,
    ) -> Option<CommandInstance> {
        let template = CommandTemplate {
            rule_name: rule.name.clone(),
            pattern_index: None,
            action_name: action.name.clone(),
            begin: action.begin.clone(),
            end: action.end.clone(),
            need_host: action.need_host,
            quick_shutdown: action.quick_shutdown,
        };

        let probe = template.instantiate(address.clone(), bindings.to_vec(), SubmissionKind::Local);
        if !probe.satisfies_need_host() {
            return None;
        }

        if let Some(addr) = &address {
            let queue = self.end_queue.lock().await;
            if queue.contains_address(addr) {
                debug!(address = %addr, rule = %rule.name, "duplicate suppression: already banned");
                return None;
            }
        }

        if rule.dnsbl_enabled && rule.threshold > 1 {
            if let Some(addr) = &address {
                let mut zones = rule.dnsbl_zones.lock().unwrap();
                let hit = first_listed_zone(self.dnsbl.as_ref(), addr, &mut zones).await;
                drop(zones);
                if hit.is_some() {
                    let mut instance = template.instantiate(address, bindings.to_vec(), SubmissionKind::Local);
                    instance.previously_on_blocklist = true;
                    return self.fire(rule, instance).await;
                }
            }
        }

        let key = (action.name.clone(), address.clone());
        let bindings_owned = bindings.to_vec();
        let address_for_candidate = address.clone();
        let fired = {
            let mut lists = self.trigger_lists.lock().unwrap();
            let list = lists.entry(rule.name.clone()).or_default();
            list.advance(key, rule.threshold, rule.period, move || {
                template.instantiate(address_for_candidate, bindings_owned, SubmissionKind::Local)
            })
        };

        match fired {
            Some(instance) => self.fire(rule, instance).await,
            None => None,
        }
    }

    /// Executes a candidate's begin action and, if it has an end action
    /// with positive duration, enqueues it (spec §4.3 "Firing"). Returns
    /// a clone of the queued instance on success.
    async fn fire(&self, rule: &ladc_config::Rule, mut instance: CommandInstance) -> Option<CommandInstance> {
        rule.invocations.fetch_add(1, Ordering::Relaxed);

        let rendered_begin = instance.begin.as_deref().map(|tpl| {
            substitute(tpl, instance.address.as_ref(), &rule.name, &rule.source, &instance.bindings, &rule.properties)
        });

        if let Some(cmd) = &rendered_begin {
            if let Err(e) = crate::exec::run_action(cmd).await {
                warn!(error = %e, "begin action failed");
            }
        }

        if !instance.has_end_action() || rule.duration == 0 {
            return None;
        }

        let factor = if rule.meta_enabled {
            if let Some(addr) = &instance.address {
                let mut meta = self.meta.lock().await;
                meta.on_fire(
                    addr,
                    &rule.name,
                    Duration::from_secs(rule.duration),
                    rule.meta_factor,
                    Duration::from_secs(rule.meta_max),
                )
            } else {
                1
            }
        } else {
            1
        };
        instance.factor = factor;

        instance.end_time = compute_deadline(rule, &instance);

        rule.queued.fetch_add(1, Ordering::Relaxed);
        let queued_clone = instance.clone();
        let mut queue = self.end_queue.lock().await;
        let inserted = queue.insert(instance).is_ok();
        drop(queue);
        self.end_queue.wake_scheduler();
        if inserted {
            Some(queued_clone)
        } else {
            warn!(rule = %rule.name, "could not enqueue fired command: address already banned");
            None
        }
    }

    /// Fires every action's `initialize` command across all rules
    /// (spec §10.5 of `SPEC_FULL.md`, grounded on
    /// `original_source/src/actions.c` `create_action`): runs
    /// immediately, unconditionally, and enqueues a sentinel-max
    /// (never-expiring) instance whose end action is the action's
    /// `shutdown` string, if any, so it only ever runs during the
    /// scheduler's shutdown walk (spec §5). Called once at daemon
    /// startup and again after every successful reload, matching the
    /// source firing it at `create_action` time, which runs once per
    /// config (re)load.
    pub async fn run_initialize_actions(&self) {
        let config = self.config();
        for rule in &config.rules {
            for action_name in &rule.action_names {
                let Some(action) = config.action(action_name) else {
                    continue;
                };
                let Some(initialize) = &action.initialize else {
                    continue;
                };
                let rendered = substitute(initialize, None, &rule.name, &rule.source, &[], &rule.properties);
                if let Err(e) = crate::exec::run_action(&rendered).await {
                    warn!(error = %e, rule = %rule.name, action = %action.name, "initialize action failed");
                }

                if action.shutdown.is_none() {
                    continue;
                }
                let template = CommandTemplate {
                    rule_name: rule.name.clone(),
                    pattern_index: None,
                    action_name: action.name.clone(),
                    begin: None,
                    end: action.shutdown.clone(),
                    need_host: action.need_host,
                    quick_shutdown: action.quick_shutdown,
                };
                let mut instance = template.instantiate(None, vec![], SubmissionKind::Local);
                instance.end_time = Deadline::Never;
                let mut queue = self.end_queue.lock().await;
                let _ = queue.insert(instance);
            }
        }
    }

    /// Manual addition (spec §4.4 `enqueue_manual`): clones `rule`'s
    /// action templates against `address`. Rejects a past deadline or
    /// an existing instance for the address. Returns a clone of the
    /// queued instance (`None` if the rule's action has no end
    /// template, so nothing lives in the end-queue) for callers that
    /// need to `broadcast_add` it.
    pub async fn enqueue_manual(
        &self,
        address: HostAddress,
        rule_name: &str,
        explicit_deadline: Option<Deadline>,
        factor_override: Option<i64>,
        submission: SubmissionKind,
    ) -> Result<Option<CommandInstance>, LadcError> {
        let config = self.config();
        let rule = config
            .rule(rule_name)
            .ok_or_else(|| LadcError::config(format!("unknown rule \"{rule_name}\"")))?;

        {
            let queue = self.end_queue.lock().await;
            if queue.contains_address(&address) {
                return Err(LadcError::config("an instance already exists for this address"));
            }
        }

        let Some(action_name) = rule.action_names.first() else {
            return Err(LadcError::config(format!("rule \"{rule_name}\" has no actions")));
        };
        let action = config
            .action(action_name)
            .ok_or_else(|| LadcError::config("rule references unknown action"))?;

        let template = CommandTemplate {
            rule_name: rule.name.clone(),
            pattern_index: None,
            action_name: action.name.clone(),
            begin: action.begin.clone(),
            end: action.end.clone(),
            need_host: action.need_host,
            quick_shutdown: action.quick_shutdown,
        };
        let mut instance = template.instantiate(Some(address), vec![], submission);

        instance.end_time = match explicit_deadline {
            Some(d) => {
                if let Deadline::At(t) = d {
                    if t <= std::time::SystemTime::now() {
                        return Err(LadcError::config("deadline is already in the past"));
                    }
                }
                d
            }
            None => {
                let factor = factor_override.unwrap_or(1);
                instance.factor = factor;
                compute_deadline(rule, &instance)
            }
        };
        if let Some(f) = factor_override {
            instance.factor = f;
        }

        let rendered_begin = instance.begin.as_deref().map(|tpl| {
            substitute(tpl, instance.address.as_ref(), &rule.name, &rule.source, &instance.bindings, &rule.properties)
        });
        if let Some(cmd) = &rendered_begin {
            if let Err(e) = crate::exec::run_action(cmd).await {
                warn!(error = %e, "begin action failed for manual add");
            }
        }

        if instance.has_end_action() {
            let queued_clone = instance.clone();
            let mut queue = self.end_queue.lock().await;
            queue.insert(instance).map_err(|e: EndQueueError| LadcError::config(e.to_string()))?;
            drop(queue);
            self.end_queue.wake_scheduler();
            Ok(Some(queued_clone))
        } else {
            Ok(None)
        }
    }

    /// Scheduler's `remove_or_renew` (spec §4.4).
    pub async fn remove_or_renew(&self, mut instance: CommandInstance) {
        let config = self.config();
        let Some(rule) = config.rule(&instance.rule_name) else {
            // Post-reload nil-rule: run the end action blind, nothing
            // else to recompute (spec §9).
            self.run_end_action(&instance, None).await;
            return;
        };

        if instance.previously_on_blocklist {
            if let Some(addr) = instance.address.clone() {
                let mut zones = rule.dnsbl_zones.lock().unwrap();
                let still_listed = first_listed_zone(self.dnsbl.as_ref(), &addr, &mut zones).await.is_some();
                drop(zones);
                if still_listed {
                    instance.end_time = compute_deadline(rule, &instance);
                    instance.submission = SubmissionKind::Renew;
                    let id = instance.id;
                    let new_deadline = instance.end_time;
                    let mut queue = self.end_queue.lock().await;
                    queue.update_deadline(id, new_deadline);
                    drop(queue);
                    self.end_queue.wake_scheduler();
                    info!(address = %addr, rule = %rule.name, "ban renewed (still on blocklist)");
                    return;
                }
            }
        }

        self.run_end_action(&instance, Some(rule)).await;
    }

    async fn run_end_action(&self, instance: &CommandInstance, rule: Option<&ladc_config::Rule>) {
        let Some(end_tpl) = &instance.end else { return };
        let (rule_name, source_name, properties): (&str, &str, &[Property]) = match rule {
            Some(r) => (&r.name, &r.source, &r.properties),
            None => (&instance.rule_name, "", &[]),
        };
        let rendered = substitute(end_tpl, instance.address.as_ref(), rule_name, source_name, &instance.bindings, properties);
        if let Err(e) = crate::exec::run_action(&rendered).await {
            warn!(error = %e, "end action failed");
        }
    }

    /// Manual early removal (control verb `-`, "del"): pops the live
    /// entry for `address`, if any, and runs its end action immediately.
    /// Returns `false` if nothing was banned for this address.
    pub async fn remove_now(&self, address: &HostAddress) -> bool {
        let instance = {
            let mut queue = self.end_queue.lock().await;
            queue.remove_by_address(address)
        };
        self.end_queue.wake_scheduler();
        match instance {
            Some(instance) => {
                self.run_end_action(&instance, self.config().rule(&instance.rule_name)).await;
                true
            }
            None => false,
        }
    }

    /// Flush: immediately runs every live entry's end action and
    /// empties the queue (control verb `F`).
    pub async fn flush(&self) {
        let mut drained = Vec::new();
        {
            let mut queue = self.end_queue.lock().await;
            while let Some(instance) = queue.pop_earliest() {
                drained.push(instance);
            }
        }
        for instance in drained {
            self.run_end_action(&instance, self.config().rule(&instance.rule_name)).await;
        }
        self.end_queue.wake_scheduler();
    }

    /// Shutdown cleanup (spec §5): walks the queue and runs end actions
    /// for every entry not marked `quick_shutdown`.
    pub async fn shutdown_cleanup(&self) {
        let mut drained = Vec::new();
        {
            let mut queue = self.end_queue.lock().await;
            while let Some(instance) = queue.pop_earliest() {
                drained.push(instance);
            }
        }
        for instance in drained {
            if !instance.quick_shutdown {
                self.run_end_action(&instance, self.config().rule(&instance.rule_name)).await;
            }
        }
    }
}

fn want_unit_mismatch(want: Option<&str>, have: Option<&str>) -> bool {
    match (want, have) {
        (Some(w), Some(h)) => w != h,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Deadline computation (spec §4.4):
///
/// - sentinel-max templates never expire
/// - else `d = previously_on_blocklist ? dnsbl_duration : duration`
/// - `factor == -1` (meta cap) -> `now + meta_max`
/// - else `now + d * factor`
fn compute_deadline(rule: &ladc_config::Rule, instance: &CommandInstance) -> Deadline {
    if rule.duration == 0 && !instance.previously_on_blocklist {
        return Deadline::Never;
    }
    let base = if instance.previously_on_blocklist {
        rule.dnsbl_duration
    } else {
        rule.duration
    };
    if instance.factor == FACTOR_CAPPED {
        return deadline_after(Duration::from_secs(rule.meta_max));
    }
    let factor = instance.factor.max(1) as u64;
    deadline_after(Duration::from_secs(base.saturating_mul(factor)))
}
