//! The end-queue: a dual-indexed, time-ordered store of active bans
//! (spec §3 "End-queue entry", §4.4).
//!
//! Both indexes are `BTreeMap`/`BTreeSet` — true balanced trees, unlike
//! the source's ad-hoc binary tree with its alternating, non-balancing
//! rotation (spec §9 redesign flag). Traversal is the native ordered
//! iterator, so there is no equivalent of the source's
//! `recursively_walk_tree` bug that never visits the right subtree.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ladc_common::HostAddress;
use tokio::sync::{Mutex, Notify};

use crate::command::{CommandInstance, Deadline};

#[derive(Debug, thiserror::Error)]
pub enum EndQueueError {
    #[error("an active command already exists for this address")]
    DuplicateAddress,
    #[error("no such instance")]
    NotFound,
}

type DeadlineKey = (Deadline, u64, u64);

/// Dual-indexed store. `instances` is the sole owner of every
/// `CommandInstance`; `by_address` and `by_deadline` hold only ids, so
/// the invariant `|by_address| == |by_deadline| == instances.len()`
/// (spec §8) is structurally enforced by routing every mutation through
/// `insert`/`remove_by_id`.
#[derive(Default)]
pub struct EndQueue {
    instances: HashMap<u64, CommandInstance>,
    by_address: BTreeMap<HostAddress, u64>,
    by_deadline: BTreeSet<DeadlineKey>,
}

impl EndQueue {
    pub fn new() -> Self {
        EndQueue {
            instances: HashMap::new(),
            by_address: BTreeMap::new(),
            by_deadline: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains_address(&self, addr: &HostAddress) -> bool {
        self.by_address.contains_key(addr)
    }

    pub fn get_by_address(&self, addr: &HostAddress) -> Option<&CommandInstance> {
        let id = self.by_address.get(addr)?;
        self.instances.get(id)
    }

    /// Inserts a new live command. Rejects if an instance already
    /// exists for this address (spec §3 "At most one active instance
    /// per address at a time").
    pub fn insert(&mut self, instance: CommandInstance) -> Result<(), EndQueueError> {
        if let Some(addr) = &instance.address {
            if self.by_address.contains_key(addr) {
                return Err(EndQueueError::DuplicateAddress);
            }
        }
        let id = instance.id;
        let key: DeadlineKey = (instance.end_time, instance.seq, id);
        if let Some(addr) = instance.address.clone() {
            self.by_address.insert(addr, id);
        }
        self.by_deadline.insert(key);
        self.instances.insert(id, instance);
        Ok(())
    }

    pub fn remove_by_id(&mut self, id: u64) -> Option<CommandInstance> {
        let instance = self.instances.remove(&id)?;
        if let Some(addr) = &instance.address {
            self.by_address.remove(addr);
        }
        self.by_deadline.remove(&(instance.end_time, instance.seq, id));
        Some(instance)
    }

    pub fn remove_by_address(&mut self, addr: &HostAddress) -> Option<CommandInstance> {
        let id = *self.by_address.get(addr)?;
        self.remove_by_id(id)
    }

    pub fn peek_earliest(&self) -> Option<&CommandInstance> {
        let (_, _, id) = self.by_deadline.iter().next()?;
        self.instances.get(id)
    }

    pub fn pop_earliest(&mut self) -> Option<CommandInstance> {
        let (_, _, id) = *self.by_deadline.iter().next()?;
        self.remove_by_id(id)
    }

    /// Moves `id`'s deadline, keeping the address index untouched
    /// (spec §4.4 `remove_or_renew`: "reinsert into `by_deadline`,
    /// address index untouched").
    pub fn update_deadline(&mut self, id: u64, new_deadline: Deadline) -> bool {
        let Some(instance) = self.instances.get(&id) else {
            return false;
        };
        let old_key = (instance.end_time, instance.seq, id);
        if !self.by_deadline.remove(&old_key) {
            return false;
        }
        let instance = self.instances.get_mut(&id).unwrap();
        instance.end_time = new_deadline;
        self.by_deadline.insert((new_deadline, instance.seq, id));
        true
    }

    /// True in-order traversal by address, used by bulk sync (spec
    /// §4.8 "one `add` frame per non-template instance ... in-order
    /// traversal of `by_address`").
    pub fn iter_by_address(&self) -> impl Iterator<Item = &CommandInstance> {
        self.by_address.values().filter_map(|id| self.instances.get(id))
    }

    pub fn iter_by_deadline(&self) -> impl Iterator<Item = &CommandInstance> {
        self.by_deadline.iter().filter_map(|(_, _, id)| self.instances.get(id))
    }

    pub fn count_for_rule(&self, rule_name: &str) -> usize {
        self.instances.values().filter(|i| i.rule_name == rule_name).count()
    }

    /// Invariant check used by tests (spec §8).
    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.by_address.len(), self.instances.len());
        assert_eq!(self.by_deadline.len(), self.instances.len());
    }
}

/// Scheduler-facing wrapper: the queue behind a mutex plus the
/// condition-variable equivalent the scheduler waits on (spec §4.4,
/// §5: "the scheduler holds it while waiting on its condition
/// variable; all producers take it briefly. Signalling is used only
/// when the earliest deadline might have changed").
#[derive(Default)]
pub struct EndQueueHandle {
    queue: Mutex<EndQueue>,
    wake: Notify,
}

impl EndQueueHandle {
    pub fn new() -> Self {
        EndQueueHandle {
            queue: Mutex::new(EndQueue::new()),
            wake: Notify::new(),
        }
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, EndQueue> {
        self.queue.lock().await
    }

    /// Wakes the scheduler task. Called after any mutation that could
    /// have changed the earliest deadline.
    pub fn wake_scheduler(&self) {
        self.wake.notify_one();
    }

    pub async fn wait_for_wake(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandTemplate, SubmissionKind};
    use ladc_config::NeedHost;
    use std::time::{Duration, SystemTime};

    fn instance_for(addr: &str, deadline_secs: u64) -> CommandInstance {
        let tpl = CommandTemplate {
            rule_name: "r".into(),
            pattern_index: Some(0),
            action_name: "ban".into(),
            begin: Some("b".into()),
            end: Some("e".into()),
            need_host: NeedHost::Any,
            quick_shutdown: false,
        };
        let addr = HostAddress::parse(addr).unwrap();
        let mut instance = tpl.instantiate(Some(addr), vec![], SubmissionKind::Local);
        instance.end_time = Deadline::At(SystemTime::now() + Duration::from_secs(deadline_secs));
        instance
    }

    #[test]
    fn rejects_duplicate_address() {
        let mut q = EndQueue::new();
        q.insert(instance_for("1.1.1.1", 60)).unwrap();
        let err = q.insert(instance_for("1.1.1.1", 120)).unwrap_err();
        assert!(matches!(err, EndQueueError::DuplicateAddress));
    }

    #[test]
    fn earliest_deadline_pops_first() {
        let mut q = EndQueue::new();
        q.insert(instance_for("1.1.1.1", 100)).unwrap();
        q.insert(instance_for("2.2.2.2", 10)).unwrap();
        q.insert(instance_for("3.3.3.3", 50)).unwrap();
        q.check_invariants();
        let first = q.pop_earliest().unwrap();
        assert_eq!(first.address.unwrap().to_text(), "2.2.2.2");
        q.check_invariants();
    }

    #[test]
    fn remove_by_address_keeps_indexes_in_sync() {
        let mut q = EndQueue::new();
        q.insert(instance_for("1.1.1.1", 60)).unwrap();
        let addr = HostAddress::parse("1.1.1.1").unwrap();
        assert!(q.remove_by_address(&addr).is_some());
        q.check_invariants();
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn update_deadline_preserves_address_index() {
        let mut q = EndQueue::new();
        let instance = instance_for("9.9.9.9", 10);
        let id = instance.id;
        q.insert(instance).unwrap();
        q.update_deadline(id, Deadline::At(SystemTime::now() + Duration::from_secs(999)));
        q.check_invariants();
        let addr = HostAddress::parse("9.9.9.9").unwrap();
        assert!(q.contains_address(&addr));
    }

    #[test]
    fn in_order_traversal_follows_address_order() {
        let mut q = EndQueue::new();
        q.insert(instance_for("3.0.0.0", 10)).unwrap();
        q.insert(instance_for("1.0.0.0", 10)).unwrap();
        q.insert(instance_for("2.0.0.0", 10)).unwrap();
        let addrs: Vec<_> = q.iter_by_address().map(|i| i.address.clone().unwrap().to_text()).collect();
        assert_eq!(addrs, vec!["1.0.0.0", "2.0.0.0", "3.0.0.0"]);
    }
}
