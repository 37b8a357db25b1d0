//! Command templates and instances (spec §3, §4.5).
//!
//! State machine: template -> candidate -> live -> expired-or-renewed.
//! A template is immutable config data; an instance is created by
//! cloning a template and materialising its begin/end strings against
//! the match's bindings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use ladc_common::{AddressFamily, HostAddress, Property};
use ladc_config::NeedHost;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a command instance entered the system (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Local,
    Manual,
    Remote,
    Renew,
}

/// A ban's deadline. `Never` is the "sentinel-max" value used by
/// `initialize`/`shutdown` commands (spec §4.4): it never expires under
/// normal scheduler flow and sorts after every finite deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    At(SystemTime),
    Never,
}

impl Deadline {
    pub fn is_past(&self, now: SystemTime) -> bool {
        match self {
            Deadline::At(t) => *t <= now,
            Deadline::Never => false,
        }
    }

    pub fn at(&self) -> Option<SystemTime> {
        match self {
            Deadline::At(t) => Some(*t),
            Deadline::Never => None,
        }
    }
}

/// A parameterised begin/end action bound to a rule and (for
/// pattern-derived templates) a pattern index. Templates are cloned
/// into instances; they never mutate after a rule loads (spec §3
/// "Ownership").
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub rule_name: String,
    pub pattern_index: Option<usize>,
    pub action_name: String,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub need_host: NeedHost,
    pub quick_shutdown: bool,
}

impl CommandTemplate {
    pub fn instantiate(
        &self,
        address: Option<HostAddress>,
        pattern_bindings: Vec<Property>,
        submission: SubmissionKind,
    ) -> CommandInstance {
        CommandInstance {
            id: next_id(),
            seq: next_id(),
            rule_name: self.rule_name.clone(),
            pattern_index: self.pattern_index,
            action_name: self.action_name.clone(),
            begin: self.begin.clone(),
            end: self.end.clone(),
            need_host: self.need_host,
            quick_shutdown: self.quick_shutdown,
            address,
            bindings: pattern_bindings,
            submission,
            previously_on_blocklist: false,
            end_time: Deadline::Never,
            start_time: SystemTime::now(),
            trigger_count: 1,
            factor: 1,
        }
    }
}

/// A bound, firing or live command (spec §3 "Command").
#[derive(Debug, Clone)]
pub struct CommandInstance {
    pub id: u64,
    /// Monotonic insertion sequence, used as the end-queue's deadline
    /// tie-breaker (spec §4.4 "by_deadline": key = (end_time,
    /// insertion-seq)).
    pub seq: u64,
    pub rule_name: String,
    pub pattern_index: Option<usize>,
    pub action_name: String,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub need_host: NeedHost,
    pub quick_shutdown: bool,
    pub address: Option<HostAddress>,
    pub bindings: Vec<Property>,
    pub submission: SubmissionKind,
    pub previously_on_blocklist: bool,
    pub end_time: Deadline,
    pub start_time: SystemTime,
    pub trigger_count: u32,
    pub factor: i64,
}

impl CommandInstance {
    /// Trigger-list key: same (rule, action, address) candidates share
    /// one threshold window (spec §4.3).
    pub fn trigger_key(&self) -> (String, String, Option<HostAddress>) {
        (self.rule_name.clone(), self.action_name.clone(), self.address.clone())
    }

    /// Enforces the `need_host` constraint (spec §4.5). Returns `false`
    /// ("action not applicable") rather than an error on mismatch.
    pub fn satisfies_need_host(&self) -> bool {
        match self.need_host {
            NeedHost::No => true,
            NeedHost::Any => true,
            NeedHost::V4 => matches!(self.address.as_ref().map(|a| a.family()), Some(AddressFamily::V4)),
            NeedHost::V6 => matches!(self.address.as_ref().map(|a| a.family()), Some(AddressFamily::V6)),
        }
    }

    pub fn has_end_action(&self) -> bool {
        self.end.is_some()
    }
}

/// Names referenced by (special -> pattern captures -> rule properties
/// -> defaults) substitution (spec §4.5).
pub const SPECIAL_HOST: &str = "host";
pub const SPECIAL_RULE: &str = "rule";
pub const SPECIAL_SOURCE: &str = "source";
pub const SPECIAL_IPVERSION: &str = "ipversion";

/// Materialises `template` by scanning left to right: `%%` -> `%`,
/// backslash-escape copies the next byte verbatim, `%name%` resolves
/// from (special names -> pattern captures -> rule properties ->
/// defaults), unresolved tokens render as empty (spec §4.5).
pub fn substitute(
    template: &str,
    address: Option<&HostAddress>,
    rule_name: &str,
    source_name: &str,
    pattern_bindings: &[Property],
    rule_properties: &[Property],
) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 < bytes.len() {
                    out.push(bytes[i + 1] as char);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            b'%' => {
                if let Some(end) = template[i + 1..].find('%') {
                    let raw_name = &template[i + 1..i + 1 + end];
                    i = i + 1 + end + 1;
                    if raw_name.is_empty() {
                        out.push('%');
                        continue;
                    }
                    let name = raw_name.to_ascii_lowercase();
                    out.push_str(&resolve(&name, address, rule_name, source_name, pattern_bindings, rule_properties));
                } else {
                    out.push(bytes[i] as char);
                    i += 1;
                }
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

fn resolve(
    name: &str,
    address: Option<&HostAddress>,
    rule_name: &str,
    source_name: &str,
    pattern_bindings: &[Property],
    rule_properties: &[Property],
) -> String {
    match name {
        SPECIAL_HOST => return address.map(|a| a.to_text()).unwrap_or_default(),
        SPECIAL_RULE => return rule_name.to_string(),
        SPECIAL_SOURCE => return source_name.to_string(),
        SPECIAL_IPVERSION => {
            return match address.map(|a| a.family()) {
                Some(AddressFamily::V4) => "4".to_string(),
                Some(AddressFamily::V6) => "6".to_string(),
                None => String::new(),
            }
        }
        _ => {}
    }
    if let Some(p) = pattern_bindings.iter().find(|p| p.name() == name) {
        return p.value().to_string();
    }
    if let Some(p) = rule_properties.iter().find(|p| p.name() == name) {
        return p.value().to_string();
    }
    String::new()
}

/// Computes a non-`Never` deadline `duration` in the future, saturating
/// rather than panicking on absurd inputs.
pub fn deadline_after(duration: Duration) -> Deadline {
    Deadline::At(SystemTime::now() + duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_resolves_special_names() {
        let addr = HostAddress::parse("1.2.3.4").unwrap();
        let out = substitute("ban %host% for %rule% v%ipversion%", Some(&addr), "sshd-fail", "auth", &[], &[]);
        assert_eq!(out, "ban 1.2.3.4 for sshd-fail v4");
    }

    #[test]
    fn unresolved_tokens_render_empty() {
        let out = substitute("x=%nope%", None, "r", "s", &[], &[]);
        assert_eq!(out, "x=");
    }

    #[test]
    fn double_percent_is_literal() {
        let out = substitute("100%% full", None, "r", "s", &[], &[]);
        assert_eq!(out, "100% full");
    }

    #[test]
    fn pattern_bindings_take_priority_over_rule_properties() {
        let bindings = vec![Property::new("msg", "from-pattern")];
        let rule_props = vec![Property::new("msg", "from-rule")];
        let out = substitute("%msg%", None, "r", "s", &bindings, &rule_props);
        assert_eq!(out, "from-pattern");
    }

    #[test]
    fn need_host_any_permits_missing_address() {
        let tpl = CommandTemplate {
            rule_name: "r".into(),
            pattern_index: None,
            action_name: "a".into(),
            begin: Some("x".into()),
            end: None,
            need_host: NeedHost::Any,
            quick_shutdown: false,
        };
        let instance = tpl.instantiate(None, vec![], SubmissionKind::Local);
        assert!(instance.satisfies_need_host());
    }

    #[test]
    fn need_host_v4_rejects_v6_address() {
        let tpl = CommandTemplate {
            rule_name: "r".into(),
            pattern_index: None,
            action_name: "a".into(),
            begin: Some("x".into()),
            end: None,
            need_host: NeedHost::V4,
            quick_shutdown: false,
        };
        let addr = HostAddress::parse("::1").unwrap();
        let instance = tpl.instantiate(Some(addr), vec![], SubmissionKind::Local);
        assert!(!instance.satisfies_need_host());
    }
}
