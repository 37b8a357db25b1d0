//! The end-queue scheduler task (spec §4.4 "Scheduler loop").
//!
//! A single task watches the earliest expiry. On each iteration: if
//! the queue is empty it waits unconditionally; otherwise it either
//! pops and processes an already-past deadline, or sleeps until that
//! deadline (racing against a wakeup from a producer whose insertion
//! may have changed the earliest entry).

use std::sync::Arc;
use std::time::SystemTime;

use tracing::info;

use crate::command::Deadline;
use crate::engine::Engine;

/// Runs until `shutdown` fires. On shutdown, calls
/// [`Engine::shutdown_cleanup`] so every entry not marked
/// `quick_shutdown` still gets its end action run (spec §5).
pub async fn run(engine: Arc<Engine>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let next_deadline = {
            let queue = engine.end_queue().lock().await;
            queue.peek_earliest().map(|i| i.end_time)
        };

        match next_deadline {
            None => {
                tokio::select! {
                    _ = engine.end_queue().wait_for_wake() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Some(Deadline::Never) => {
                tokio::select! {
                    _ = engine.end_queue().wait_for_wake() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Some(Deadline::At(at)) => {
                let now = SystemTime::now();
                if at <= now {
                    let popped = {
                        let mut queue = engine.end_queue().lock().await;
                        queue.pop_earliest()
                    };
                    if let Some(instance) = popped {
                        engine.remove_or_renew(instance).await;
                    }
                    continue;
                }
                let sleep_for = at.duration_since(now).unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = engine.end_queue().wait_for_wake() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    info!("scheduler shutting down, flushing end-queue");
    engine.shutdown_cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandTemplate, SubmissionKind};
    use crate::dnsbl::DnsblClient;
    use async_trait::async_trait;
    use ladc_common::HostAddress;
    use ladc_config::NeedHost;
    use std::time::Duration;

    struct NeverListed;
    #[async_trait]
    impl DnsblClient for NeverListed {
        async fn is_listed(&self, _addr: &HostAddress, _zone: &str) -> bool {
            false
        }
    }

    fn minimal_config() -> ladc_config::Config {
        let yaml = r#"
sources:
  - name: auth
    glob: "/tmp/auth.log"
actions:
  - name: ban
    begin: "true"
    end: "true"
rules:
  - name: r1
    source: auth
    patterns: ["Failed %host%"]
    actions: [ban]
    threshold: 1
    period: 600
    duration: 1
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, yaml.as_bytes()).unwrap();
        ladc_config::load(f.path()).unwrap()
    }

    #[tokio::test]
    async fn scheduler_pops_past_deadlines_and_runs_end_action() {
        let engine = Arc::new(Engine::new(minimal_config(), Arc::new(NeverListed)));
        let config = engine.config();
        let rule = config.rule("r1").unwrap();
        let action = config.action("ban").unwrap();
        let template = CommandTemplate {
            rule_name: rule.name.clone(),
            pattern_index: None,
            action_name: action.name.clone(),
            begin: action.begin.clone(),
            end: action.end.clone(),
            need_host: NeedHost::Any,
            quick_shutdown: false,
        };
        let addr = HostAddress::parse("1.2.3.4").unwrap();
        let mut instance = template.instantiate(Some(addr), vec![], SubmissionKind::Local);
        instance.end_time = crate::command::Deadline::At(SystemTime::now() - Duration::from_secs(1));
        engine.end_queue().lock().await.insert(instance).unwrap();

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(run(engine.clone(), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert_eq!(engine.end_queue().lock().await.len(), 0);
    }
}
