//! Bulk sync sender (spec §4.8 "Bulk sync"): a single, cancellable
//! background task that walks the end-queue and emits one `add` frame
//! per live, addressed instance to a single destination, self-rate-
//! limited to ~5 frames/sec.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ladc_common::grammar::{format_add_payload, AddPayload};
use ladc_common::wire::SYNC_FRAME_INTERVAL_MS;
use ladc_common::LadcError;
use ladc_core::Engine;

use crate::message::{Message, Verb};
use crate::peer::PeerEndpoint;

/// Owns at most one in-flight sync task (spec §4.8: "spawn a single
/// sender task (reject if one is already running)").
#[derive(Default)]
pub struct SyncManager {
    task: TokioMutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new() -> Self {
        SyncManager {
            task: TokioMutex::new(None),
        }
    }

    /// Starts the bulk sync task against `dest`. Fails if one is
    /// already running.
    pub async fn start(&self, engine: Arc<Engine>, peer: Arc<PeerEndpoint>, dest: SocketAddr) -> Result<(), LadcError> {
        let mut slot = self.task.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return Err(LadcError::config("a sync is already running"));
            }
        }
        let handle = tokio::spawn(run_sync(engine, peer, dest));
        *slot = Some(handle);
        Ok(())
    }

    /// Cancels the running sync task, if any (control verb `x`).
    pub async fn stop(&self) -> bool {
        let mut slot = self.task.lock().await;
        match slot.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

async fn run_sync(engine: Arc<Engine>, peer: Arc<PeerEndpoint>, dest: SocketAddr) {
    let instances: Vec<_> = {
        let queue = engine.end_queue().lock().await;
        queue
            .iter_by_address()
            .filter(|i| i.address.is_some())
            .cloned()
            .collect()
    };

    info!(dest = %dest, count = instances.len(), "bulk sync starting");
    for instance in &instances {
        let payload = AddPayload {
            address: instance.address.as_ref().unwrap().to_text(),
            rule: instance.rule_name.clone(),
            end_time: None,
            factor: None,
        };
        let msg = Message::new(Verb::Add, format_add_payload(&payload));
        if let Err(e) = peer.send_to(dest, &msg).await {
            warn!(error = %e, dest = %dest, "bulk sync frame failed");
        }
        tokio::time::sleep(Duration::from_millis(SYNC_FRAME_INTERVAL_MS)).await;
    }
    info!(dest = %dest, count = instances.len(), "bulk sync finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ladc_core::DnsblClient;

    struct NeverListed;
    #[async_trait]
    impl DnsblClient for NeverListed {
        async fn is_listed(&self, _addr: &ladc_common::HostAddress, _zone: &str) -> bool {
            false
        }
    }

    fn config_with_rule() -> ladc_config::Config {
        let yaml = r#"
defaults:
  remote_secret: "s3cr3t"
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
    patterns: ["x %host%"]
    actions: [ban]
    threshold: 1
    duration: 600
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, yaml.as_bytes()).unwrap();
        ladc_config::load(f.path()).unwrap()
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_first_runs() {
        let engine = Arc::new(Engine::new(config_with_rule(), Arc::new(NeverListed)));
        // At least one queued entry keeps `run_sync` alive across its
        // 200ms inter-frame sleep, so the race against the second
        // `start` below is deterministic rather than depending on how
        // fast an empty sync finishes.
        let addr = ladc_common::HostAddress::parse("1.2.3.4").unwrap();
        engine
            .enqueue_manual(addr, "r1", None, None, ladc_core::SubmissionKind::Manual)
            .await
            .unwrap();
        let peer = Arc::new(PeerEndpoint::bind(engine.clone()).await.unwrap());
        let manager = SyncManager::new();
        let dest: SocketAddr = "127.0.0.1:16473".parse().unwrap();
        manager.start(engine.clone(), peer.clone(), dest).await.unwrap();
        let err = manager.start(engine.clone(), peer.clone(), dest).await.unwrap_err();
        assert!(matches!(err, LadcError::Config { .. }));
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_without_a_running_task_returns_false() {
        let manager = SyncManager::new();
        assert!(!manager.stop().await);
    }
}
