//! Scenario 5 from spec §8: a bulk sync walks the end-queue in
//! `by_address` order and emits one `add` frame per entry, spaced by
//! the sync interval, to a single real peer over loopback UDP.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ladc_common::grammar::parse_add_payload;
use ladc_common::HostAddress;
use ladc_core::{DnsblClient, Engine, SubmissionKind};
use ladc_net::sync::SyncManager;
use ladc_net::{Message, PeerEndpoint, Verb};

struct NeverListed;
#[async_trait]
impl DnsblClient for NeverListed {
    async fn is_listed(&self, _addr: &HostAddress, _zone: &str) -> bool {
        false
    }
}

fn config_on_port(port: u16) -> ladc_config::Config {
    let yaml = format!(
        r#"
defaults:
  remote_secret: "bulk-sync-secret"
  remote_bind: "127.0.0.1"
  remote_port: {port}
sources:
  - name: auth
    glob: "/tmp/bulk_sync.log"
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
"#
    );
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();
    ladc_config::load(f.path()).unwrap()
}

#[tokio::test]
async fn bulk_sync_emits_one_add_frame_per_entry_in_address_order() {
    let sender_engine = Arc::new(Engine::new(config_on_port(18473), Arc::new(NeverListed)));
    let receiver_engine = Arc::new(Engine::new(config_on_port(18474), Arc::new(NeverListed)));

    // Three addresses queued out of address order, 100s apart in
    // deadline, as in the spec's literal scenario; `by_address`
    // traversal must still emit them lowest-address-first.
    for (addr, deadline_secs) in [("3.3.3.3", 300u64), ("1.1.1.1", 100), ("2.2.2.2", 200)] {
        sender_engine
            .enqueue_manual(
                HostAddress::parse(addr).unwrap(),
                "r1",
                Some(ladc_core::command::deadline_after(Duration::from_secs(deadline_secs))),
                None,
                SubmissionKind::Manual,
            )
            .await
            .unwrap();
    }

    let sender_peer = Arc::new(PeerEndpoint::bind(sender_engine.clone()).await.unwrap());
    let receiver_peer = Arc::new(PeerEndpoint::bind(receiver_engine.clone()).await.unwrap());
    let receiver_addr: SocketAddr = "127.0.0.1:18474".parse().unwrap();

    let manager = SyncManager::new();
    manager.start(sender_engine.clone(), sender_peer.clone(), receiver_addr).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        let (msg, _sender) = tokio::time::timeout(Duration::from_secs(2), receiver_peer.recv()).await.unwrap();
        assert_eq!(msg.verb, Verb::Add);
        let payload = parse_add_payload(&msg.payload).unwrap();
        received.push(payload.address);
    }

    assert_eq!(received, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
}
