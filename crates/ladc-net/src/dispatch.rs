//! Control dispatcher: routes a parsed [`Message`] to the right
//! [`Engine`] method (spec §4.6 "Dispatch routes to the appropriate
//! component method"). Shared by the control FIFO reader and the peer
//! listener, which differ only in `Origin` and in whether the frame
//! arrived encrypted.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tracing::info;

use ladc_common::grammar::{parse_add_payload, EndTime};
use ladc_common::{HostAddress, LadcError};
use ladc_core::{Deadline, Engine, SubmissionKind};

use crate::message::{Message, Verb};
use crate::peer::{parse_peer, PeerEndpoint};
use crate::sync::SyncManager;

/// Where a [`Message`] arrived from. `Add`/`Sync` behave slightly
/// differently depending on this: a peer-originated `add` is applied
/// locally but not re-broadcast (spec §9: avoid loops is implicit in
/// "each live fire", which only ever refers to locally-fired commands).
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    Fifo,
    Peer(IpAddr),
}

pub struct Dispatcher {
    engine: Arc<Engine>,
    config_path: PathBuf,
    peer: Arc<PeerEndpoint>,
    sync: SyncManager,
    shutdown: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, config_path: PathBuf, peer: Arc<PeerEndpoint>, shutdown: Arc<Notify>) -> Self {
        Dispatcher {
            engine,
            config_path,
            peer,
            sync: SyncManager::new(),
            shutdown,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn dispatch(&self, msg: Message, origin: Origin) -> Result<(), LadcError> {
        match msg.verb {
            Verb::Add => self.handle_add(&msg.payload, origin).await,
            Verb::Del => self.handle_del(&msg.payload).await,
            Verb::Flush => {
                self.engine.flush().await;
                Ok(())
            }
            Verb::Reload => self.reload().await,
            Verb::Shutdown => {
                info!("shutdown requested over control channel");
                self.shutdown.notify_one();
                Ok(())
            }
            Verb::DumpState => self.dump_state().await,
            Verb::SetLogLevel => self.set_log_level(&msg.payload),
            Verb::ResetCounters => {
                self.engine.reset_counters();
                Ok(())
            }
            Verb::Sync => self.handle_sync(&msg.payload, origin).await,
            Verb::StopSync => {
                self.sync.stop().await;
                Ok(())
            }
            Verb::DumpStatus => self.dump_status().await,
            Verb::EnableRule => self.set_rule_enabled(&msg.payload, true),
            Verb::DisableRule => self.set_rule_enabled(&msg.payload, false),
            Verb::MonitoringLevel => self.set_monitor_level(&msg.payload),
        }
    }

    async fn handle_add(&self, payload: &str, origin: Origin) -> Result<(), LadcError> {
        let parsed = parse_add_payload(payload).map_err(|e| LadcError::wire(e.to_string()))?;
        let addr = HostAddress::parse(&parsed.address).map_err(|e| LadcError::wire(e.to_string()))?;
        let deadline = parsed.end_time.map(to_deadline);
        let submission = match origin {
            Origin::Fifo => SubmissionKind::Manual,
            Origin::Peer(_) => SubmissionKind::Remote,
        };
        let queued = self
            .engine
            .enqueue_manual(addr, &parsed.rule, deadline, parsed.factor, submission)
            .await?;
        if let (Some(instance), Origin::Fifo) = (queued, origin) {
            self.peer.broadcast_add(&instance).await;
        }
        Ok(())
    }

    async fn handle_del(&self, payload: &str) -> Result<(), LadcError> {
        let addr = HostAddress::parse(payload).map_err(|e| LadcError::wire(e.to_string()))?;
        self.engine.remove_now(&addr).await;
        Ok(())
    }

    async fn reload(&self) -> Result<(), LadcError> {
        let config = ladc_config::load(&self.config_path)?;
        self.engine.reload(config);
        self.engine.run_initialize_actions().await;
        Ok(())
    }

    async fn dump_state(&self) -> Result<(), LadcError> {
        let config = self.engine.config();
        let path = config
            .defaults
            .snapshot_path
            .as_ref()
            .ok_or_else(|| LadcError::config("no snapshot_path configured"))?;
        ladc_core::snapshot::dump(&self.engine, std::path::Path::new(path)).await
    }

    async fn dump_status(&self) -> Result<(), LadcError> {
        let config = self.engine.config();
        let base = config
            .defaults
            .status_path
            .as_ref()
            .ok_or_else(|| LadcError::config("no status_path configured"))?;
        ladc_core::status::dump_combined(&self.engine, std::path::Path::new(base), self.engine.monitor_level()).await
    }

    fn set_log_level(&self, payload: &str) -> Result<(), LadcError> {
        let level: u8 = payload
            .trim()
            .parse()
            .map_err(|_| LadcError::wire(format!("bad log level \"{payload}\"")))?;
        if level > 9 {
            return Err(LadcError::wire("log level must be 0..9"));
        }
        self.engine.set_log_level(level);
        Ok(())
    }

    fn set_monitor_level(&self, payload: &str) -> Result<(), LadcError> {
        let level: u8 = payload
            .trim()
            .parse()
            .map_err(|_| LadcError::wire(format!("bad monitoring level \"{payload}\"")))?;
        if level > 2 {
            return Err(LadcError::wire("monitoring level must be 0..2"));
        }
        self.engine.set_monitor_level(level);
        Ok(())
    }

    fn set_rule_enabled(&self, rule_name: &str, enabled: bool) -> Result<(), LadcError> {
        if self.engine.set_rule_enabled(rule_name.trim(), enabled) {
            Ok(())
        } else {
            Err(LadcError::wire(format!("unknown rule \"{rule_name}\"")))
        }
    }

    async fn handle_sync(&self, payload: &str, origin: Origin) -> Result<(), LadcError> {
        let config = self.engine.config();
        let port = config.defaults.remote_port;
        let trimmed = payload.trim();
        let dest = if !trimmed.is_empty() {
            parse_peer(trimmed, port)?
        } else if let Origin::Peer(ip) = origin {
            std::net::SocketAddr::new(ip, port)
        } else {
            return Err(LadcError::wire("sync requires a destination host when issued locally"));
        };
        self.sync.start(self.engine.clone(), self.peer.clone(), dest).await
    }
}

fn to_deadline(end_time: EndTime) -> Deadline {
    match end_time {
        EndTime::Never => Deadline::Never,
        EndTime::At(secs) => Deadline::At(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
    }
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

    fn write_config(extra: &str) -> (tempfile::NamedTempFile, ladc_config::Config) {
        let yaml = format!(
            r#"
defaults:
  remote_secret: "s3cr3t"
{extra}
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
"#
        );
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, yaml.as_bytes()).unwrap();
        let config = ladc_config::load(f.path()).unwrap();
        (f, config)
    }

    async fn dispatcher_for(config: ladc_config::Config, config_path: PathBuf) -> Dispatcher {
        let engine = Arc::new(Engine::new(config, Arc::new(NeverListed)));
        let peer = Arc::new(PeerEndpoint::bind(engine.clone()).await.unwrap());
        Dispatcher::new(engine, config_path, peer, Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn add_then_del_round_trips_through_the_engine() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;

        let add = Message::new(Verb::Add, "1.2.3.4,r1");
        dispatcher.dispatch(add, Origin::Fifo).await.unwrap();
        assert!(dispatcher.engine().end_queue().lock().await.contains_address(&HostAddress::parse("1.2.3.4").unwrap()));

        let del = Message::new(Verb::Del, "1.2.3.4");
        dispatcher.dispatch(del, Origin::Fifo).await.unwrap();
        assert!(!dispatcher.engine().end_queue().lock().await.contains_address(&HostAddress::parse("1.2.3.4").unwrap()));
    }

    #[tokio::test]
    async fn unknown_rule_in_add_payload_is_a_wire_error() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;
        let add = Message::new(Verb::Add, "1.2.3.4,no-such-rule");
        let err = dispatcher.dispatch(add, Origin::Fifo).await.unwrap_err();
        assert!(matches!(err, LadcError::Config { .. }));
    }

    #[tokio::test]
    async fn enable_disable_rule_round_trips() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;
        dispatcher.dispatch(Message::new(Verb::DisableRule, "r1"), Origin::Fifo).await.unwrap();
        assert!(!dispatcher.engine().config().rule("r1").unwrap().is_enabled());
        dispatcher.dispatch(Message::new(Verb::EnableRule, "r1"), Origin::Fifo).await.unwrap();
        assert!(dispatcher.engine().config().rule("r1").unwrap().is_enabled());
    }

    #[tokio::test]
    async fn unknown_rule_name_on_enable_is_rejected() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;
        let err = dispatcher.dispatch(Message::new(Verb::EnableRule, "ghost"), Origin::Fifo).await.unwrap_err();
        assert!(matches!(err, LadcError::Wire { .. }));
    }

    #[tokio::test]
    async fn monitoring_level_out_of_range_is_rejected() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;
        let err = dispatcher.dispatch(Message::new(Verb::MonitoringLevel, "5"), Origin::Fifo).await.unwrap_err();
        assert!(matches!(err, LadcError::Wire { .. }));
    }

    #[tokio::test]
    async fn sync_without_destination_from_fifo_is_rejected() {
        let (f, config) = write_config("");
        let dispatcher = dispatcher_for(config, f.path().to_path_buf()).await;
        let err = dispatcher.dispatch(Message::new(Verb::Sync, ""), Origin::Fifo).await.unwrap_err();
        assert!(matches!(err, LadcError::Wire { .. }));
    }
}
