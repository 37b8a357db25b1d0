//! `ladcd`: the intrusion-response daemon (spec §1, §5).
//!
//! Wires together the detection engine (`ladc-core`), the peer sync
//! endpoint and control dispatcher (`ladc-net`) and the external
//! adapters this workspace treats as thin collaborators: file tailers,
//! the control FIFO, the periodic snapshotter and status dumper, and
//! signal handling.

mod fifo;
mod pidfile;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ladc_core::tail::{tail_file, SourceLine};
use ladc_core::{Engine, ResolverDnsblClient};
use ladc_net::{Dispatcher, Origin, PeerEndpoint};

#[derive(Parser, Debug)]
#[command(name = "ladcd", version, about = "Intrusion-response daemon")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/ladc/ladc.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "ladcd exiting");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = ladc_config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    info!(config = %args.config.display(), rules = config.rules.len(), "configuration loaded");

    let fifo_path = config.defaults.fifo_path.clone();
    let pid_path = config.defaults.pid_file.clone();
    let snapshot_path = config.defaults.snapshot_path.clone();
    let status_path = config.defaults.status_path.clone();
    let snapshot_interval = config.defaults.snapshot_interval;
    let backup_on_restore = config.defaults.backup_on_restore;
    let sources: Vec<_> = config.sources.values().cloned().collect();

    let engine = Arc::new(Engine::new(config, Arc::new(ResolverDnsblClient)));

    if let Some(path) = &snapshot_path {
        let path = std::path::Path::new(path);
        match ladc_core::snapshot::restore(&engine, path, backup_on_restore).await {
            Ok(n) => info!(count = n, "restored end-queue from snapshot"),
            Err(e) => warn!(error = %e, "snapshot restore failed, starting with an empty end-queue"),
        }
    }

    let _pid_file = match &pid_path {
        Some(path) => Some(pidfile::PidFile::create(path)?),
        None => None,
    };

    engine.run_initialize_actions().await;

    let peer = Arc::new(PeerEndpoint::bind(engine.clone()).await.context("binding peer endpoint")?);
    let shutdown_notify = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), args.config.clone(), peer.clone(), shutdown_notify.clone()));

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(ladc_core::scheduler::run(engine.clone(), shutdown_rx.clone())));

    tasks.push(tokio::spawn(peer_listener(dispatcher.clone(), peer.clone(), shutdown_rx.clone())));

    let (line_tx, line_rx) = mpsc::channel::<SourceLine>(1024);
    for source in &sources {
        for path in expand_source_glob(&source.glob) {
            tasks.push(tokio::spawn(tail_file(path, source.name.clone(), line_tx.clone(), shutdown_rx.clone(), Duration::from_millis(500))));
        }
    }
    drop(line_tx);
    tasks.push(tokio::spawn(detection_loop(engine.clone(), peer.clone(), line_rx)));

    if let Some(path) = fifo_path.clone() {
        let control = fifo::ControlFifo::create(&path)?;
        let dispatcher = dispatcher.clone();
        let shutdown_rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = control.run(&dispatcher, shutdown_rx).await {
                warn!(error = %e, "control fifo reader stopped");
            }
        }));
    } else {
        warn!("no fifo_path configured, the control channel is unavailable");
    }

    if let Some(path) = snapshot_path.clone() {
        tasks.push(tokio::spawn(snapshot_loop(engine.clone(), path, Duration::from_secs(snapshot_interval), shutdown_rx.clone())));
    }

    if let Some(path) = status_path.clone() {
        tasks.push(tokio::spawn(monitor_loop(engine.clone(), path, shutdown_rx.clone())));
    }

    let signal_task = tokio::spawn(signals::run(dispatcher.clone(), shutdown_notify.clone()));

    shutdown_notify.notified().await;
    info!("shutdown requested, stopping workers");
    let _ = shutdown_tx.send(true);
    signal_task.abort();

    for task in tasks {
        let _ = task.await;
    }

    if let Some(path) = &snapshot_path {
        if let Err(e) = ladc_core::snapshot::dump(&engine, std::path::Path::new(path)).await {
            warn!(error = %e, "final snapshot dump failed");
        }
    }

    info!("ladcd stopped");
    Ok(())
}

/// Feeds the detection pipeline from every source tailer and
/// broadcasts whatever gets queued (spec §4.8: "each live fire calls
/// `broadcast_add`").
async fn detection_loop(engine: Arc<Engine>, peer: Arc<PeerEndpoint>, mut lines: mpsc::Receiver<SourceLine>) {
    while let Some(line) = lines.recv().await {
        let queued = engine.feed(&line.source, &line.text, line.unit.as_deref()).await;
        for instance in &queued {
            peer.broadcast_add(instance).await;
        }
    }
}

/// Receives peer frames and routes them through the same dispatcher the
/// control fifo uses, tagged with the sender's address (spec §4.8).
async fn peer_listener(dispatcher: Arc<Dispatcher>, peer: Arc<PeerEndpoint>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            (msg, sender) = peer.recv() => {
                if let Err(e) = dispatcher.dispatch(msg, Origin::Peer(sender.ip())).await {
                    warn!(error = %e, peer = %sender, "peer command failed");
                }
            }
        }
    }
}

async fn snapshot_loop(engine: Arc<Engine>, path: String, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = ladc_core::snapshot::dump(&engine, std::path::Path::new(&path)).await {
                    warn!(error = %e, "periodic snapshot failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn monitor_loop(engine: Arc<Engine>, base_path: String, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                let level = engine.monitor_level();
                if level > 0 {
                    if let Err(e) = ladc_core::status::dump_combined(&engine, std::path::Path::new(&base_path), level).await {
                        warn!(error = %e, "periodic status dump failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Expands a source's file glob into the concrete paths to tail. A
/// pattern with no wildcard characters is taken literally and tailed
/// even if the file does not exist yet (`tail_file` itself tolerates
/// that and keeps polling); a true wildcard pattern is expanded once at
/// startup, so files created after this point under a new name are not
/// picked up until restart (spec §1 treats the tailer as an external
/// adapter; directory-watching for newly-matching names is not
/// reproduced here, see `DESIGN.md`).
fn expand_source_glob(pattern: &str) -> Vec<PathBuf> {
    if !pattern.contains(['*', '?', '[']) {
        return vec![PathBuf::from(pattern)];
    }
    match glob::glob(pattern) {
        Ok(paths) => {
            let matched: Vec<_> = paths.filter_map(Result::ok).collect();
            if matched.is_empty() {
                warn!(pattern = %pattern, "source glob matched no files at startup");
            }
            matched
        }
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "invalid source glob");
            Vec::new()
        }
    }
}
