//! Signal wiring (spec §6 "Signals"): `HUP` reloads, `USR1` flushes the
//! end-queue, `INT`/`TERM` request a graceful shutdown, `PIPE` is
//! ignored so a write to a closed peer socket or dead action subprocess
//! never kills the daemon.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use ladc_net::{Dispatcher, Message, Origin, Verb};

#[cfg(unix)]
pub async fn run(dispatcher: Arc<Dispatcher>, shutdown: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = signal(SignalKind::hangup()).expect("cannot install SIGHUP handler");
    let mut usr1 = signal(SignalKind::user_defined1()).expect("cannot install SIGUSR1 handler");
    let mut int = signal(SignalKind::interrupt()).expect("cannot install SIGINT handler");
    let mut term = signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
    let mut pipe = signal(SignalKind::pipe()).expect("cannot install SIGPIPE handler");

    loop {
        tokio::select! {
            _ = hup.recv() => {
                info!("SIGHUP received, reloading configuration");
                if let Err(e) = dispatcher.dispatch(Message::new(Verb::Reload, ""), Origin::Fifo).await {
                    warn!(error = %e, "SIGHUP reload failed, keeping previous configuration");
                }
            }
            _ = usr1.recv() => {
                info!("SIGUSR1 received, flushing end-queue");
                let _ = dispatcher.dispatch(Message::new(Verb::Flush, ""), Origin::Fifo).await;
            }
            _ = int.recv() => {
                info!("SIGINT received, shutting down");
                shutdown.notify_waiters();
                return;
            }
            _ = term.recv() => {
                info!("SIGTERM received, shutting down");
                shutdown.notify_waiters();
                return;
            }
            _ = pipe.recv() => {
                // ignored
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn run(_dispatcher: Arc<Dispatcher>, _shutdown: Arc<Notify>) {
    std::future::pending().await
}
