//! File-tail log source (spec §1 "concrete log-source tailers"
//! treated as external; recovered minimally per `SPEC_FULL.md` §10.5).
//!
//! Follows a file by inode, detecting rotation (inode change or
//! truncation) the way the source's `inotify.c`/`watch.c` pair does,
//! but polling rather than using `inotify` directly to keep the
//! dependency surface small.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

/// One line read from a tailed source, tagged with the source name and
/// (if the adapter can determine one) the emitting systemd unit.
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub source: String,
    pub unit: Option<String>,
    pub text: String,
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn file_identity(meta: &std::fs::Metadata) -> (u64, u64) {
    (0, meta.len())
}

/// Tails `path` for `source`, sending every newly-appended line to
/// `tx`. Runs until the channel closes or `shutdown` fires. Rotation is
/// detected each poll by comparing the file's `(dev, ino)` to what was
/// open; a change (or a shrink) reopens from the start.
pub async fn tail_file(
    path: PathBuf,
    source: String,
    tx: tokio::sync::mpsc::Sender<SourceLine>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut identity: Option<(u64, u64)> = None;
    let mut reader: Option<BufReader<tokio::fs::File>> = None;
    let mut position: u64 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let current_identity = file_identity(&meta);
                let rotated = identity.map(|i| i != current_identity).unwrap_or(false);
                let truncated = meta.len() < position;
                if reader.is_none() || rotated || truncated {
                    if rotated {
                        info!(path = %path.display(), "log rotation detected, reopening");
                    } else if truncated {
                        info!(path = %path.display(), "log file truncated, reopening");
                    }
                    match tokio::fs::File::open(&path).await {
                        Ok(mut file) => {
                            position = if rotated || reader.is_none() { 0 } else { position };
                            let _ = file.seek(SeekFrom::Start(position)).await;
                            reader = Some(BufReader::new(file));
                            identity = Some(current_identity);
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "cannot open log file");
                            reader = None;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "log file unavailable, retrying");
                reader = None;
            }
        }

        if let Some(r) = reader.as_mut() {
            loop {
                let mut line = String::new();
                match r.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(n) => {
                        position += n as u64;
                        let text = line.trim_end_matches(['\n', '\r']).to_string();
                        if !text.is_empty()
                            && tx
                                .send(SourceLine {
                                    source: source.clone(),
                                    unit: None,
                                    text,
                                })
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "error reading log file");
                        reader = None;
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
