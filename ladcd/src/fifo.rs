//! Control FIFO reader (spec §4.6, §6 "Control FIFO"): a named pipe
//! that accepts one unencrypted, unpadded control message per line.
//!
//! Opened read-write so the daemon never sees EOF between clients (a
//! read-only open blocks until a writer appears, then returns EOF the
//! moment that writer closes, needing the mkfifo equivalent of a
//! reopen loop; read-write avoids that entirely).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use ladc_net::{Dispatcher, Message, Origin};

pub struct ControlFifo {
    path: PathBuf,
}

impl ControlFifo {
    /// Creates the named pipe at `path` (mode 0600), removing a stale
    /// regular file left over from a previous run only if it is itself
    /// a fifo.
    #[cfg(unix)]
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        use nix::sys::stat::Mode;
        use nix::unistd::mkfifo;

        let path = path.as_ref().to_path_buf();
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                use std::os::unix::fs::FileTypeExt;
                if meta.file_type().is_fifo() {
                    std::fs::remove_file(&path).with_context(|| format!("cannot remove stale fifo {}", path.display()))?;
                } else {
                    anyhow::bail!("{} exists and is not a fifo, refusing to overwrite", path.display());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("cannot stat {}", path.display())),
        }
        mkfifo(&path, Mode::from_bits_truncate(0o600)).with_context(|| format!("cannot create fifo {}", path.display()))?;
        Ok(ControlFifo { path })
    }

    #[cfg(not(unix))]
    pub fn create(_path: impl AsRef<Path>) -> Result<Self> {
        anyhow::bail!("control fifo is only supported on unix")
    }

    /// Reads control lines until `shutdown` fires, dispatching each
    /// through `dispatcher` with [`Origin::Fifo`].
    pub async fn run(&self, dispatcher: &Dispatcher, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .with_context(|| format!("cannot open fifo {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => self.handle_line(dispatcher, &text).await,
                        Ok(None) => {
                            warn!("control fifo reached EOF unexpectedly, last writer closed both ends");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(error = %e, "error reading control fifo");
                        }
                    }
                }
            }
        }
    }

    async fn handle_line(&self, dispatcher: &Dispatcher, text: &str) {
        match Message::parse_line(text) {
            Ok(Some(msg)) => {
                if let Err(e) = dispatcher.dispatch(msg, Origin::Fifo).await {
                    warn!(error = %e, line = %text, "control fifo command failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, line = %text, "malformed control fifo line"),
        }
    }
}

impl Drop for ControlFifo {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        info!(path = %self.path.display(), "control fifo removed");
    }
}
