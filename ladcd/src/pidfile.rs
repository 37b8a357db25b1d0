//! Pid file lifecycle (spec §6 "pid file"; §7 `FatalIo`: "pid file
//! unwritable" is one of the two conditions that abort startup).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current pid to `path`, failing if one is already
    /// present and still owned by a live process.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if process_is_alive(pid) {
                    anyhow::bail!("pid file {} already owned by running process {pid}", path.display());
                }
            }
        }
        std::fs::write(&path, format!("{}\n", std::process::id())).with_context(|| format!("cannot write pid file {}", path.display()))?;
        Ok(PidFile { path })
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None::<nix::sys::signal::Signal>).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}
