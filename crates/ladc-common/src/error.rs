//! Error taxonomy shared by every `ladc` crate.
//!
//! The seven variants below are exhaustive: every fallible operation
//! described in the daemon's design maps to exactly one of them, and the
//! top-level supervisor decides how to react purely from the variant,
//! never from the message text.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The daemon's error taxonomy.
///
/// Recovery policy (see the crate-level docs on `ladcd` for where this is
/// enforced): `Config` is fatal during initial load and otherwise leaves
/// the previous configuration active; `Wire` and `Auth` are logged and
/// the offending frame is dropped; `TransientIo` is retried by the
/// caller's own backoff; `FatalIo` and `StateCorruption` propagate to the
/// process exit code; `Action` is logged and never retried.
#[derive(Debug, Error)]
pub enum LadcError {
    /// Syntactic or semantic problem in the configuration file or an
    /// included fragment.
    #[error("config error{}: {message}", path_suffix(.path))]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Protocol-version mismatch, unknown verb, parse failure or
    /// over-length field on a control/sync message.
    #[error("wire error: {message}")]
    Wire { message: String },

    /// MAC verification failure or sender absent from the peer
    /// allow-list.
    #[error("auth error: {message}")]
    Auth { message: String },

    /// Transient I/O failure a caller's own backoff should retry (log
    /// file temporarily unavailable, socket EAGAIN, ...).
    #[error("transient I/O error: {message}")]
    TransientIo { message: String },

    /// I/O failure the daemon cannot recover from: pid file unwritable,
    /// FIFO creation failure, bind failure.
    #[error("fatal I/O error: {message}")]
    FatalIo { message: String },

    /// A begin/end action exited non-zero.
    #[error("action error: {message}")]
    Action { message: String },

    /// The persisted snapshot failed to parse; restore is aborted and
    /// the file is left untouched rather than risk overwriting good
    /// state with a partial one.
    #[error("state corruption: {message}")]
    StateCorruption { message: String },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}

impl LadcError {
    pub fn config(message: impl Into<String>) -> Self {
        LadcError::Config {
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if let LadcError::Config { path: slot, .. } = &mut self {
            *slot = Some(path.into());
        }
        self
    }

    pub fn wire(message: impl Into<String>) -> Self {
        LadcError::Wire {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        LadcError::Auth {
            message: message.into(),
        }
    }

    pub fn transient_io(message: impl fmt::Display) -> Self {
        LadcError::TransientIo {
            message: message.to_string(),
        }
    }

    pub fn fatal_io(message: impl fmt::Display) -> Self {
        LadcError::FatalIo {
            message: message.to_string(),
        }
    }

    pub fn action(message: impl fmt::Display) -> Self {
        LadcError::Action {
            message: message.to_string(),
        }
    }

    pub fn state_corruption(message: impl Into<String>) -> Self {
        LadcError::StateCorruption {
            message: message.into(),
        }
    }

    /// True for variants that should surface to the operator via process
    /// exit status rather than being logged and recovered from in place.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LadcError::FatalIo { .. } | LadcError::StateCorruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_renders_path_when_present() {
        let err = LadcError::config("unknown key `foo`").with_path("/etc/ladc/ladc.yaml");
        let text = err.to_string();
        assert!(text.contains("unknown key"));
        assert!(text.contains("/etc/ladc/ladc.yaml"));
    }

    #[test]
    fn only_fatal_io_and_state_corruption_are_fatal() {
        assert!(LadcError::fatal_io("bind failed").is_fatal());
        assert!(LadcError::state_corruption("bad snapshot").is_fatal());
        assert!(!LadcError::wire("bad verb").is_fatal());
        assert!(!LadcError::action("exit 1").is_fatal());
    }
}
