//! The shell executor (spec §4.5, §10.5 of `SPEC_FULL.md`): begin/end
//! action strings are passed to `/bin/sh -c`. A non-zero exit is logged
//! as [`LadcError::Action`] but never aborts the daemon or is retried.

use ladc_common::LadcError;
use tracing::warn;

/// Runs `command` under `/bin/sh -c`, waiting for it to exit.
pub async fn run_action(command: &str) -> Result<(), LadcError> {
    let status = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .map_err(|e| LadcError::action(format!("failed to spawn shell: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        let err = LadcError::action(format!("command exited with {status}: {command}"));
        warn!(%command, %status, "action command failed");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_ok() {
        assert!(run_action("true").await.is_ok());
    }

    #[tokio::test]
    async fn failing_command_is_reported_not_panicked() {
        let err = run_action("false").await.unwrap_err();
        assert!(matches!(err, LadcError::Action { .. }));
    }
}
