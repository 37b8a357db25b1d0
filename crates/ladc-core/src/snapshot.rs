//! Crash-safe dump and restore of the end-queue (spec §4.9).
//!
//! Write protocol: write to a fresh file, close it, then atomically
//! rename over the destination, so a crash mid-write never corrupts the
//! previous good snapshot. Restore aborts on the first parse error and
//! leaves the file untouched (spec §7 `StateCorruption`: "a corrupted
//! snapshot never destroys state").

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use ladc_common::grammar::{format_add_payload, parse_add_payload, AddPayload, EndTime};
use ladc_common::LadcError;

use crate::command::{Deadline, SubmissionKind};
use crate::engine::Engine;

/// Serialises the end-queue to `path`, one `+<payload>` line per
/// non-template instance with an address, in `by_address` order so
/// repeated snapshots diff cleanly.
pub async fn dump(engine: &Engine, path: &Path) -> Result<(), LadcError> {
    let mut text = String::new();
    {
        let queue = engine.end_queue().lock().await;
        for instance in queue.iter_by_address() {
            let Some(addr) = &instance.address else { continue };
            let end_time = match instance.end_time {
                Deadline::At(t) => {
                    let secs = t
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    EndTime::At(secs)
                }
                Deadline::Never => EndTime::Never,
            };
            let payload = AddPayload {
                address: addr.to_text(),
                rule: instance.rule_name.clone(),
                end_time: Some(end_time),
                factor: Some(instance.factor),
            };
            text.push('+');
            text.push_str(&format_add_payload(&payload));
            text.push('\n');
        }
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("ladc.state")
    ));
    tokio::fs::write(&tmp_path, text.as_bytes())
        .await
        .map_err(|e| LadcError::fatal_io(format!("cannot write snapshot: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| LadcError::fatal_io(format!("cannot finalize snapshot: {e}")))?;
    info!(path = %path.display(), "snapshot written");
    Ok(())
}

/// Restores the end-queue from `path`, feeding each line through the
/// manual-add path with its original `(end_time, factor)`. Comments
/// (`#`) and empty lines are ignored (spec §6: "supports dump files").
/// When `backup_on_restore`, a copy of the file is made at `*.bak`
/// before it is parsed.
pub async fn restore(engine: &Engine, path: &Path, backup_on_restore: bool) -> Result<usize, LadcError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(0);
    }

    if backup_on_restore {
        let backup_path = backup_path_for(path);
        if let Err(e) = tokio::fs::copy(path, &backup_path).await {
            warn!(error = %e, "could not create snapshot backup");
        }
    }

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LadcError::fatal_io(format!("cannot read snapshot: {e}")))?;

    let mut parsed = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix('+') else {
            return Err(LadcError::state_corruption(format!(
                "snapshot line {}: expected a '+' command, got \"{line}\"",
                lineno + 1
            )));
        };
        let payload = parse_add_payload(rest)
            .map_err(|e| LadcError::state_corruption(format!("snapshot line {}: {e}", lineno + 1)))?;
        parsed.push(payload);
    }

    let mut restored = 0;
    for payload in parsed {
        let addr = ladc_common::HostAddress::parse(&payload.address)
            .map_err(|e| LadcError::state_corruption(format!("bad address in snapshot: {e}")))?;
        let deadline = payload.end_time.map(|e| match e {
            EndTime::At(secs) => Deadline::At(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs)),
            EndTime::Never => Deadline::Never,
        });
        if let Err(e) = engine
            .enqueue_manual(addr, &payload.rule, deadline, payload.factor, SubmissionKind::Manual)
            .await
        {
            warn!(error = %e, rule = %payload.rule, "could not restore snapshot entry");
            continue;
        }
        restored += 1;
    }
    info!(count = restored, path = %path.display(), "snapshot restored");
    Ok(restored)
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("ladc.state").to_string();
    name.push_str(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnsbl::DnsblClient;
    use async_trait::async_trait;

    struct NeverListed;
    #[async_trait]
    impl DnsblClient for NeverListed {
        async fn is_listed(&self, _addr: &ladc_common::HostAddress, _zone: &str) -> bool {
            false
        }
    }

    fn config_with_rule() -> ladc_config::Config {
        let yaml = r#"
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
    async fn dump_then_restore_round_trips_entries() {
        let engine_a = std::sync::Arc::new(crate::engine::Engine::new(config_with_rule(), std::sync::Arc::new(NeverListed)));
        let addr = ladc_common::HostAddress::parse("1.2.3.4").unwrap();
        let deadline = Deadline::At(std::time::SystemTime::now() + std::time::Duration::from_secs(3600));
        engine_a
            .enqueue_manual(addr.clone(), "r1", Some(deadline), Some(1), SubmissionKind::Manual)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladc.state");
        dump(&engine_a, &path).await.unwrap();

        let engine_b = crate::engine::Engine::new(config_with_rule(), std::sync::Arc::new(NeverListed));
        let restored = restore(&engine_b, &path, false).await.unwrap();
        assert_eq!(restored, 1);
        assert!(engine_b.end_queue().lock().await.contains_address(&addr));
    }

    #[tokio::test]
    async fn restore_aborts_on_corrupted_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladc.state");
        tokio::fs::write(&path, "not a valid line\n").await.unwrap();
        let engine = crate::engine::Engine::new(config_with_rule(), std::sync::Arc::new(NeverListed));
        let err = restore(&engine, &path, false).await.unwrap_err();
        assert!(matches!(err, LadcError::StateCorruption { .. }));
        // File must be left intact.
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "not a valid line\n");
    }
}
