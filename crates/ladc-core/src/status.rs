//! Status/monitoring text dumper (spec §6, supplemental feature
//! recovered from `original_source/src/status.c`).
//!
//! Three append-free, overwrite-on-each-call text files: a host listing
//! (one line per live end-queue entry), a rule listing (counters per
//! rule), and a diagnostics dump (queue length plus per-rule detection/
//! invocation/queued counters). `ladc hosts`/`rules`/`diagnostics` just
//! `cat` whichever of these the daemon was configured to write.

use std::sync::atomic::Ordering;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::warn;

use ladc_common::LadcError;

use crate::command::Deadline;
use crate::engine::Engine;

fn now_header() -> String {
    let now: DateTime<Utc> = SystemTime::now().into();
    format!("# generated {}\n", now.to_rfc3339())
}

fn deadline_text(deadline: Deadline) -> String {
    match deadline {
        Deadline::Never => "never".to_string(),
        Deadline::At(t) => {
            let dt: DateTime<Utc> = t.into();
            dt.to_rfc3339()
        }
    }
}

/// Writes the current end-queue as a host listing (verb `D` dump
/// status and the `hosts` CLI readout both read this file).
pub async fn dump_hosts(engine: &Engine, path: &std::path::Path) -> Result<(), LadcError> {
    let mut text = now_header();
    text.push_str("# address  rule  end-time  factor\n");
    let queue = engine.end_queue().lock().await;
    for instance in queue.iter_by_address() {
        let addr = instance.address.as_ref().map(|a| a.to_text()).unwrap_or_else(|| "-".to_string());
        text.push_str(&format!(
            "{addr}  {}  {}  {}\n",
            instance.rule_name,
            deadline_text(instance.end_time),
            instance.factor
        ));
    }
    drop(queue);
    write_file(path, &text).await
}

/// Writes per-rule counters (detections, invocations, currently queued).
pub async fn dump_rules(engine: &Engine, path: &std::path::Path) -> Result<(), LadcError> {
    let mut text = now_header();
    text.push_str("# rule  enabled  detections  invocations  queued\n");
    let config = engine.config();
    for rule in &config.rules {
        text.push_str(&format!(
            "{}  {}  {}  {}  {}\n",
            rule.name,
            rule.is_enabled(),
            rule.detections.load(Ordering::Relaxed),
            rule.invocations.load(Ordering::Relaxed),
            rule.queued.load(Ordering::Relaxed)
        ));
    }
    write_file(path, &text).await
}

/// Writes a free-form diagnostics dump: queue length plus per-rule
/// pattern hit counts, only produced at monitoring level >= 2 (spec's
/// `status_monitoring >= 2` gate on the source's `DIAGFILE`).
pub async fn dump_diagnostics(engine: &Engine, path: &std::path::Path) -> Result<(), LadcError> {
    let mut text = now_header();
    let queue = engine.end_queue().lock().await;
    text.push_str(&format!("queue length: {}\n", queue.len()));
    drop(queue);
    let config = engine.config();
    for rule in &config.rules {
        text.push_str(&format!("\nrule {}\n", rule.name));
        for (idx, pattern) in rule.patterns.lock().unwrap().iter().enumerate() {
            text.push_str(&format!(
                "  pattern[{idx}]: detections={} invocations={}\n",
                pattern.detection_count.load(Ordering::Relaxed),
                pattern.invocation_count.load(Ordering::Relaxed)
            ));
        }
    }
    write_file(path, &text).await
}

/// Derives the three status files from one configured base path
/// (`defaults.status_path`), the way the source derives `HOSTSFILE`/
/// `RULESFILE`/`DIAGFILE` from one status directory.
pub fn hosts_path(base: &std::path::Path) -> std::path::PathBuf {
    sibling(base, "hosts")
}

pub fn rules_path(base: &std::path::Path) -> std::path::PathBuf {
    sibling(base, "rules")
}

pub fn diag_path(base: &std::path::Path) -> std::path::PathBuf {
    sibling(base, "diag")
}

fn sibling(base: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = base.file_name().and_then(|n| n.to_str()).unwrap_or("ladc-status").to_string();
    name.push('.');
    name.push_str(suffix);
    base.with_file_name(name)
}

/// Writes the `hosts`/`rules` files unconditionally and the `diag` file
/// only when `monitor_level >= 2` (spec's `status_monitoring >= 2` gate
/// on the source's `DIAGFILE`). Used by the `D` (dump status) control
/// verb and the periodic monitoring tick alike.
pub async fn dump_combined(engine: &Engine, base: &std::path::Path, monitor_level: u8) -> Result<(), LadcError> {
    dump_hosts(engine, &hosts_path(base)).await?;
    dump_rules(engine, &rules_path(base)).await?;
    if monitor_level >= 2 {
        dump_diagnostics(engine, &diag_path(base)).await?;
    }
    Ok(())
}

async fn write_file(path: &std::path::Path, text: &str) -> Result<(), LadcError> {
    if let Err(e) = tokio::fs::write(path, text.as_bytes()).await {
        warn!(error = %e, path = %path.display(), "could not write status file");
        return Err(LadcError::transient_io(e));
    }
    Ok(())
}
