//! The `defaults` section of the config file (spec §6): numeric
//! parameters, the global ignore-list, and the ambient paths/network
//! settings every rule and the daemon's supervisor fall back to.

use std::sync::Mutex;

use serde::Deserialize;

use ladc_common::address::HostAddress;
use ladc_common::mru::MruAddressList;

/// Raw, serde-facing mirror of the `defaults` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DefaultsRaw {
    pub threshold: u32,
    pub period: u64,
    pub duration: u64,
    pub dnsbl_enabled: bool,
    pub dnsbl_duration: u64,
    pub meta_enabled: bool,
    pub meta_factor: u32,
    pub meta_max: u64,
    pub ignore_list: Vec<String>,
    pub snapshot_path: Option<String>,
    pub snapshot_interval: u64,
    pub fifo_path: Option<String>,
    pub pid_file: Option<String>,
    pub status_path: Option<String>,
    pub remote_secret: Option<String>,
    pub remote_bind: String,
    pub remote_port: u16,
    pub remote_peers: Vec<String>,
    pub remote_allow_list: Vec<String>,
    pub backup_on_restore: bool,
}

impl Default for DefaultsRaw {
    fn default() -> Self {
        DefaultsRaw {
            threshold: 1,
            period: 600,
            duration: 600,
            dnsbl_enabled: false,
            dnsbl_duration: 86400,
            meta_enabled: false,
            meta_factor: 2,
            meta_max: 86400 * 30,
            ignore_list: Vec::new(),
            snapshot_path: Some("/var/lib/ladc/ladc.state".to_string()),
            snapshot_interval: 300,
            fifo_path: Some("/var/run/ladc/ladc.fifo".to_string()),
            pid_file: Some("/var/run/ladc/ladc.pid".to_string()),
            status_path: None,
            remote_secret: None,
            remote_bind: "*".to_string(),
            remote_port: ladc_common::wire::DEFAULT_PORT,
            remote_peers: Vec::new(),
            remote_allow_list: Vec::new(),
            backup_on_restore: false,
        }
    }
}

/// Validated `defaults` section. The ignore-list and allow-list are
/// MRU-ordered (spec §4.2, §4.8) so live behind a mutex even though the
/// rest of `Config` is immutable.
#[derive(Debug)]
pub struct Defaults {
    pub threshold: u32,
    pub period: u64,
    pub duration: u64,
    pub dnsbl_enabled: bool,
    pub dnsbl_duration: u64,
    pub meta_enabled: bool,
    pub meta_factor: u32,
    pub meta_max: u64,
    pub ignore_list: Mutex<MruAddressList>,
    pub snapshot_path: Option<String>,
    pub snapshot_interval: u64,
    pub fifo_path: Option<String>,
    pub pid_file: Option<String>,
    pub status_path: Option<String>,
    pub remote_secret: Option<String>,
    pub remote_bind: String,
    pub remote_port: u16,
    pub remote_peers: Vec<String>,
    pub remote_allow_list: Mutex<MruAddressList>,
    pub backup_on_restore: bool,
}

impl Defaults {
    pub fn from_raw(raw: DefaultsRaw) -> Result<Self, ladc_common::LadcError> {
        let ignore_list = parse_address_list(&raw.ignore_list)?;
        let remote_allow_list = parse_address_list(&raw.remote_allow_list)?;
        if raw.threshold == 0 {
            return Err(ladc_common::LadcError::config("defaults.threshold must be >= 1"));
        }
        if raw.meta_factor < 1 {
            return Err(ladc_common::LadcError::config("defaults.meta_factor must be >= 1"));
        }
        Ok(Defaults {
            threshold: raw.threshold,
            period: raw.period,
            duration: raw.duration,
            dnsbl_enabled: raw.dnsbl_enabled,
            dnsbl_duration: raw.dnsbl_duration,
            meta_enabled: raw.meta_enabled,
            meta_factor: raw.meta_factor,
            meta_max: raw.meta_max,
            ignore_list: Mutex::new(ignore_list),
            snapshot_path: raw.snapshot_path,
            snapshot_interval: raw.snapshot_interval,
            fifo_path: raw.fifo_path,
            pid_file: raw.pid_file,
            status_path: raw.status_path,
            remote_secret: raw.remote_secret,
            remote_bind: raw.remote_bind,
            remote_port: raw.remote_port,
            remote_peers: raw.remote_peers,
            remote_allow_list: Mutex::new(remote_allow_list),
            backup_on_restore: raw.backup_on_restore,
        })
    }
}

fn parse_address_list(entries: &[String]) -> Result<MruAddressList, ladc_common::LadcError> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let addr = HostAddress::parse(entry)
            .map_err(|e| ladc_common::LadcError::config(format!("invalid address \"{entry}\": {e}")))?;
        parsed.push(addr);
    }
    Ok(MruAddressList::from_vec(parsed))
}
