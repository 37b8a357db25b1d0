//! `ladc`: command-line control client (spec §6 "CLI").
//!
//! Subcommands map 1:1 to the fourteen control/sync verbs of §4.6, plus
//! three local-only readouts (`hosts`, `rules`, `diagnostics`) that cat
//! the status files the daemon's monitor maintains. With `--host`, the
//! message is encrypted and sent over UDP to the daemon's peer socket;
//! without it, the rendered line is written to the local control FIFO.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;
use tracing_subscriber::EnvFilter;

use ladc_common::wire::{NONCE_LEN, SALT_LEN};
use ladc_net::{parse_peer, Message, Verb};

#[derive(Parser, Debug)]
#[command(name = "ladc", version, about = "Control client for ladcd")]
struct Cli {
    /// Path to the YAML configuration file, used to find the local fifo
    /// path, status path and the remote secret/port.
    #[arg(short, long, default_value = "/etc/ladc/ladc.yaml")]
    config: PathBuf,

    /// Send the command encrypted to this daemon instead of the local
    /// control fifo (host or host:port).
    #[arg(short = 'H', long = "host")]
    host: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ban an address under a rule (verb `+`).
    Add {
        address: String,
        rule: String,
        /// Unix timestamp the ban expires at, or "inf" for never.
        end_time: Option<String>,
        factor: Option<i64>,
    },
    /// Remove an active ban immediately (verb `-`).
    Del { address: String },
    /// Flush the entire end-queue, running every end action (verb `F`).
    Flush,
    /// Reload the configuration file (verb `R`).
    Reload,
    /// Request a graceful shutdown (verb `S`).
    Shutdown,
    /// Write a snapshot of the end-queue to the configured path (verb `>`).
    DumpState,
    /// Set the daemon's log verbosity, 0-9 (verb `L`).
    SetLogLevel { level: u8 },
    /// Reset every rule/pattern counter to zero (verb `0`).
    ResetCounters,
    /// Start a bulk sync of the end-queue to a destination (verb `X`).
    Sync { dest: Option<String> },
    /// Cancel a running bulk sync (verb `x`).
    StopSync,
    /// Write the hosts/rules/diagnostics status files now (verb `D`).
    DumpStatus,
    /// Enable a rule (verb `Y`).
    EnableRule { name: String },
    /// Disable a rule (verb `N`).
    DisableRule { name: String },
    /// Set the monitoring level, 0-2 (verb `M`).
    MonitoringLevel { level: u8 },
    /// Print the current live-hosts status file.
    Hosts,
    /// Print the current per-rule counters status file.
    Rules,
    /// Print the diagnostics status file.
    Diagnostics,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("ladc: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match &cli.cmd {
        Command::Hosts => return cat_status_file(&cli, ladc_core::status::hosts_path),
        Command::Rules => return cat_status_file(&cli, ladc_core::status::rules_path),
        Command::Diagnostics => return cat_status_file(&cli, ladc_core::status::diag_path),
        _ => {}
    }

    let msg = build_message(&cli.cmd)?;

    match &cli.host {
        Some(host) => send_remote(&cli.config, host, &msg),
        None => send_local(&cli.config, &msg),
    }
}

fn build_message(cmd: &Command) -> Result<Message> {
    Ok(match cmd {
        Command::Add { address, rule, end_time, factor } => {
            let mut payload = format!("{address},{rule}");
            if let Some(end_time) = end_time {
                payload.push(',');
                payload.push_str(end_time);
                if let Some(factor) = factor {
                    payload.push(',');
                    payload.push_str(&factor.to_string());
                }
            }
            Message::new(Verb::Add, payload)
        }
        Command::Del { address } => Message::new(Verb::Del, address),
        Command::Flush => Message::new(Verb::Flush, ""),
        Command::Reload => Message::new(Verb::Reload, ""),
        Command::Shutdown => Message::new(Verb::Shutdown, ""),
        Command::DumpState => Message::new(Verb::DumpState, ""),
        Command::SetLogLevel { level } => Message::new(Verb::SetLogLevel, level.to_string()),
        Command::ResetCounters => Message::new(Verb::ResetCounters, ""),
        Command::Sync { dest } => Message::new(Verb::Sync, dest.clone().unwrap_or_default()),
        Command::StopSync => Message::new(Verb::StopSync, ""),
        Command::DumpStatus => Message::new(Verb::DumpStatus, ""),
        Command::EnableRule { name } => Message::new(Verb::EnableRule, name),
        Command::DisableRule { name } => Message::new(Verb::DisableRule, name),
        Command::MonitoringLevel { level } => Message::new(Verb::MonitoringLevel, level.to_string()),
        Command::Hosts | Command::Rules | Command::Diagnostics => unreachable!("handled before build_message"),
    })
}

fn cat_status_file(cli: &Cli, path_for: fn(&std::path::Path) -> PathBuf) -> Result<()> {
    let config = ladc_config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let base = config.defaults.status_path.as_deref().context("no status_path configured")?;
    let path = path_for(std::path::Path::new(base));
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    print!("{text}");
    Ok(())
}

fn send_local(config_path: &std::path::Path, msg: &Message) -> Result<()> {
    let config = ladc_config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?;
    let fifo_path = config.defaults.fifo_path.as_deref().context("no fifo_path configured")?;
    tracing::debug!(verb = ?msg.verb, fifo = %fifo_path, "writing control message to local fifo");
    let mut fifo = std::fs::OpenOptions::new()
        .write(true)
        .open(fifo_path)
        .with_context(|| format!("opening control fifo {fifo_path}"))?;
    writeln!(fifo, "{}", msg.render_line()).context("writing to control fifo")?;
    Ok(())
}

fn send_remote(config_path: &std::path::Path, host: &str, msg: &Message) -> Result<()> {
    let config = ladc_config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?;
    let secret = config.defaults.remote_secret.as_deref().context("no remote_secret configured")?;
    let dest = parse_peer(host, config.defaults.remote_port).context("invalid --host")?;
    tracing::debug!(verb = ?msg.verb, %dest, "sending encrypted control message");

    let plaintext = msg.encode_frame().context("encoding message frame")?;

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);
    let key = ladc_crypto::derive_key(secret, &salt).context("deriving key")?;
    let frame = ladc_crypto::encrypt_frame(&plaintext, &key, &salt, &nonce).context("encrypting frame")?;

    let bind_addr = match dest.ip() {
        std::net::IpAddr::V4(_) => "0.0.0.0:0",
        std::net::IpAddr::V6(_) => "[::]:0",
    };
    let socket = std::net::UdpSocket::bind(bind_addr).context("binding client socket")?;
    socket.send_to(&frame, dest).with_context(|| format!("sending to {dest}"))?;
    Ok(())
}
