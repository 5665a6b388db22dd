use clap::Parser;

use crate::rpc::server::DEFAULT_SOCKET_PATH;

/// safepanel — host-resident network observation and reactive blocking daemon.
///
/// Passively captures traffic on the configured interface, aggregates
/// connection and DNS activity over sliding windows, checks remote addresses
/// against a local reputation database, and blocks reputationally-bad
/// sources through the system firewall. Observers subscribe over a Unix
/// socket to render the collected snapshots.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "safepanel",
    version = "0.1.0",
    about   = "Network observation and reactive blocking daemon",
    long_about = None,
)]
pub struct Cli {
    // ── Configuration ────────────────────────────────────────────────────────

    /// Path to the YAML configuration file.
    ///
    /// If omitted, the daemon probes ./configs/config.yaml,
    /// /etc/safepanel/config.yaml and /usr/local/etc/safepanel/config.yaml
    /// in that order.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<String>,

    /// Capture interface, overriding the configuration file.
    ///
    /// Use `ip link` or `ifconfig` to list available interfaces.
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    // ── Control channel ──────────────────────────────────────────────────────

    /// Filesystem path of the Unix control socket.
    ///
    /// A stale socket file left by a previous run is removed on startup.
    #[arg(short = 's', long = "socket", value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: String,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    ///
    /// The file is created if it does not exist and appended to if it does.
    /// JSON mode (--json) affects the format written to this file as well.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    ///
    /// Each event is a self-contained JSON object on its own line, suitable
    /// for ingestion by log shippers or SIEM platforms.
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}
