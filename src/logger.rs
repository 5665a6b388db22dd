//! Event logging.
//!
//! One [`Logger`] is built at startup and handed around as an `Arc`; every
//! subsystem reports through the same tagged [`Event`] enum. Output goes to
//! stdout as timestamped text lines, or as one JSON object per line when
//! `--json` is set, with an optional append-mode file receiving the same
//! stream.

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

// ── Event types ──────────────────────────────────────────────────────────────

/// Everything the daemon reports.
///
/// The `tag = "event"` attribute keeps an `"event"` discriminator in the
/// JSON form, so downstream filters can match on it without probing the
/// object's shape.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// The reputation database classified a remote address as malicious.
    ReputationHit {
        ip:      &'a str,
        reason:  &'a str,
        country: &'a str,
    },

    /// An address was added to the active block set.
    Blocked { ip: &'a str, duration_secs: u64 },

    /// An address was explicitly removed from the block set.
    Unblocked { ip: &'a str },

    /// A block's TTL elapsed and the expiry sweep removed it.
    BlockExpired { ip: &'a str },

    /// A control-channel connection failed mid-request.
    RpcError { message: &'a str },

    /// Session summary emitted on graceful shutdown.
    SessionSummary {
        duration_secs:    u64,
        packets_total:    u64,
        connections_seen: u64,
        dns_queries_seen: u64,
        reputation_hits:  u64,
        blocks_applied:   u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Writes [`Event`]s to stdout and, when configured, to a log file.
///
/// The file writer sits behind a `Mutex` so concurrent threads cannot
/// interleave partial lines.
pub struct Logger {
    /// NDJSON output when `true`, plain text otherwise.
    json: bool,
    /// `None` when `--log-file` was not given.
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

/// The logger handle every thread holds.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Opens the optional log file and builds the logger.
    ///
    /// # Errors
    /// Fails only when `log_path` is given and the file cannot be created
    /// or opened for append.
    pub fn new(json: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, file })
    }

    /// Emits one event to every configured sink.
    ///
    /// Text mode renders `[timestamp] [TAG] …`; JSON mode splices a
    /// `"timestamp"` field into the event object and prints it on one
    /// line. File-write failures are swallowed; stdout is the primary
    /// sink.
    pub fn log(&self, event: &Event) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let line = if self.json {
            // Round-trip through a Value so the timestamp can be spliced in.
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(timestamp.clone()),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, self.plain_text(event))
        };

        println!("{}", line);

        if let Some(mutex) = &self.file {
            let mut writer = mutex.lock();
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }

    /// Human-readable rendering, without the timestamp prefix.
    fn plain_text(&self, event: &Event) -> String {
        match event {
            Event::Info { message } =>
                format!("[INFO] {}", message),

            Event::ReputationHit { ip, reason, country } =>
                format!("[REPUTATION] {} | {} | {}", ip, reason, country),

            Event::Blocked { ip, duration_secs } =>
                format!("[BLOCK] {} for {}s", ip, duration_secs),

            Event::Unblocked { ip } =>
                format!("[UNBLOCK] {}", ip),

            Event::BlockExpired { ip } =>
                format!("[BLOCK EXPIRED] {}", ip),

            Event::RpcError { message } =>
                format!("[RPC] {}", message),

            Event::SessionSummary {
                duration_secs,
                packets_total,
                connections_seen,
                dns_queries_seen,
                reputation_hits,
                blocks_applied,
            } => format!(
                "[SUMMARY] duration={}s packets={} connections={} dns={} hits={} blocks={}",
                duration_secs,
                packets_total,
                connections_seen,
                dns_queries_seen,
                reputation_hits,
                blocks_applied
            ),
        }
    }
}
