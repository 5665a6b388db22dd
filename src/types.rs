//! Core data structures shared across the daemon.
//!
//! Defines the typed events the decoder emits, the reputation check
//! result carried over the control channel, and the session-wide atomic
//! counters. Wire-facing structs keep the field spelling of the original
//! wire format (`SrcIP`, `DstPort`, …) so existing dashboard clients can
//! decode snapshots unchanged.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Shared shutdown flag used to signal graceful termination across all threads.
///
/// When set to `true`, every long-running thread exits at its next wake-up.
pub type ShutdownFlag = Arc<AtomicBool>;

// ── Connection direction ─────────────────────────────────────────────────────

/// Direction of a new connection relative to the local host.
///
/// `Inbound` when the IPv4 destination matches an address bound to an up,
/// non-loopback local interface; `Outbound` otherwise. Serialised as `0` /
/// `1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match self {
            Direction::Inbound => 0,
            Direction::Outbound => 1,
        })
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Direction::Inbound),
            1 => Ok(Direction::Outbound),
            other => Err(D::Error::custom(format!("invalid direction: {}", other))),
        }
    }
}

// ── Transport protocol ───────────────────────────────────────────────────────

/// Transport protocol of an observed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

// ── Decoded events ───────────────────────────────────────────────────────────

/// A connection-initiation attempt: one TCP segment with SYN set and ACK
/// clear. Emitted exactly once per such segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConnectionEvent {
    #[serde(rename = "SrcIP")]
    pub src_ip:    String,
    #[serde(rename = "SrcPort")]
    pub src_port:  u16,
    #[serde(rename = "DstIP")]
    pub dst_ip:    String,
    #[serde(rename = "DstPort")]
    pub dst_port:  u16,
    #[serde(rename = "Protocol")]
    pub protocol:  Protocol,
    #[serde(rename = "Direction")]
    pub direction: Direction,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl NewConnectionEvent {
    /// The address of the non-local peer: the destination for outbound
    /// connections, the source for inbound ones.
    pub fn remote_ip(&self) -> &str {
        match self.direction {
            Direction::Outbound => &self.dst_ip,
            Direction::Inbound => &self.src_ip,
        }
    }
}

/// One DNS question observed in a query packet (QR=0). `response` starts
/// empty and is filled in by response correlation in the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsQueryEvent {
    #[serde(rename = "ID")]
    pub id:         u16,
    #[serde(rename = "Domain")]
    pub domain:     String,
    #[serde(rename = "SrcIP")]
    pub src_ip:     String,
    #[serde(rename = "Response")]
    pub response:   Vec<String>,
    #[serde(rename = "DNSServer")]
    pub dns_server: String,
    #[serde(rename = "QueryType")]
    pub query_type: String,
    #[serde(rename = "Timestamp")]
    pub timestamp:  DateTime<Utc>,
}

/// The answer section of a DNS response packet (QR=1). Only emitted when at
/// least one answer was decoded. Never leaves the daemon; it is folded into
/// the matching [`DnsQueryEvent`] by the collector.
#[derive(Debug, Clone)]
pub struct DnsResponseEvent {
    pub query_id:  u16,
    pub answers:   Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything the capture thread can hand to the dispatcher.
#[derive(Debug, Clone)]
pub enum CapturedEvent {
    NewConnection(NewConnectionEvent),
    DnsQuery(DnsQueryEvent),
    DnsResponse(DnsResponseEvent),
}

// ── Reputation check results ─────────────────────────────────────────────────

/// Outcome of a reputation probe against a remote address, recorded whenever
/// the database returns a non-unknown class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpCheckResult {
    #[serde(rename = "IP")]
    pub ip:         String,
    #[serde(rename = "IsBlocked")]
    pub is_blocked: bool,
    #[serde(rename = "Reason")]
    pub reason:     String,
    #[serde(rename = "Country")]
    pub country:    String,
    #[serde(rename = "Time")]
    pub timestamp:  DateTime<Utc>,
}

// ── Session statistics ───────────────────────────────────────────────────────

/// Atomically-updated counters accumulated over the daemon's lifetime.
///
/// Feeds the summary event emitted on graceful shutdown. All fields are
/// `AtomicU64` so the hot path never takes a lock for bookkeeping.
pub struct SessionStats {
    /// Raw packets handed to the decoder.
    pub packets_total:    AtomicU64,
    /// SYN-only segments classified into connection events.
    pub connections_seen: AtomicU64,
    /// DNS questions decoded.
    pub dns_queries_seen: AtomicU64,
    /// Reputation probes that returned a non-unknown class.
    pub reputation_hits:  AtomicU64,
    /// Block records created.
    pub blocks_applied:   AtomicU64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            packets_total:    AtomicU64::new(0),
            connections_seen: AtomicU64::new(0),
            dns_queries_seen: AtomicU64::new(0),
            reputation_hits:  AtomicU64::new(0),
            blocks_applied:   AtomicU64::new(0),
        })
    }
}

/// Shared type alias for the session statistics.
pub type SharedStats = Arc<SessionStats>;
