//! Control-channel wire types.
//!
//! The channel carries back-to-back JSON values over a Unix stream socket:
//! one request object in, one response object out, repeated until either
//! side closes. Error strings are human-readable, not machine-parseable.

use crate::stats::{ConnectionWindow, PortWindow};
use crate::types::{DnsQueryEvent, NewConnectionEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod server;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server error: {0}")]
    Server(String),

    #[error("received empty stats from server")]
    MissingStats,
}

/// One command from a subscriber. `params` is currently unused by every
/// command but kept on the wire for forward compatibility.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params:  Option<serde_json::Value>,
}

/// One reply. Exactly one of the fields is populated: `error` on failure,
/// `stats` or `ips` on success depending on the command.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips:   Option<Vec<String>>,
}

/// Payload of `GET_STATS`. Every field is a list, never null, so renderers
/// need no nil-guards.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsPayload {
    #[serde(rename = "Connections")]
    pub connections: Vec<NewConnectionEvent>,
    #[serde(rename = "DNSQueries")]
    pub dns_queries: Vec<DnsQueryEvent>,
    #[serde(rename = "IPStats")]
    pub ip_stats:    Vec<ConnectionWindow>,
    #[serde(rename = "PortStats")]
    pub port_stats:  Vec<PortWindow>,
}
