//! safepanel — host-resident network observation and reactive blocking.
//!
//! The daemon passively captures frames on one interface, decodes
//! IPv4/TCP/UDP/DNS, aggregates connection and DNS activity over sliding
//! windows, classifies remote addresses against a local reputation
//! database, and installs firewall rules against critical sources. Local
//! observer processes pull snapshots over a Unix-socket control channel;
//! [`rpc::client::Client`] is the subscriber side of that protocol.

pub mod analyzer;
pub mod blocker;
pub mod cli;
pub mod config;
pub mod geo;
pub mod ipdb;
pub mod logger;
pub mod rpc;
pub mod stats;
pub mod types;
