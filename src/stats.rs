//! Event collection and windowed aggregation.
//!
//! The [`StatsCollector`] owns every event after emission: the two most
//! recent-event ring buffers plus the two 10-minute windowed aggregate maps.
//! All four structures live behind one reader/writer lock so that a snapshot
//! is internally consistent across all collector outputs. Snapshots are deep
//! copies — callers may sort and iterate without holding the lock and can
//! never alias live state.

use crate::types::{DnsQueryEvent, DnsResponseEvent, NewConnectionEvent};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Capacity of the connection and DNS query rings.
const MAX_RECORDS: usize = 1000;

// ── Ring buffer ──────────────────────────────────────────────────────────────

/// Fixed-capacity circular buffer holding the most recent pushes.
///
/// Oldest entries are overwritten silently on wrap. [`RingBuffer::snapshot`]
/// returns the occupied prefix only, oldest first, so an under-filled buffer
/// never exposes empty slots.
pub struct RingBuffer<T> {
    slots:  Vec<Option<T>>,
    cursor: usize,
    full:   bool,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            slots:  vec![None; capacity],
            cursor: 0,
            full:   false,
        }
    }

    pub fn push(&mut self, item: T) {
        self.slots[self.cursor] = Some(item);
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.cursor == 0 {
            self.full = true;
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        if self.full {
            self.slots.len()
        } else {
            self.cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The retained entries in insertion order, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        let capacity = self.slots.len();
        let size = self.len();
        (0..size)
            .filter_map(|i| {
                let idx = (self.cursor + capacity - size + i) % capacity;
                self.slots[idx].clone()
            })
            .collect()
    }

    /// Mutable iteration over occupied slots in storage order. Used by the
    /// DNS response correlation scan.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }
}

// ── Windowed aggregates ──────────────────────────────────────────────────────

/// Per source→destination pair aggregate over the sliding window.
///
/// Invariant: `total_conns` equals the sum of all `ports` counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionWindow {
    #[serde(rename = "SrcIP")]
    pub src_ip:       String,
    #[serde(rename = "DstIP")]
    pub dst_ip:       String,
    /// Destination port → connection count.
    #[serde(rename = "Ports")]
    pub ports:        HashMap<u16, u64>,
    #[serde(rename = "TotalConns")]
    pub total_conns:  u64,
    #[serde(rename = "WindowStart")]
    pub window_start: DateTime<Utc>,
    #[serde(rename = "WindowEnd")]
    pub window_end:   DateTime<Utc>,
}

impl ConnectionWindow {
    fn new(src_ip: &str, dst_ip: &str, now: DateTime<Utc>) -> Self {
        Self {
            src_ip:       src_ip.to_string(),
            dst_ip:       dst_ip.to_string(),
            ports:        HashMap::new(),
            total_conns:  0,
            window_start: now,
            window_end:   now,
        }
    }

    fn add_port(&mut self, port: u16) {
        *self.ports.entry(port).or_insert(0) += 1;
        self.total_conns += 1;
    }
}

/// Per destination ip:port aggregate over the sliding window.
///
/// Invariant: `total_conns` is at least the number of unique sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortWindow {
    #[serde(rename = "DstIP")]
    pub dst_ip:       String,
    #[serde(rename = "DstPort")]
    pub dst_port:     u16,
    #[serde(rename = "UniqueIPs")]
    pub unique_ips:   HashSet<String>,
    #[serde(rename = "TotalConns")]
    pub total_conns:  u64,
    #[serde(rename = "WindowStart")]
    pub window_start: DateTime<Utc>,
    #[serde(rename = "WindowEnd")]
    pub window_end:   DateTime<Utc>,
}

// ── Collector ────────────────────────────────────────────────────────────────

struct CollectorInner {
    connections:        RingBuffer<NewConnectionEvent>,
    dns_queries:        RingBuffer<DnsQueryEvent>,
    connection_windows: HashMap<String, ConnectionWindow>,
    port_windows:       HashMap<String, PortWindow>,
}

/// Owner of all collected events and aggregates.
pub struct StatsCollector {
    inner:  RwLock<CollectorInner>,
    window: Duration,
}

/// Shared type alias used by the manager and RPC layer.
pub type SharedCollector = Arc<StatsCollector>;

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner:  RwLock::new(CollectorInner {
                connections:        RingBuffer::new(MAX_RECORDS),
                dns_queries:        RingBuffer::new(MAX_RECORDS),
                connection_windows: HashMap::new(),
                port_windows:       HashMap::new(),
            }),
            window: Duration::minutes(10),
        }
    }

    /// Records a connection event: ring buffer plus both window upserts.
    pub fn add_connection(&self, event: NewConnectionEvent) {
        let mut inner = self.inner.write();
        let now = event.timestamp;

        let key = format!("{}->{}", event.src_ip, event.dst_ip);
        let cw = inner
            .connection_windows
            .entry(key)
            .or_insert_with(|| ConnectionWindow::new(&event.src_ip, &event.dst_ip, now));
        cw.add_port(event.dst_port);
        cw.window_end = now;

        let port_key = format!("{}:{}", event.dst_ip, event.dst_port);
        match inner.port_windows.entry(port_key) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let pw = slot.get_mut();
                pw.total_conns += 1;
                pw.unique_ips.insert(event.src_ip.clone());
                pw.window_end = now;
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(PortWindow {
                    dst_ip:       event.dst_ip.clone(),
                    dst_port:     event.dst_port,
                    unique_ips:   HashSet::from([event.src_ip.clone()]),
                    total_conns:  1,
                    window_start: now,
                    window_end:   now,
                });
            }
        }

        inner.connections.push(event);
    }

    /// Records a DNS question with an initially empty response list.
    pub fn add_dns_query(&self, event: DnsQueryEvent) {
        self.inner.write().dns_queries.push(event);
    }

    /// Correlates a DNS response with a previously recorded query.
    ///
    /// Matching is by 16-bit query id alone — the first ring entry with that
    /// id receives the answers, accepting occasional collisions under load.
    /// Responses with no matching query are dropped.
    pub fn add_dns_response(&self, response: DnsResponseEvent) {
        let mut inner = self.inner.write();
        let query = inner
            .dns_queries
            .iter_mut()
            .find(|q| q.id == response.query_id);
        if let Some(query) = query {
            query.response.extend(response.answers);
        }
    }

    /// Drops every aggregate whose window ended before `now` minus the
    /// 10-minute window. Ring buffers are untouched; they evict by
    /// overwrite.
    pub fn cleanup_old(&self, now: DateTime<Utc>) {
        let threshold = now - self.window;
        let mut inner = self.inner.write();
        inner.connection_windows.retain(|_, w| w.window_end >= threshold);
        inner.port_windows.retain(|_, w| w.window_end >= threshold);
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn new_connections(&self) -> Vec<NewConnectionEvent> {
        self.inner.read().connections.snapshot()
    }

    pub fn dns_queries(&self) -> Vec<DnsQueryEvent> {
        self.inner.read().dns_queries.snapshot()
    }

    pub fn connection_windows(&self) -> Vec<ConnectionWindow> {
        self.inner.read().connection_windows.values().cloned().collect()
    }

    pub fn port_windows(&self) -> Vec<PortWindow> {
        self.inner.read().port_windows.values().cloned().collect()
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
