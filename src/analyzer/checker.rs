//! Reputation probing of remote addresses.
//!
//! The dispatcher forks one short-lived probe thread per new connection, so
//! a lookup (and any geolocation or firewall work behind it) can never hold
//! up the next event, and no connection goes unchecked. A non-unknown class
//! is recorded to a bounded ring with a severity tag and the resolved
//! country; a critical class additionally asks the blocker to install a
//! firewall rule.

use crate::blocker::SharedBlocker;
use crate::geo::GeoDb;
use crate::ipdb::{Ipdb, Reputation};
use crate::logger::{Event, SharedLogger};
use crate::stats::RingBuffer;
use crate::types::{IpCheckResult, SharedStats};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Capacity of the reputation result ring.
const MAX_RESULTS: usize = 100;

pub struct IpChecker {
    ipdb:           Arc<Ipdb>,
    geo:            Option<GeoDb>,
    blocker:        Option<SharedBlocker>,
    block_duration: Duration,
    results:        RwLock<RingBuffer<IpCheckResult>>,
    logger:         SharedLogger,
    stats:          SharedStats,
}

/// Shared type alias used by the manager and RPC layer.
pub type SharedChecker = Arc<IpChecker>;

impl IpChecker {
    /// # Arguments
    ///
    /// * `geo` - Country resolver; `None` leaves countries empty.
    /// * `blocker` - Target for critical verdicts; `None` records only.
    /// * `block_duration` - TTL applied to reputation-triggered blocks.
    pub fn new(
        ipdb:           Arc<Ipdb>,
        geo:            Option<GeoDb>,
        blocker:        Option<SharedBlocker>,
        block_duration: Duration,
        logger:         SharedLogger,
        stats:          SharedStats,
    ) -> Self {
        Self {
            ipdb,
            geo,
            blocker,
            block_duration,
            results: RwLock::new(RingBuffer::new(MAX_RESULTS)),
            logger,
            stats,
        }
    }

    /// Looks up one address and records the outcome when it is malicious.
    ///
    /// Geolocation failures degrade to an empty country. A critical class
    /// triggers a block with the configured TTL; whitelist refusals and
    /// back-end failures leave `is_blocked` false and the hit recorded.
    pub fn check(&self, ip: &str) {
        let class = self.ipdb.get(ip);
        let reason = match class {
            Reputation::Unknown => return,
            Reputation::Low => "LIGHT Malicious",
            Reputation::Medium => "MEDIUM Malicious",
            Reputation::Critical => "CRITICAL Malicious",
        };

        let country = self
            .geo
            .as_ref()
            .and_then(|geo| geo.country(ip))
            .unwrap_or_default();

        let is_blocked = class == Reputation::Critical
            && self
                .blocker
                .as_ref()
                .map(|b| b.block(ip, self.block_duration, reason).is_ok())
                .unwrap_or(false);

        self.results.write().push(IpCheckResult {
            ip: ip.to_string(),
            is_blocked,
            reason: reason.to_string(),
            country: country.clone(),
            timestamp: Utc::now(),
        });

        self.stats.reputation_hits.fetch_add(1, Ordering::Relaxed);
        self.logger.log(&Event::ReputationHit {
            ip,
            reason,
            country: &country,
        });
    }

    /// Recorded hits, oldest first. Deep copies, like every snapshot.
    pub fn results(&self) -> Vec<IpCheckResult> {
        self.results.read().snapshot()
    }
}
