//! Reactive IP blocking.
//!
//! Maintains a deduplicated set of address→firewall-rule bindings with TTL
//! expiry. Firewall back-ends sit behind the [`FirewallBackend`] trait:
//! iptables appends/deletes `INPUT` DROP rules, nftables keeps blocked
//! addresses in a dedicated named set so that removal is symmetric with
//! insertion. A background sweep reconciles expired records every five
//! minutes; `is_blocked` also checks expiry inline so callers never see a
//! block outlive its TTL between sweeps.

use crate::config::IpBlockerConfig;
use crate::logger::{Event, SharedLogger};
use crate::types::{SessionStats, ShutdownFlag};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::process::{Command, ExitStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often the expiry sweep runs.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("command exited with {0}")]
    Failed(ExitStatus),
}

#[derive(Debug, Error)]
pub enum BlockError {
    /// The address is exempt; no firewall call was made.
    #[error("IP {0} is whitelisted")]
    Whitelisted(String),

    /// Every enabled back-end failed; no record was kept.
    #[error("all firewall back-ends failed: {0}")]
    AllBackendsFailed(String),

    /// At least one back-end succeeded, so the record was kept, but the
    /// failing back-ends are reported to the caller.
    #[error("firewall back-end errors: {0}")]
    PartialFailure(String),

    /// Rule removal failed; the record is retained for a later retry.
    #[error("failed to remove firewall rules: {0}")]
    RemoveFailed(String),
}

// ── Firewall back-ends ───────────────────────────────────────────────────────

/// One firewall implementation. `apply` installs a drop rule for the address,
/// `remove` deletes it. Implementations must be idempotence-tolerant only to
/// the extent the blocker guarantees: each address is applied at most once
/// while recorded.
pub trait FirewallBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ip: &str) -> Result<(), BackendError>;
    fn remove(&self, ip: &str) -> Result<(), BackendError>;
}

/// Runs a command to completion, mapping a non-zero exit into an error.
fn run(program: &str, args: &[&str]) -> Result<(), BackendError> {
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(BackendError::Failed(status))
    }
}

/// `iptables -A/-D INPUT -s <ip> -j DROP`.
pub struct Iptables;

impl FirewallBackend for Iptables {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn apply(&self, ip: &str) -> Result<(), BackendError> {
        run("iptables", &["-A", "INPUT", "-s", ip, "-j", "DROP"])
    }

    fn remove(&self, ip: &str) -> Result<(), BackendError> {
        run("iptables", &["-D", "INPUT", "-s", ip, "-j", "DROP"])
    }
}

/// nftables back-end keeping blocked addresses in a named set.
///
/// A plain `nft add rule ... saddr <ip> drop` has no cheap symmetric delete,
/// so instead a dedicated `table ip safepanel` holds one set `blocked` and a
/// single `saddr @blocked drop` rule; blocking and unblocking become element
/// inserts and deletes on the set.
pub struct NftSet;

impl NftSet {
    /// Creates the table, chain, set and drop rule. The chain is flushed
    /// first so restarts do not stack duplicate rules; set elements survive
    /// a chain flush, so previously blocked addresses stay blocked.
    pub fn ensure(&self) -> Result<(), BackendError> {
        run("nft", &["add", "table", "ip", "safepanel"])?;
        run(
            "nft",
            &[
                "add", "chain", "ip", "safepanel", "input",
                "{", "type", "filter", "hook", "input", "priority", "0", ";", "}",
            ],
        )?;
        run(
            "nft",
            &[
                "add", "set", "ip", "safepanel", "blocked",
                "{", "type", "ipv4_addr", ";", "}",
            ],
        )?;
        run("nft", &["flush", "chain", "ip", "safepanel", "input"])?;
        run(
            "nft",
            &[
                "add", "rule", "ip", "safepanel", "input",
                "ip", "saddr", "@blocked", "drop",
            ],
        )
    }
}

impl FirewallBackend for NftSet {
    fn name(&self) -> &'static str {
        "nftables"
    }

    fn apply(&self, ip: &str) -> Result<(), BackendError> {
        run(
            "nft",
            &["add", "element", "ip", "safepanel", "blocked", "{", ip, "}"],
        )
    }

    fn remove(&self, ip: &str) -> Result<(), BackendError> {
        run(
            "nft",
            &["delete", "element", "ip", "safepanel", "blocked", "{", ip, "}"],
        )
    }
}

// ── Block records ────────────────────────────────────────────────────────────

/// One active block. `duration` of zero means permanent.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub ip:         String,
    pub start_time: Instant,
    pub duration:   Duration,
    pub reason:     String,
}

impl BlockRecord {
    fn expired(&self, now: Instant) -> bool {
        !self.duration.is_zero() && now.duration_since(self.start_time) > self.duration
    }
}

// ── Blocker ──────────────────────────────────────────────────────────────────

/// Thread-safe block set. All mutations take the writer half of one lock;
/// `is_blocked` and `list` take the reader half.
pub struct IpBlocker {
    blocked:   RwLock<HashMap<String, BlockRecord>>,
    backends:  Vec<Box<dyn FirewallBackend>>,
    whitelist: Vec<String>,
    logger:    SharedLogger,
    stats:     Arc<SessionStats>,
}

/// Shared type alias used by the manager and RPC layer.
pub type SharedBlocker = Arc<IpBlocker>;

impl IpBlocker {
    /// Builds the blocker with the back-ends the configuration enables.
    ///
    /// An nftables setup failure is logged and the back-end kept; individual
    /// applies will keep reporting the underlying problem.
    pub fn new(cfg: &IpBlockerConfig, logger: SharedLogger, stats: Arc<SessionStats>) -> Self {
        let mut backends: Vec<Box<dyn FirewallBackend>> = Vec::new();
        if cfg.iptables {
            backends.push(Box::new(Iptables));
        }
        if cfg.nftables {
            let nft = NftSet;
            if let Err(e) = nft.ensure() {
                logger.log(&Event::Info {
                    message: &format!("nftables setup failed: {}", e),
                });
            }
            backends.push(Box::new(nft));
        }

        Self::with_backends(backends, cfg.whitelist.clone(), logger, stats)
    }

    /// Injection point used by tests and by [`IpBlocker::new`].
    pub fn with_backends(
        backends:  Vec<Box<dyn FirewallBackend>>,
        whitelist: Vec<String>,
        logger:    SharedLogger,
        stats:     Arc<SessionStats>,
    ) -> Self {
        Self {
            blocked: RwLock::new(HashMap::new()),
            backends,
            whitelist,
            logger,
            stats,
        }
    }

    /// Blocks an address for `duration` (zero = permanent).
    ///
    /// A repeated block on an already-recorded address refreshes the start
    /// time, duration and reason without touching the firewall. Otherwise
    /// every enabled back-end is applied: if all fail the block fails and no
    /// record is kept; if only some fail the record is kept and the combined
    /// error returned — availability of the block wins over rule hygiene.
    pub fn block(&self, ip: &str, duration: Duration, reason: &str) -> Result<(), BlockError> {
        if self.whitelist.iter().any(|w| w == ip) {
            return Err(BlockError::Whitelisted(ip.to_string()));
        }

        let mut blocked = self.blocked.write();

        if let Some(record) = blocked.get_mut(ip) {
            record.start_time = Instant::now();
            record.duration = duration;
            record.reason = reason.to_string();
            return Ok(());
        }

        let mut failures = Vec::new();
        let mut succeeded = 0usize;
        for backend in &self.backends {
            match backend.apply(ip) {
                Ok(()) => succeeded += 1,
                Err(e) => failures.push(format!("{}: {}", backend.name(), e)),
            }
        }

        if !self.backends.is_empty() && succeeded == 0 {
            return Err(BlockError::AllBackendsFailed(failures.join("; ")));
        }

        blocked.insert(
            ip.to_string(),
            BlockRecord {
                ip:         ip.to_string(),
                start_time: Instant::now(),
                duration,
                reason:     reason.to_string(),
            },
        );
        self.stats.blocks_applied.fetch_add(1, Ordering::Relaxed);
        self.logger.log(&Event::Blocked {
            ip,
            duration_secs: duration.as_secs(),
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BlockError::PartialFailure(failures.join("; ")))
        }
    }

    /// Removes an address from the firewall and drops its record.
    ///
    /// When a back-end refuses the removal the record is retained so the
    /// caller (or the next expiry sweep) can retry.
    pub fn unblock(&self, ip: &str) -> Result<(), BlockError> {
        let mut blocked = self.blocked.write();

        let failures = self.remove_from_backends(ip);
        if !failures.is_empty() {
            return Err(BlockError::RemoveFailed(failures.join("; ")));
        }

        blocked.remove(ip);
        self.logger.log(&Event::Unblocked { ip });
        Ok(())
    }

    /// Whether an address is currently blocked.
    ///
    /// Records past their TTL report `false` immediately; the firewall state
    /// is reconciled by the background sweep, not here.
    pub fn is_blocked(&self, ip: &str) -> bool {
        let blocked = self.blocked.read();
        match blocked.get(ip) {
            Some(record) => !record.expired(Instant::now()),
            None => false,
        }
    }

    /// Currently recorded addresses, expired or not.
    pub fn list(&self) -> Vec<String> {
        self.blocked.read().keys().cloned().collect()
    }

    /// Drops every record past its TTL, invoking the firewall removal for
    /// each. Removal failures are logged but never retain the record — the
    /// record's purpose is the TTL, and that has elapsed.
    fn sweep(&self, now: Instant) {
        let mut blocked = self.blocked.write();

        let expired: Vec<String> = blocked
            .values()
            .filter(|r| r.expired(now))
            .map(|r| r.ip.clone())
            .collect();

        for ip in expired {
            for failure in self.remove_from_backends(&ip) {
                self.logger.log(&Event::Info {
                    message: &format!("expiry removal failed: {}", failure),
                });
            }
            blocked.remove(&ip);
            self.logger.log(&Event::BlockExpired { ip: &ip });
        }
    }

    fn remove_from_backends(&self, ip: &str) -> Vec<String> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            if let Err(e) = backend.remove(ip) {
                failures.push(format!("{}: {}", backend.name(), e));
            }
        }
        failures
    }
}

// ── Expiry thread ────────────────────────────────────────────────────────────

/// Spawns the background expiry thread.
///
/// Wakes every five minutes to sweep expired records, sleeping in 1-second
/// slices so shutdown is observed promptly. A final sweep runs on exit.
pub fn spawn_expiry_thread(blocker: SharedBlocker, shutdown: ShutdownFlag) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            let mut slept = Duration::ZERO;
            while slept < EXPIRY_INTERVAL {
                if shutdown.load(Ordering::Relaxed) {
                    blocker.sweep(Instant::now());
                    return;
                }
                thread::sleep(Duration::from_secs(1));
                slept += Duration::from_secs(1);
            }

            blocker.sweep(Instant::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use parking_lot::Mutex;

    /// Test double that records every apply/remove instead of shelling out.
    #[derive(Clone, Default)]
    struct Recording {
        applied: Arc<Mutex<Vec<String>>>,
        removed: Arc<Mutex<Vec<String>>>,
        fail:    bool,
    }

    impl FirewallBackend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn apply(&self, ip: &str) -> Result<(), BackendError> {
            if self.fail {
                return Err(BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected",
                )));
            }
            self.applied.lock().push(ip.to_string());
            Ok(())
        }

        fn remove(&self, ip: &str) -> Result<(), BackendError> {
            if self.fail {
                return Err(BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected",
                )));
            }
            self.removed.lock().push(ip.to_string());
            Ok(())
        }
    }

    fn blocker_with(backend: Recording, whitelist: Vec<String>) -> IpBlocker {
        let logger = Arc::new(Logger::new(false, None).unwrap());
        IpBlocker::with_backends(
            vec![Box::new(backend)],
            whitelist,
            logger,
            SessionStats::new(),
        )
    }

    #[test]
    fn block_then_is_blocked() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), Vec::new());

        blocker.block("10.0.0.5", Duration::from_secs(3600), "test").unwrap();
        assert!(blocker.is_blocked("10.0.0.5"));
        assert_eq!(fw.applied.lock().as_slice(), ["10.0.0.5"]);
    }

    #[test]
    fn expired_block_reports_unblocked_without_explicit_unblock() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), Vec::new());

        blocker.block("10.0.0.5", Duration::from_millis(10), "test").unwrap();
        assert!(blocker.is_blocked("10.0.0.5"));

        thread::sleep(Duration::from_millis(30));
        assert!(!blocker.is_blocked("10.0.0.5"));
        // Inline expiry never touches the firewall; that is the sweep's job.
        assert!(fw.removed.lock().is_empty());
    }

    #[test]
    fn permanent_block_never_expires() {
        let fw = Recording::default();
        let blocker = blocker_with(fw, Vec::new());

        blocker.block("10.0.0.5", Duration::ZERO, "test").unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(blocker.is_blocked("10.0.0.5"));
    }

    #[test]
    fn whitelisted_address_is_refused_without_firewall_call() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), vec!["192.168.1.1".to_string()]);

        match blocker.block("192.168.1.1", Duration::from_secs(60), "test") {
            Err(BlockError::Whitelisted(ip)) => assert_eq!(ip, "192.168.1.1"),
            other => panic!("expected Whitelisted, got {:?}", other),
        }
        assert!(fw.applied.lock().is_empty());
        assert!(!blocker.is_blocked("192.168.1.1"));
    }

    #[test]
    fn repeated_block_refreshes_without_reinvoking_firewall() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), Vec::new());

        blocker.block("10.0.0.5", Duration::from_secs(3600), "first").unwrap();
        blocker.block("10.0.0.5", Duration::from_secs(7200), "second").unwrap();

        assert_eq!(fw.applied.lock().len(), 1);
        let list = blocker.list();
        assert_eq!(list, vec!["10.0.0.5".to_string()]);

        let records = blocker.blocked.read();
        let record = records.get("10.0.0.5").unwrap();
        assert_eq!(record.duration, Duration::from_secs(7200));
        assert_eq!(record.reason, "second");
    }

    #[test]
    fn all_backends_failing_keeps_no_record() {
        let fw = Recording { fail: true, ..Default::default() };
        let blocker = blocker_with(fw, Vec::new());

        assert!(matches!(
            blocker.block("10.0.0.5", Duration::from_secs(60), "test"),
            Err(BlockError::AllBackendsFailed(_))
        ));
        assert!(blocker.list().is_empty());
        assert!(!blocker.is_blocked("10.0.0.5"));
    }

    #[test]
    fn no_backends_means_record_only_blocking() {
        let logger = Arc::new(Logger::new(false, None).unwrap());
        let blocker =
            IpBlocker::with_backends(Vec::new(), Vec::new(), logger, SessionStats::new());

        blocker.block("10.0.0.5", Duration::from_secs(60), "test").unwrap();
        assert!(blocker.is_blocked("10.0.0.5"));
    }

    #[test]
    fn sweep_removes_expired_records_and_firewall_rules() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), Vec::new());

        blocker.block("10.0.0.5", Duration::from_millis(5), "test").unwrap();
        blocker.block("10.0.0.6", Duration::from_secs(3600), "test").unwrap();
        thread::sleep(Duration::from_millis(20));

        blocker.sweep(Instant::now());
        assert_eq!(blocker.list(), vec!["10.0.0.6".to_string()]);
        assert_eq!(fw.removed.lock().as_slice(), ["10.0.0.5"]);
    }

    #[test]
    fn unblock_removes_record_and_rule() {
        let fw = Recording::default();
        let blocker = blocker_with(fw.clone(), Vec::new());

        blocker.block("10.0.0.5", Duration::from_secs(3600), "test").unwrap();
        blocker.unblock("10.0.0.5").unwrap();

        assert!(!blocker.is_blocked("10.0.0.5"));
        assert!(blocker.list().is_empty());
        assert_eq!(fw.removed.lock().as_slice(), ["10.0.0.5"]);
    }
}
