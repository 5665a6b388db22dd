//! Analyzer wiring.
//!
//! The manager connects the capture output to the collector and the
//! reputation path, owns the periodic window eviction, and is the single
//! facade the control channel reads snapshots through.

use crate::analyzer::checker::SharedChecker;
use crate::blocker::SharedBlocker;
use crate::stats::{ConnectionWindow, PortWindow, SharedCollector};
use crate::types::{
    CapturedEvent, DnsQueryEvent, IpCheckResult, NewConnectionEvent, SharedStats, ShutdownFlag,
};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// How often the collector's window eviction runs.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct Manager {
    collector: SharedCollector,
    checker:   SharedChecker,
    blocker:   SharedBlocker,
    handles:   Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Manager {
    pub fn new(collector: SharedCollector, checker: SharedChecker, blocker: SharedBlocker) -> Self {
        Self {
            collector,
            checker,
            blocker,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the dispatch and eviction threads.
    ///
    /// The dispatch thread drains decoded events: connections go to the
    /// collector, and each one's remote address is probed on a detached
    /// thread of its own, so a slow lookup can never hold back the event
    /// stream and no connection goes unchecked. DNS events go to the
    /// collector. The eviction thread ticks every minute, sleeping in
    /// 1-second slices so shutdown is observed promptly.
    pub fn start(&self, events: Receiver<CapturedEvent>, shutdown: ShutdownFlag, stats: SharedStats) {
        let collector = self.collector.clone();
        let checker = self.checker.clone();
        let dispatch_shutdown = shutdown.clone();
        let dispatch_handle = thread::spawn(move || loop {
            if dispatch_shutdown.load(Ordering::Relaxed) {
                return;
            }
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(CapturedEvent::NewConnection(event)) => {
                    stats.connections_seen.fetch_add(1, Ordering::Relaxed);
                    let remote = event.remote_ip().to_string();
                    collector.add_connection(event);

                    // One ephemeral probe thread per connection; it outlives
                    // dispatch only as long as the lookup takes and is never
                    // joined.
                    let checker = checker.clone();
                    thread::spawn(move || checker.check(&remote));
                }
                Ok(CapturedEvent::DnsQuery(query)) => {
                    stats.dns_queries_seen.fetch_add(1, Ordering::Relaxed);
                    collector.add_dns_query(query);
                }
                Ok(CapturedEvent::DnsResponse(response)) => {
                    collector.add_dns_response(response);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });

        let collector = self.collector.clone();
        let eviction_handle = thread::spawn(move || loop {
            let mut slept = Duration::ZERO;
            while slept < EVICTION_INTERVAL {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(Duration::from_secs(1));
                slept += Duration::from_secs(1);
            }
            collector.cleanup_old(Utc::now());
        });

        let mut handles = self.handles.lock();
        handles.push(dispatch_handle);
        handles.push(eviction_handle);
    }

    /// Joins the dispatch and eviction threads. Callers set the shutdown
    /// flag first. Probe threads are detached and finish on their own.
    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────────────

    pub fn new_connections(&self) -> Vec<NewConnectionEvent> {
        self.collector.new_connections()
    }

    pub fn dns_queries(&self) -> Vec<DnsQueryEvent> {
        self.collector.dns_queries()
    }

    pub fn connection_windows(&self) -> Vec<ConnectionWindow> {
        self.collector.connection_windows()
    }

    pub fn port_windows(&self) -> Vec<PortWindow> {
        self.collector.port_windows()
    }

    pub fn reputation_results(&self) -> Vec<IpCheckResult> {
        self.checker.results()
    }

    pub fn blocked_ips(&self) -> Vec<String> {
        self.blocker.list()
    }
}
