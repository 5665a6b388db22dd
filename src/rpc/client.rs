//! Control-channel client.
//!
//! Used by local observer processes (the stats and blocker dashboards) to
//! pull snapshots from the daemon. One persistent connection carries one
//! request at a time under a mutex. Any read or write failure signals a
//! background worker that re-dials up to five times with linear back-off;
//! the failing call itself returns the error to the caller, who simply
//! retries on the next refresh tick.

use crate::rpc::{Request, Response, RpcError, StatsPayload};
use crate::types::IpCheckResult;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Re-dial attempts per reconnect signal.
const RECONNECT_ATTEMPTS: u64 = 5;

struct ClientInner {
    path:         PathBuf,
    conn:         Mutex<UnixStream>,
    reconnect_tx: Sender<()>,
}

pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Dials the daemon and starts the reconnect worker.
    ///
    /// # Errors
    /// Returns the dial error when the daemon is not listening.
    pub fn connect(path: &Path) -> Result<Self, RpcError> {
        let stream = UnixStream::connect(path)?;

        // Capacity 1: a second failure while a reconnect is already pending
        // has nothing new to say.
        let (reconnect_tx, reconnect_rx) = bounded(1);
        let inner = Arc::new(ClientInner {
            path: path.to_path_buf(),
            conn: Mutex::new(stream),
            reconnect_tx,
        });

        spawn_reconnect_worker(Arc::downgrade(&inner), reconnect_rx);

        Ok(Self { inner })
    }

    /// Latest connection, DNS and window snapshots.
    pub fn get_stats(&self) -> Result<StatsPayload, RpcError> {
        let response = self.request("GET_STATS")?;
        let stats = response.stats.ok_or(RpcError::MissingStats)?;
        Ok(serde_json::from_value(stats)?)
    }

    /// Recent reputation hits.
    pub fn get_black_stats(&self) -> Result<Vec<IpCheckResult>, RpcError> {
        let response = self.request("GET_BLACK_STATS")?;
        match response.stats {
            Some(stats) => Ok(serde_json::from_value(stats)?),
            None => Ok(Vec::new()),
        }
    }

    /// Addresses currently held in the block set.
    pub fn get_blocked_ips(&self) -> Result<Vec<String>, RpcError> {
        let response = self.request("GET_BLOCKED_IPS")?;
        Ok(response.ips.unwrap_or_default())
    }

    /// Sends one command and reads one response over the shared connection.
    fn request(&self, command: &str) -> Result<Response, RpcError> {
        let mut conn = self.inner.conn.lock();

        let request = Request {
            command: command.to_string(),
            params:  None,
        };

        if let Err(e) = serde_json::to_writer(&mut *conn, &request) {
            self.signal_reconnect();
            return Err(RpcError::Json(e));
        }
        if let Err(e) = conn.write_all(b"\n") {
            self.signal_reconnect();
            return Err(RpcError::Io(e));
        }

        let mut de = serde_json::Deserializer::from_reader(&mut *conn);
        let response = match Response::deserialize(&mut de) {
            Ok(response) => response,
            Err(e) => {
                self.signal_reconnect();
                return Err(RpcError::Json(e));
            }
        };

        match response.error {
            Some(message) => Err(RpcError::Server(message)),
            None => Ok(response),
        }
    }

    fn signal_reconnect(&self) {
        // Non-blocking: drop the signal when one is already queued.
        let _ = self.inner.reconnect_tx.try_send(());
    }
}

/// Drains reconnect signals, re-dialling with 1 s, 2 s, … 5 s pauses
/// between failed attempts. The worker holds only a weak reference, so
/// dropping the last [`Client`] disconnects the channel and ends the
/// thread.
fn spawn_reconnect_worker(weak: Weak<ClientInner>, signals: Receiver<()>) {
    thread::spawn(move || {
        for () in signals.iter() {
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };

            for attempt in 1..=RECONNECT_ATTEMPTS {
                match UnixStream::connect(&inner.path) {
                    Ok(stream) => {
                        *inner.conn.lock() = stream;
                        break;
                    }
                    Err(_) => thread::sleep(Duration::from_secs(attempt)),
                }
            }
        }
    });
}
