//! Unix-socket request/reply server.
//!
//! Binds a stream socket at the configured path (unlinking any stale file
//! left by a previous run), accepts connections on a polling loop, and
//! serves each client from its own thread: read one JSON request, write one
//! JSON response, repeat. A JSON decode failure closes that connection and
//! nothing else. Live client sockets are tracked so `stop` can shut them
//! all down; the socket file itself is deliberately left in place on stop —
//! the next start unlinks it, which keeps crash restarts working.

use crate::analyzer::manager::Manager;
use crate::logger::{Event, SharedLogger};
use crate::rpc::{Request, Response, RpcError, StatsPayload};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default control-socket location.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/safepanel.sock";

pub struct StatsServer {
    manager:       Arc<Manager>,
    logger:        SharedLogger,
    clients:       Arc<Mutex<HashMap<RawFd, UnixStream>>>,
    done:          Arc<AtomicBool>,
    accept_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StatsServer {
    pub fn new(manager: Arc<Manager>, logger: SharedLogger) -> Self {
        Self {
            manager,
            logger,
            clients: Arc::new(Mutex::new(HashMap::new())),
            done: Arc::new(AtomicBool::new(false)),
            accept_handle: Mutex::new(None),
        }
    }

    /// Binds the socket and spawns the accept thread.
    ///
    /// # Errors
    /// Failure to unlink a stale socket or to bind is fatal to the daemon.
    pub fn start(&self, path: &Path) -> Result<(), RpcError> {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(RpcError::Io(e));
            }
        }

        let listener = UnixListener::bind(path)?;
        // Nonblocking accept lets the loop poll the done flag; connections
        // are switched back to blocking before they are served.
        listener.set_nonblocking(true)?;

        let manager = self.manager.clone();
        let logger = self.logger.clone();
        let clients = self.clients.clone();
        let done = self.done.clone();

        let handle = thread::spawn(move || loop {
            if done.load(Ordering::Relaxed) {
                return;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if stream.set_nonblocking(false).is_err() {
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    if let Ok(clone) = stream.try_clone() {
                        clients.lock().insert(fd, clone);
                    }

                    let manager = manager.clone();
                    let logger = logger.clone();
                    let clients = clients.clone();
                    thread::spawn(move || {
                        handle_connection(stream, &manager, &logger);
                        clients.lock().remove(&fd);
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(200));
                }
                Err(e) => {
                    logger.log(&Event::RpcError {
                        message: &format!("accept failed: {}", e),
                    });
                    thread::sleep(Duration::from_millis(200));
                }
            }
        });

        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stops accepting, closes every live client socket and joins the
    /// accept thread. The socket file is left on disk intentionally.
    pub fn stop(&self) {
        self.done.store(true, Ordering::Relaxed);

        for (_, stream) in self.clients.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Serves one client until it disconnects or sends malformed JSON.
fn handle_connection(stream: UnixStream, manager: &Manager, logger: &SharedLogger) {
    let reader = match stream.try_clone() {
        Ok(r) => r,
        Err(_) => return,
    };
    let mut de = serde_json::Deserializer::from_reader(reader);
    let mut writer = &stream;

    loop {
        let request = match Request::deserialize(&mut de) {
            Ok(request) => request,
            // EOF and decode failures both end the conversation.
            Err(_) => return,
        };

        let response = dispatch(manager, &request);

        if serde_json::to_writer(&mut writer, &response).is_err()
            || writer.write_all(b"\n").is_err()
        {
            logger.log(&Event::RpcError {
                message: "failed to write response",
            });
            return;
        }
    }
}

/// Maps one request onto a snapshot response.
fn dispatch(manager: &Manager, request: &Request) -> Response {
    match request.command.as_str() {
        "GET_STATS" => {
            let payload = StatsPayload {
                connections: manager.new_connections(),
                dns_queries: manager.dns_queries(),
                ip_stats:    manager.connection_windows(),
                port_stats:  manager.port_windows(),
            };
            match serde_json::to_value(payload) {
                Ok(stats) => Response { stats: Some(stats), ..Default::default() },
                Err(e) => Response { error: Some(e.to_string()), ..Default::default() },
            }
        }
        "GET_BLACK_STATS" => match serde_json::to_value(manager.reputation_results()) {
            Ok(stats) => Response { stats: Some(stats), ..Default::default() },
            Err(e) => Response { error: Some(e.to_string()), ..Default::default() },
        },
        "GET_BLOCKED_IPS" => Response {
            ips: Some(manager.blocked_ips()),
            ..Default::default()
        },
        other => Response {
            error: Some(format!("unknown command: {}", other)),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::checker::IpChecker;
    use crate::blocker::IpBlocker;
    use crate::ipdb::{Ipdb, Reputation};
    use crate::logger::Logger;
    use crate::rpc::client::Client;
    use crate::stats::StatsCollector;
    use crate::types::{Direction, NewConnectionEvent, Protocol, SessionStats};
    use chrono::Utc;
    use std::io::Read;
    use tempfile::tempdir;

    fn seeded_server() -> (StatsServer, Arc<Manager>, tempfile::TempDir) {
        let logger: SharedLogger = Arc::new(Logger::new(false, None).unwrap());
        let stats = SessionStats::new();

        let collector = Arc::new(StatsCollector::new());
        collector.add_connection(NewConnectionEvent {
            src_ip:    "203.0.113.9".to_string(),
            src_port:  55000,
            dst_ip:    "192.168.1.10".to_string(),
            dst_port:  22,
            protocol:  Protocol::Tcp,
            direction: Direction::Inbound,
            timestamp: Utc::now(),
        });

        let blocker = Arc::new(IpBlocker::with_backends(
            Vec::new(),
            Vec::new(),
            logger.clone(),
            stats.clone(),
        ));
        blocker
            .block("198.51.100.7", Duration::from_secs(3600), "CRITICAL Malicious")
            .unwrap();

        let mut ipdb = Ipdb::empty();
        ipdb.set("198.51.100.7", Reputation::Critical);
        let checker = Arc::new(IpChecker::new(
            Arc::new(ipdb),
            None,
            None,
            Duration::from_secs(3600),
            logger.clone(),
            stats,
        ));
        checker.check("198.51.100.7");

        let manager = Arc::new(Manager::new(collector, checker, blocker));
        let server = StatsServer::new(manager.clone(), logger);
        (server, manager, tempdir().unwrap())
    }

    #[test]
    fn get_stats_round_trips_through_the_client() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        server.start(&path).unwrap();

        let client = Client::connect(&path).unwrap();
        let stats = client.get_stats().unwrap();

        assert_eq!(stats.connections.len(), 1);
        assert_eq!(stats.connections[0].src_ip, "203.0.113.9");
        assert_eq!(stats.connections[0].dst_port, 22);
        assert_eq!(stats.connections[0].direction, Direction::Inbound);
        assert_eq!(stats.ip_stats.len(), 1);
        assert_eq!(stats.ip_stats[0].total_conns, 1);
        assert_eq!(stats.ip_stats[0].ports.get(&22), Some(&1));
        assert_eq!(stats.port_stats.len(), 1);
        assert!(stats.dns_queries.is_empty());

        server.stop();
    }

    #[test]
    fn black_stats_and_blocked_ips_round_trip() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        server.start(&path).unwrap();

        let client = Client::connect(&path).unwrap();

        let hits = client.get_black_stats().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ip, "198.51.100.7");
        assert_eq!(hits[0].reason, "CRITICAL Malicious");

        let ips = client.get_blocked_ips().unwrap();
        assert_eq!(ips, vec!["198.51.100.7".to_string()]);

        server.stop();
    }

    #[test]
    fn several_requests_share_one_connection() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        server.start(&path).unwrap();

        let client = Client::connect(&path).unwrap();
        for _ in 0..5 {
            assert_eq!(client.get_stats().unwrap().connections.len(), 1);
        }

        server.stop();
    }

    #[test]
    fn unknown_command_reports_error_and_keeps_connection_open() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        server.start(&path).unwrap();

        let mut stream = UnixStream::connect(&path).unwrap();
        stream
            .write_all(b"{\"command\":\"GET_BLOCK_LIST\"}\n")
            .unwrap();

        let mut de = serde_json::Deserializer::from_reader(stream.try_clone().unwrap());
        let response = Response::deserialize(&mut de).unwrap();
        assert_eq!(
            response.error.as_deref(),
            Some("unknown command: GET_BLOCK_LIST")
        );

        // The connection survives the unknown command.
        stream.write_all(b"{\"command\":\"GET_BLOCKED_IPS\"}\n").unwrap();
        let response = Response::deserialize(&mut de).unwrap();
        assert_eq!(response.ips, Some(vec!["198.51.100.7".to_string()]));

        server.stop();
    }

    #[test]
    fn malformed_json_closes_the_connection() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        server.start(&path).unwrap();

        let mut stream = UnixStream::connect(&path).unwrap();
        stream.write_all(b"this is not json").unwrap();

        // The server closes its end; the read drains to EOF.
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        assert!(buf.is_empty());

        server.stop();
    }

    #[test]
    fn start_unlinks_a_stale_socket_file() {
        let (server, _, dir) = seeded_server();
        let path = dir.path().join("safepanel.sock");
        fs::write(&path, b"stale").unwrap();

        server.start(&path).unwrap();
        let client = Client::connect(&path).unwrap();
        assert!(client.get_blocked_ips().is_ok());

        server.stop();
    }
}
