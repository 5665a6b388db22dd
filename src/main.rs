use clap::Parser;
use crossbeam_channel::bounded;

use safepanel::analyzer::capture;
use safepanel::analyzer::checker::IpChecker;
use safepanel::analyzer::manager::Manager;
use safepanel::blocker::{spawn_expiry_thread, IpBlocker};
use safepanel::cli::Cli;
use safepanel::config::Config;
use safepanel::geo::GeoDb;
use safepanel::ipdb::Ipdb;
use safepanel::logger::{Event, Logger, SharedLogger};
use safepanel::rpc::server::StatsServer;
use safepanel::stats::StatsCollector;
use safepanel::types::{SessionStats, ShutdownFlag};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Capacity of the channel between the capture thread and the dispatcher.
/// A full channel backpressures the capture loop rather than growing
/// without bound.
const EVENT_QUEUE: usize = 1024;

fn main() {
    let cli = Cli::parse();

    let logger: SharedLogger = Arc::new(
        Logger::new(cli.json, cli.log_file.as_deref()).expect("Failed to open log file"),
    );

    if let Err(e) = run(cli, Arc::clone(&logger)) {
        logger.log(&Event::Info {
            message: &format!("fatal: {}", e),
        });
        std::process::exit(1);
    }
}

fn run(cli: Cli, logger: SharedLogger) -> Result<(), Box<dyn std::error::Error>> {
    let session_start = Instant::now();

    let mut config = Config::load(cli.config.as_deref().map(Path::new))?;
    if let Some(iface) = &cli.interface {
        config.analyzer.network.ip.interface = iface.clone();
    }

    // Shared shutdown flag, set by INT/TERM and polled by every thread.
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            println!("\n[!] Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    let stats = SessionStats::new();

    if config.profiling.enabled {
        logger.log(&Event::Info {
            message: &format!(
                "profiling requested on port {}; no in-process profiler to attach",
                config.profiling.port
            ),
        });
    }

    // ── Blocker ──────────────────────────────────────────────────────────────

    let blocker = Arc::new(IpBlocker::new(
        &config.blocker.ip,
        Arc::clone(&logger),
        Arc::clone(&stats),
    ));

    let mut handles = Vec::new();
    if config.blocker.ip.enabled {
        handles.push(spawn_expiry_thread(Arc::clone(&blocker), Arc::clone(&shutdown)));
    }

    // ── Reputation pipeline ──────────────────────────────────────────────────
    // An empty ipdb_path disables the pipeline: an all-zero database answers
    // Unknown for every address and nothing is ever recorded.

    let ipdb = if config.checker.ipdb_path.is_empty() {
        logger.log(&Event::Info {
            message: "no reputation database configured; checks disabled",
        });
        Ipdb::empty()
    } else {
        let db = Ipdb::open(Path::new(&config.checker.ipdb_path))?;
        logger.log(&Event::Info {
            message: &format!("reputation database loaded from {}", config.checker.ipdb_path),
        });
        db
    };

    let geo = if config.checker.mmdb_path.is_empty() {
        None
    } else {
        Some(GeoDb::open(Path::new(&config.checker.mmdb_path))?)
    };

    let checker_blocker = config.blocker.ip.enabled.then(|| Arc::clone(&blocker));
    let checker = Arc::new(IpChecker::new(
        Arc::new(ipdb),
        geo,
        checker_blocker,
        Duration::from_secs(config.blocker.ip.default_duration),
        Arc::clone(&logger),
        Arc::clone(&stats),
    ));

    // ── Analyzer ─────────────────────────────────────────────────────────────

    let collector = Arc::new(StatsCollector::new());
    let manager = Arc::new(Manager::new(collector, checker, Arc::clone(&blocker)));

    if config.analyzer.network.ip.enabled {
        let local_ips = capture::local_ipv4_addrs();
        logger.log(&Event::Info {
            message: &format!(
                "local addresses: {}",
                local_ips
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });

        let (events_tx, events_rx) = bounded(EVENT_QUEUE);
        handles.push(capture::start(
            &config.analyzer.network.ip,
            config.analyzer.network.dns.clone(),
            local_ips,
            events_tx,
            Arc::clone(&shutdown),
            Arc::clone(&logger),
            Arc::clone(&stats),
        )?);
        manager.start(events_rx, Arc::clone(&shutdown), Arc::clone(&stats));
    }

    // ── Control channel ──────────────────────────────────────────────────────

    let server = StatsServer::new(Arc::clone(&manager), Arc::clone(&logger));
    server.start(Path::new(&cli.socket))?;
    logger.log(&Event::Info {
        message: &format!("control channel listening on {}", cli.socket),
    });

    // ── Run until signalled ──────────────────────────────────────────────────

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    server.stop();
    manager.stop();
    for handle in handles {
        let _ = handle.join();
    }

    logger.log(&Event::SessionSummary {
        duration_secs:    session_start.elapsed().as_secs(),
        packets_total:    stats.packets_total.load(Ordering::Relaxed),
        connections_seen: stats.connections_seen.load(Ordering::Relaxed),
        dns_queries_seen: stats.dns_queries_seen.load(Ordering::Relaxed),
        reputation_hits:  stats.reputation_hits.load(Ordering::Relaxed),
        blocks_applied:   stats.blocks_applied.load(Ordering::Relaxed),
    });

    Ok(())
}
