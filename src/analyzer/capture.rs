//! Packet capture, decode and classification.
//!
//! Opens the configured interface for raw L2 capture and turns frames into
//! typed events: SYN-only TCP segments become connection events with an
//! inbound/outbound direction, UDP traffic on the DNS port becomes query and
//! response events. Everything else is dropped on the spot. Decoded events
//! are handed to the dispatcher over a bounded channel so backpressure is
//! explicit and the pcap read loop stays free of downstream work.

use crate::analyzer::dns;
use crate::config::{DnsAnalyzerConfig, IpAnalyzerConfig};
use crate::logger::{Event, SharedLogger};
use crate::types::{
    CapturedEvent, Direction, DnsQueryEvent, DnsResponseEvent, NewConnectionEvent, Protocol,
    SharedStats, ShutdownFlag,
};
use chrono::Utc;
use crossbeam_channel::Sender;
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pnet::datalink;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture interface configured")]
    NoInterface,

    #[error("cannot open interface '{iface}': {source}")]
    Open {
        iface:  String,
        source: pcap::Error,
    },
}

// ── Local address discovery ──────────────────────────────────────────────────

/// IPv4 addresses bound to up, non-loopback interfaces.
///
/// Cached once at startup; the decoder compares each packet's destination
/// against this list to attribute direction.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .filter_map(|net| match net.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            _ => None,
        })
        .collect()
}

// ── Classification ───────────────────────────────────────────────────────────

/// Decodes one Ethernet frame and appends any resulting events to `out`.
///
/// Classification rules:
/// 1. Frames without an IPv4 layer are dropped.
/// 2. A TCP segment with SYN set and ACK clear becomes a
///    [`NewConnectionEvent`]; direction is `Inbound` iff the destination
///    matches a local address.
/// 3. A UDP datagram with source or destination on the DNS port is parsed as
///    DNS: each question of a query becomes a [`DnsQueryEvent`], a response
///    with a non-empty answer section becomes one [`DnsResponseEvent`].
///
/// Malformed packets are dropped silently; per-packet errors never surface.
pub fn classify(
    data:      &[u8],
    local_ips: &[Ipv4Addr],
    dns_cfg:   &DnsAnalyzerConfig,
    out:       &mut Vec<CapturedEvent>,
) {
    let sliced = match SlicedPacket::from_ethernet(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    let (src, dst) = match sliced.ip {
        Some(InternetSlice::Ipv4(header, _)) => (header.source_addr(), header.destination_addr()),
        _ => return,
    };

    match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            if tcp.syn() && !tcp.ack() {
                let direction = if local_ips.contains(&dst) {
                    Direction::Inbound
                } else {
                    Direction::Outbound
                };

                out.push(CapturedEvent::NewConnection(NewConnectionEvent {
                    src_ip:    src.to_string(),
                    src_port:  tcp.source_port(),
                    dst_ip:    dst.to_string(),
                    dst_port:  tcp.destination_port(),
                    protocol:  Protocol::Tcp,
                    direction,
                    timestamp: Utc::now(),
                }));
            }
        }
        Some(TransportSlice::Udp(udp)) => {
            if !dns_cfg.enabled {
                return;
            }
            if udp.source_port() != dns_cfg.port && udp.destination_port() != dns_cfg.port {
                return;
            }

            let msg = match dns::parse_message(sliced.payload) {
                Some(m) => m,
                None => return,
            };

            if !msg.is_response {
                for question in msg.questions {
                    out.push(CapturedEvent::DnsQuery(DnsQueryEvent {
                        id:         msg.id,
                        domain:     question.name,
                        src_ip:     src.to_string(),
                        response:   Vec::new(),
                        dns_server: dst.to_string(),
                        query_type: dns::type_name(question.qtype),
                        timestamp:  Utc::now(),
                    }));
                }
            } else if !msg.answers.is_empty() {
                out.push(CapturedEvent::DnsResponse(DnsResponseEvent {
                    query_id:  msg.id,
                    answers:   msg.answers,
                    timestamp: Utc::now(),
                }));
            }
        }
        _ => {}
    }
}

// ── Capture thread ───────────────────────────────────────────────────────────

/// Opens the interface and spawns the capture thread.
///
/// Opening happens on the caller's thread so that a bad interface is a fatal
/// startup error rather than a dead background thread. The loop wakes every
/// 200 ms so the shutdown flag is observed promptly; the interface handle is
/// dropped (and thus closed) when the thread returns.
pub fn start(
    ip_cfg:    &IpAnalyzerConfig,
    dns_cfg:   DnsAnalyzerConfig,
    local_ips: Vec<Ipv4Addr>,
    sender:    Sender<CapturedEvent>,
    shutdown:  ShutdownFlag,
    logger:    SharedLogger,
    stats:     SharedStats,
) -> Result<thread::JoinHandle<()>, CaptureError> {
    if ip_cfg.interface.is_empty() {
        return Err(CaptureError::NoInterface);
    }

    let open_err = |source| CaptureError::Open {
        iface: ip_cfg.interface.clone(),
        source,
    };

    let mut inactive = pcap::Capture::from_device(ip_cfg.interface.as_str())
        .map_err(open_err)?
        .promisc(ip_cfg.promiscuous)
        .timeout(200);
    if ip_cfg.buffer_size > 0 {
        inactive = inactive.buffer_size(ip_cfg.buffer_size);
    }
    let mut cap = inactive.open().map_err(open_err)?;

    logger.log(&Event::Info {
        message: &format!(
            "capturing on {} (promiscuous: {})",
            ip_cfg.interface, ip_cfg.promiscuous
        ),
    });

    Ok(thread::spawn(move || {
        let mut events = Vec::new();
        while !shutdown.load(Ordering::Relaxed) {
            match cap.next_packet() {
                Ok(packet) => {
                    stats.packets_total.fetch_add(1, Ordering::Relaxed);
                    classify(packet.data, &local_ips, &dns_cfg, &mut events);
                    for event in events.drain(..) {
                        // A closed channel means the dispatcher is gone;
                        // nothing left to feed.
                        if sender.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue, // woke up to check shutdown flag
                Err(_) => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

    fn dns_cfg() -> DnsAnalyzerConfig {
        DnsAnalyzerConfig { enabled: true, port: 53 }
    }

    fn classify_one(frame: &[u8]) -> Vec<CapturedEvent> {
        let mut out = Vec::new();
        classify(frame, &[LOCAL], &dns_cfg(), &mut out);
        out
    }

    fn syn_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4(src, dst, 64)
            .tcp(src_port, dst_port, 1000, 64240)
            .syn();
        let mut frame = Vec::with_capacity(builder.size(0));
        builder.write(&mut frame, &[]).unwrap();
        frame
    }

    fn udp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4(src, dst, 64)
            .udp(src_port, dst_port);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    /// Minimal DNS query: one A question for example.com, id 0x1234.
    fn dns_query_payload() -> Vec<u8> {
        let mut p = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        p.extend_from_slice(b"\x07example\x03com\x00");
        p.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        p
    }

    /// Matching response carrying a single A answer 93.184.216.34.
    fn dns_response_payload() -> Vec<u8> {
        let mut p = vec![
            0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        p.extend_from_slice(b"\x07example\x03com\x00");
        p.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        p.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        p.extend_from_slice(&300u32.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x04, 93, 184, 216, 34]);
        p
    }

    #[test]
    fn inbound_syn_becomes_connection_event() {
        let events = classify_one(&syn_frame([203, 0, 113, 9], [192, 168, 1, 10], 55000, 22));
        assert_eq!(events.len(), 1);
        match &events[0] {
            CapturedEvent::NewConnection(ev) => {
                assert_eq!(ev.src_ip, "203.0.113.9");
                assert_eq!(ev.dst_ip, "192.168.1.10");
                assert_eq!(ev.dst_port, 22);
                assert_eq!(ev.protocol, Protocol::Tcp);
                assert_eq!(ev.direction, Direction::Inbound);
            }
            other => panic!("expected NewConnection, got {:?}", other),
        }
    }

    #[test]
    fn syn_to_foreign_destination_is_outbound() {
        let events = classify_one(&syn_frame([192, 168, 1, 10], [198, 51, 100, 7], 40000, 443));
        match &events[0] {
            CapturedEvent::NewConnection(ev) => {
                assert_eq!(ev.direction, Direction::Outbound);
                assert_eq!(ev.remote_ip(), "198.51.100.7");
            }
            other => panic!("expected NewConnection, got {:?}", other),
        }
    }

    #[test]
    fn syn_ack_is_ignored() {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([203, 0, 113, 9], [192, 168, 1, 10], 64)
            .tcp(55000, 22, 1000, 64240)
            .syn()
            .ack(1);
        let mut frame = Vec::with_capacity(builder.size(0));
        builder.write(&mut frame, &[]).unwrap();

        assert!(classify_one(&frame).is_empty());
    }

    #[test]
    fn dns_query_becomes_query_event() {
        let frame = udp_frame(
            [192, 168, 1, 10],
            [8, 8, 8, 8],
            40000,
            53,
            &dns_query_payload(),
        );
        let events = classify_one(&frame);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CapturedEvent::DnsQuery(q) => {
                assert_eq!(q.id, 0x1234);
                assert_eq!(q.domain, "example.com");
                assert_eq!(q.query_type, "A");
                assert_eq!(q.src_ip, "192.168.1.10");
                assert_eq!(q.dns_server, "8.8.8.8");
                assert!(q.response.is_empty());
            }
            other => panic!("expected DnsQuery, got {:?}", other),
        }
    }

    #[test]
    fn dns_response_becomes_response_event() {
        let frame = udp_frame(
            [8, 8, 8, 8],
            [192, 168, 1, 10],
            53,
            40000,
            &dns_response_payload(),
        );
        let events = classify_one(&frame);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CapturedEvent::DnsResponse(r) => {
                assert_eq!(r.query_id, 0x1234);
                assert_eq!(r.answers, vec!["A 93.184.216.34".to_string()]);
            }
            other => panic!("expected DnsResponse, got {:?}", other),
        }
    }

    #[test]
    fn udp_off_the_dns_port_is_ignored() {
        let frame = udp_frame(
            [192, 168, 1, 10],
            [8, 8, 8, 8],
            40000,
            4000,
            &dns_query_payload(),
        );
        assert!(classify_one(&frame).is_empty());
    }

    #[test]
    fn dns_decoding_can_be_disabled() {
        let frame = udp_frame(
            [192, 168, 1, 10],
            [8, 8, 8, 8],
            40000,
            53,
            &dns_query_payload(),
        );
        let mut out = Vec::new();
        let cfg = DnsAnalyzerConfig { enabled: false, port: 53 };
        classify(&frame, &[LOCAL], &cfg, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn garbage_frames_are_dropped() {
        assert!(classify_one(&[0u8; 10]).is_empty());
        assert!(classify_one(b"not a frame at all").is_empty());
    }
}
