//! DNS message parsing.
//!
//! Decodes just enough of the DNS wire format for observation: the header
//! (id, QR flag, section counts), the question section, and the answer
//! section rendered as text. Names are length-prefixed label sequences
//! (e.g. `\x03www\x07example\x03com\x00`), optionally compressed with
//! 14-bit back-pointers, which this parser follows with a bounded jump
//! count so a malicious packet cannot loop it.

use std::net::{Ipv4Addr, Ipv6Addr};

/// DNS header length; the question section starts immediately after.
const HEADER_LEN: usize = 12;

/// Upper bound on compression-pointer jumps while reading one name.
const MAX_JUMPS: usize = 8;

const TYPE_A: u16 = 1;
const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_SOA: u16 = 6;
const TYPE_PTR: u16 = 12;
const TYPE_MX: u16 = 15;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;

/// One entry of the question section.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name:  String,
    pub qtype: u16,
}

/// A decoded DNS message: header fields, questions, and answers rendered as
/// `"<TYPE> <value>"` text (e.g. `"A 93.184.216.34"`). Answer records of
/// types without a textual rendering are omitted.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub id:          u16,
    pub is_response: bool,
    pub questions:   Vec<DnsQuestion>,
    pub answers:     Vec<String>,
}

/// Textual name of a record type, `"TYPE<n>"` for anything unrecognised.
pub fn type_name(qtype: u16) -> String {
    match qtype {
        TYPE_A => "A".to_string(),
        TYPE_NS => "NS".to_string(),
        TYPE_CNAME => "CNAME".to_string(),
        TYPE_SOA => "SOA".to_string(),
        TYPE_PTR => "PTR".to_string(),
        TYPE_MX => "MX".to_string(),
        TYPE_TXT => "TXT".to_string(),
        TYPE_AAAA => "AAAA".to_string(),
        TYPE_SRV => "SRV".to_string(),
        other => format!("TYPE{}", other),
    }
}

/// Parses a DNS message from a UDP payload.
///
/// # Returns
/// * `Some(DnsMessage)` when the header and question section decode cleanly.
/// * `None` for truncated or malformed packets — the caller drops them.
pub fn parse_message(payload: &[u8]) -> Option<DnsMessage> {
    if payload.len() < HEADER_LEN {
        return None;
    }

    let id = u16::from_be_bytes([payload[0], payload[1]]);
    let is_response = payload[2] & 0x80 != 0;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]) as usize;
    let ancount = u16::from_be_bytes([payload[6], payload[7]]) as usize;

    let mut pos = HEADER_LEN;

    let mut questions = Vec::with_capacity(qdcount);
    for _ in 0..qdcount {
        let (name, next) = read_name(payload, pos)?;
        // qtype and qclass follow the name.
        if next + 4 > payload.len() {
            return None;
        }
        let qtype = u16::from_be_bytes([payload[next], payload[next + 1]]);
        questions.push(DnsQuestion { name, qtype });
        pos = next + 4;
    }

    let mut answers = Vec::new();
    for _ in 0..ancount {
        let (_, next) = read_name(payload, pos)?;
        if next + 10 > payload.len() {
            return None;
        }
        let rtype = u16::from_be_bytes([payload[next], payload[next + 1]]);
        let rdlength = u16::from_be_bytes([payload[next + 8], payload[next + 9]]) as usize;
        let rdata_start = next + 10;
        if rdata_start + rdlength > payload.len() {
            return None;
        }
        let rdata = &payload[rdata_start..rdata_start + rdlength];

        if let Some(text) = render_rdata(payload, rdata_start, rtype, rdata) {
            answers.push(text);
        }
        pos = rdata_start + rdlength;
    }

    Some(DnsMessage {
        id,
        is_response,
        questions,
        answers,
    })
}

/// Reads a possibly-compressed name starting at `pos`.
///
/// Returns the dotted name and the position immediately after the name in
/// the *original* byte stream (compression targets do not advance it).
fn read_name(payload: &[u8], mut pos: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut jumps = 0;
    // Position after the name at its original location; set on first jump.
    let mut end = None;

    loop {
        let len = *payload.get(pos)? as usize;

        if len & 0xC0 == 0xC0 {
            // 14-bit compression pointer.
            let low = *payload.get(pos + 1)? as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return None;
            }
            pos = (len & 0x3F) << 8 | low;
            continue;
        }

        if len == 0 {
            return Some((name, end.unwrap_or(pos + 1)));
        }

        let label = payload.get(pos + 1..pos + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(std::str::from_utf8(label).ok()?);
        pos += 1 + len;
    }
}

/// Renders one answer record as text, or `None` for types without a
/// rendering. `rdata_start` is the absolute offset of the record data so
/// that name-valued records can follow compression pointers.
fn render_rdata(payload: &[u8], rdata_start: usize, rtype: u16, rdata: &[u8]) -> Option<String> {
    match rtype {
        TYPE_A => {
            let octets: [u8; 4] = rdata.try_into().ok()?;
            Some(format!("A {}", Ipv4Addr::from(octets)))
        }
        TYPE_AAAA => {
            let octets: [u8; 16] = rdata.try_into().ok()?;
            Some(format!("AAAA {}", Ipv6Addr::from(octets)))
        }
        TYPE_CNAME | TYPE_NS | TYPE_PTR => {
            let (name, _) = read_name(payload, rdata_start)?;
            Some(format!("{} {}", type_name(rtype), name))
        }
        TYPE_TXT => {
            // TXT data is a sequence of length-prefixed strings.
            let mut text = String::new();
            let mut pos = 0;
            while pos < rdata.len() {
                let len = rdata[pos] as usize;
                let chunk = rdata.get(pos + 1..pos + 1 + len)?;
                text.push_str(std::str::from_utf8(chunk).ok()?);
                pos += 1 + len;
            }
            Some(format!("TXT {}", text))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a DNS name from dotted form.
    fn encode_name(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    fn header(id: u16, response: bool, qdcount: u16, ancount: u16) -> Vec<u8> {
        let flags: u16 = if response { 0x8180 } else { 0x0100 };
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&qdcount.to_be_bytes());
        out.extend_from_slice(&ancount.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // nscount
        out.extend_from_slice(&0u16.to_be_bytes()); // arcount
        out
    }

    fn question(name: &str, qtype: u16) -> Vec<u8> {
        let mut out = encode_name(name);
        out.extend_from_slice(&qtype.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes()); // IN
        out
    }

    #[test]
    fn parses_a_query() {
        let mut packet = header(0x1234, false, 1, 0);
        packet.extend(question("example.com", TYPE_A));

        let msg = parse_message(&packet).unwrap();
        assert_eq!(msg.id, 0x1234);
        assert!(!msg.is_response);
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].name, "example.com");
        assert_eq!(msg.questions[0].qtype, TYPE_A);
        assert!(msg.answers.is_empty());
    }

    #[test]
    fn parses_a_response_with_compressed_answer_name() {
        let mut packet = header(0x1234, true, 1, 1);
        packet.extend(question("example.com", TYPE_A));
        // Answer: pointer back to the question name at offset 12.
        packet.extend_from_slice(&[0xC0, 0x0C]);
        packet.extend_from_slice(&TYPE_A.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes()); // IN
        packet.extend_from_slice(&300u32.to_be_bytes()); // TTL
        packet.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        packet.extend_from_slice(&[93, 184, 216, 34]);

        let msg = parse_message(&packet).unwrap();
        assert!(msg.is_response);
        assert_eq!(msg.answers, vec!["A 93.184.216.34".to_string()]);
    }

    #[test]
    fn parses_aaaa_and_cname_answers() {
        let mut packet = header(0x42, true, 1, 2);
        packet.extend(question("example.com", TYPE_AAAA));

        packet.extend_from_slice(&[0xC0, 0x0C]);
        packet.extend_from_slice(&TYPE_CNAME.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&60u32.to_be_bytes());
        let target = encode_name("cdn.example.net");
        packet.extend_from_slice(&(target.len() as u16).to_be_bytes());
        packet.extend(target);

        packet.extend_from_slice(&[0xC0, 0x0C]);
        packet.extend_from_slice(&TYPE_AAAA.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&60u32.to_be_bytes());
        packet.extend_from_slice(&16u16.to_be_bytes());
        packet.extend_from_slice(&Ipv6Addr::new(0x2606, 0x2800, 0x220, 0x1, 0x248, 0x1893, 0x25c8, 0x1946).octets());

        let msg = parse_message(&packet).unwrap();
        assert_eq!(
            msg.answers,
            vec![
                "CNAME cdn.example.net".to_string(),
                "AAAA 2606:2800:220:1:248:1893:25c8:1946".to_string(),
            ]
        );
    }

    #[test]
    fn multiple_questions_all_decoded() {
        let mut packet = header(0x7, false, 2, 0);
        packet.extend(question("one.example.com", TYPE_A));
        packet.extend(question("two.example.com", TYPE_AAAA));

        let msg = parse_message(&packet).unwrap();
        assert_eq!(msg.questions.len(), 2);
        assert_eq!(msg.questions[0].name, "one.example.com");
        assert_eq!(msg.questions[1].name, "two.example.com");
        assert_eq!(msg.questions[1].qtype, TYPE_AAAA);
    }

    #[test]
    fn truncated_packets_are_rejected() {
        assert!(parse_message(&[0x12, 0x34, 0x01]).is_none());

        let mut packet = header(0x1, false, 1, 0);
        packet.extend_from_slice(&[7, b'e', b'x']); // label runs past the end
        assert!(parse_message(&packet).is_none());
    }

    #[test]
    fn pointer_loops_are_bounded() {
        let mut packet = header(0x1, false, 1, 0);
        // A name that is a pointer to itself.
        let start = packet.len() as u16;
        packet.extend_from_slice(&[0xC0 | (start >> 8) as u8, start as u8]);
        packet.extend_from_slice(&TYPE_A.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        assert!(parse_message(&packet).is_none());
    }

    #[test]
    fn type_names_cover_common_records() {
        assert_eq!(type_name(TYPE_A), "A");
        assert_eq!(type_name(TYPE_AAAA), "AAAA");
        assert_eq!(type_name(TYPE_MX), "MX");
        assert_eq!(type_name(255), "TYPE255");
    }
}
