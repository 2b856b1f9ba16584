//! DNS over UDP: header, questions and answer records.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::Dissection;
use super::bytes::{Reader, colon_hex};
use crate::types::FieldNode;

pub(crate) const DNS_PORT: u16 = 53;

/// Compression pointers followed before a name is declared looping.
const MAX_POINTER_JUMPS: usize = 16;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_RECURSION_AVAILABLE: u16 = 0x0080;

fn type_name(rtype: u16) -> &'static str {
    match rtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        41 => "OPT",
        255 => "ANY",
        _ => "Unknown",
    }
}

fn class_name(class: u16) -> &'static str {
    match class & 0x7fff {
        1 => "IN",
        3 => "CH",
        4 => "HS",
        _ => "Unknown",
    }
}

fn rcode_name(rcode: u16) -> &'static str {
    match rcode {
        0 => "No error",
        1 => "Format error",
        2 => "Server failure",
        3 => "No such name",
        4 => "Not implemented",
        5 => "Refused",
        _ => "Unknown",
    }
}

/// A decoded domain name and the number of bytes it occupies at its start.
struct Name {
    text: String,
    labels: usize,
    wire_len: usize,
}

/// Reads a possibly compressed name starting at `start` within `msg`.
fn read_name(msg: &[u8], start: usize) -> Option<Name> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut wire_len = None;
    let mut jumps = 0;
    loop {
        let len = *msg.get(pos)?;
        match len & 0xc0 {
            0x00 if len == 0 => {
                wire_len.get_or_insert(pos + 1 - start);
                break;
            }
            0x00 => {
                let label = msg.get(pos + 1..pos + 1 + usize::from(len))?;
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos += 1 + usize::from(len);
            }
            0xc0 => {
                let low = *msg.get(pos + 1)?;
                wire_len.get_or_insert(pos + 2 - start);
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return None;
                }
                pos = usize::from(u16::from_be_bytes([len & 0x3f, low]));
            }
            _ => return None,
        }
    }
    let text = if labels.is_empty() { "<Root>".to_string() } else { labels.join(".") };
    Some(Name { labels: labels.len(), text, wire_len: wire_len? })
}

fn flags_node(flags: u16) -> FieldNode {
    let response = flags & FLAG_RESPONSE != 0;
    let opcode = (flags >> 11) & 0x0f;
    let rcode = flags & 0x000f;
    let bit = |mask: u16| u8::from(flags & mask != 0);
    let summary = match (response, rcode) {
        (false, _) => "Standard query".to_string(),
        (true, 0) => "Standard query response, No error".to_string(),
        (true, rcode) => format!("Standard query response, {}", rcode_name(rcode)),
    };

    let mut node = FieldNode::described("dns.flags", "Flags", format!("0x{:04x}", flags), format!("0x{:04x} {}", flags, summary))
        .with_child(FieldNode::described(
            "dns.flags.response",
            "Response",
            bit(FLAG_RESPONSE),
            if response { "Message is a response" } else { "Message is a query" },
        ))
        .with_child(FieldNode::field("dns.flags.opcode", "Opcode", opcode));
    if response {
        node.push(FieldNode::field("dns.flags.authoritative", "Authoritative", bit(FLAG_AUTHORITATIVE)));
    }
    node.push(FieldNode::field("dns.flags.truncated", "Truncated", bit(FLAG_TRUNCATED)));
    node.push(FieldNode::field("dns.flags.recdesired", "Recursion desired", bit(FLAG_RECURSION_DESIRED)));
    if response {
        node.push(FieldNode::field("dns.flags.recavail", "Recursion available", bit(FLAG_RECURSION_AVAILABLE)));
        node.push(FieldNode::described("dns.flags.rcode", "Reply code", rcode, format!("{} ({})", rcode_name(rcode), rcode)));
    }
    node
}

fn type_field(key: &str, rtype: u16) -> FieldNode {
    FieldNode::described(key, "Type", rtype, format!("{} ({})", type_name(rtype), rtype))
}

fn class_field(key: &str, class: u16) -> FieldNode {
    FieldNode::described(key, "Class", format!("0x{:04x}", class), format!("{} (0x{:04x})", class_name(class), class))
}

pub(crate) fn dissect(pkt: &mut Dissection<'_>, payload: &[u8]) {
    pkt.note_protocol("dns");
    let mut r = Reader::new(payload);
    let header = (r.be16(), r.be16(), r.be16(), r.be16(), r.be16(), r.be16());
    let (Some(id), Some(flags), Some(qdcount), Some(ancount), Some(nscount), Some(arcount)) = header else {
        pkt.malformed("DNS");
        return;
    };
    let response = flags & FLAG_RESPONSE != 0;

    let mut layer = FieldNode::protocol(
        "dns",
        format!("Domain Name System ({})", if response { "response" } else { "query" }),
    )
    .with_child(FieldNode::field("dns.id", "Transaction ID", format!("0x{:04x}", id)))
    .with_child(flags_node(flags))
    .with_child(FieldNode::field("dns.count.queries", "Questions", qdcount))
    .with_child(FieldNode::field("dns.count.answers", "Answer RRs", ancount))
    .with_child(FieldNode::field("dns.count.auth_rr", "Authority RRs", nscount))
    .with_child(FieldNode::field("dns.count.add_rr", "Additional RRs", arcount));

    let mut info = vec![format!(
        "Standard query{} 0x{:04x}",
        if response { " response" } else { "" },
        id
    )];
    let mut pos = 12;
    let mut truncated = false;

    let mut queries = FieldNode::subtree("Queries", "Queries");
    for _ in 0..qdcount {
        let Some((entry, summary, next)) = question(payload, pos) else {
            truncated = true;
            break;
        };
        queries.push(entry);
        info.push(summary);
        pos = next;
    }
    if !queries.children.is_empty() {
        layer.push(queries);
    }

    let mut answers = FieldNode::subtree("Answers", "Answers");
    if !truncated {
        for _ in 0..ancount {
            let Some((entry, summary, next)) = resource_record(payload, pos) else {
                truncated = true;
                break;
            };
            answers.push(entry);
            info.push(summary);
            pos = next;
        }
    }
    if !answers.children.is_empty() {
        layer.push(answers);
    }

    pkt.summarize("DNS", info.join(" "));
    pkt.push_layer(layer);
    if truncated {
        pkt.malformed("DNS");
    }
}

fn question(msg: &[u8], pos: usize) -> Option<(FieldNode, String, usize)> {
    let name = read_name(msg, pos)?;
    let mut r = Reader::new(msg.get(pos + name.wire_len..)?);
    let (rtype, class) = (r.be16()?, r.be16()?);
    let node = FieldNode::subtree(
        format!("{}: type {}, class {}", name.text, type_name(rtype), class_name(class)),
        format!("{}: type {}, class {}", name.text, type_name(rtype), class_name(class)),
    )
    .with_child(FieldNode::field("dns.qry.name", "Name", &name.text))
    .with_child(FieldNode::field("dns.qry.name.len", "Name Length", name.text.len()))
    .with_child(FieldNode::field("dns.count.labels", "Label Count", name.labels))
    .with_child(type_field("dns.qry.type", rtype))
    .with_child(class_field("dns.qry.class", class));
    let summary = format!("{} {}", type_name(rtype), name.text);
    Some((node, summary, pos + name.wire_len + 4))
}

fn resource_record(msg: &[u8], pos: usize) -> Option<(FieldNode, String, usize)> {
    let name = read_name(msg, pos)?;
    let fixed = pos + name.wire_len;
    let mut r = Reader::new(msg.get(fixed..)?);
    let (rtype, class, ttl, rdlen) = (r.be16()?, r.be16()?, r.be32()?, r.be16()?);
    let rdata_at = fixed + 10;
    let rdata = r.take(usize::from(rdlen))?;

    let (data_field, shown) = match (rtype, rdata.len()) {
        (1, 4) => {
            let addr = Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]);
            (FieldNode::field("dns.a", "Address", addr), addr.to_string())
        }
        (28, 16) => {
            let octets: [u8; 16] = rdata.try_into().ok()?;
            let addr = Ipv6Addr::from(octets);
            (FieldNode::field("dns.aaaa", "AAAA Address", addr), addr.to_string())
        }
        (2 | 5 | 12, _) => {
            let target = read_name(msg, rdata_at)?.text;
            let key = match rtype {
                2 => "dns.ns",
                5 => "dns.cname",
                _ => "dns.ptr.domain_name",
            };
            (FieldNode::field(key, type_name(rtype), &target), target)
        }
        _ => (FieldNode::field("dns.data", "Data", colon_hex(rdata)), colon_hex(rdata)),
    };

    let title = format!("{}: type {}, class {}", name.text, type_name(rtype), class_name(class));
    let node = FieldNode::subtree(format!("{}, {}", title, shown), format!("{}, {}", title, shown))
        .with_child(FieldNode::field("dns.resp.name", "Name", &name.text))
        .with_child(type_field("dns.resp.type", rtype))
        .with_child(class_field("dns.resp.class", class))
        .with_child(FieldNode::described("dns.resp.ttl", "Time to live", ttl, format!("{} seconds", ttl)))
        .with_child(FieldNode::field("dns.resp.len", "Data length", rdlen))
        .with_child(data_field);
    let summary = format!("{} {}", type_name(rtype), shown);
    Some((node, summary, rdata_at + usize::from(rdlen)))
}
