//! TCP and UDP with per-session conversation tracking.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use etherparse::{TcpHeaderSlice, TcpOptionElement, UdpHeaderSlice};
use tracing::trace;

use super::bytes::colon_hex;
use super::{BuiltinSession, Dissection, dns, format_seconds, http, mysql};
use crate::types::FieldNode;

type Endpoint = (IpAddr, u16);

/// Unordered endpoint pair plus which way the current packet flows.
fn conversation_key(src: Endpoint, dst: Endpoint) -> ((Endpoint, Endpoint), usize) {
    if src <= dst { ((src, dst), 0) } else { ((dst, src), 1) }
}

#[derive(Debug)]
struct TcpConversation {
    index: u32,
    /// First sequence number per direction, used for relative numbering.
    base_seq: [Option<u32>; 2],
    /// Highest relative next-sequence seen per direction.
    max_next_seq: [u32; 2],
    first_seen: Duration,
    last_seen: Duration,
}

/// TCP conversations of one session, numbered in order of first appearance.
#[derive(Debug, Default)]
pub(crate) struct TcpConversations {
    table: HashMap<(Endpoint, Endpoint), TcpConversation>,
}

impl TcpConversations {
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    fn entry(&mut self, key: (Endpoint, Endpoint), now: Duration) -> &mut TcpConversation {
        let next = self.table.len() as u32;
        self.table.entry(key).or_insert_with(|| TcpConversation {
            index: next,
            base_seq: [None, None],
            max_next_seq: [0, 0],
            first_seen: now,
            last_seen: now,
        })
    }
}

/// UDP stream numbering of one session.
#[derive(Debug, Default)]
pub(crate) struct UdpStreams {
    table: HashMap<(Endpoint, Endpoint), u32>,
}

impl UdpStreams {
    fn index(&mut self, key: (Endpoint, Endpoint)) -> u32 {
        let next = self.table.len() as u32;
        *self.table.entry(key).or_insert(next)
    }
}

const TCP_FIN: u16 = 0x001;
const TCP_SYN: u16 = 0x002;
const TCP_RST: u16 = 0x004;
const TCP_PSH: u16 = 0x008;
const TCP_ACK: u16 = 0x010;
const TCP_URG: u16 = 0x020;
const TCP_ECE: u16 = 0x040;
const TCP_CWR: u16 = 0x080;

const FLAG_NAMES: [(u16, &str, &str, &str); 8] = [
    (TCP_CWR, "tcp.flags.cwr", "Congestion Window Reduced", "CWR"),
    (TCP_ECE, "tcp.flags.ece", "ECN-Echo", "ECE"),
    (TCP_URG, "tcp.flags.urg", "Urgent", "URG"),
    (TCP_ACK, "tcp.flags.ack", "Acknowledgment", "ACK"),
    (TCP_PSH, "tcp.flags.push", "Push", "PSH"),
    (TCP_RST, "tcp.flags.reset", "Reset", "RST"),
    (TCP_SYN, "tcp.flags.syn", "Syn", "SYN"),
    (TCP_FIN, "tcp.flags.fin", "Fin", "FIN"),
];

fn header_flags(tcp: &TcpHeaderSlice<'_>) -> u16 {
    [
        (tcp.fin(), TCP_FIN),
        (tcp.syn(), TCP_SYN),
        (tcp.rst(), TCP_RST),
        (tcp.psh(), TCP_PSH),
        (tcp.ack(), TCP_ACK),
        (tcp.urg(), TCP_URG),
        (tcp.ece(), TCP_ECE),
        (tcp.cwr(), TCP_CWR),
    ]
    .into_iter()
    .filter(|(set, _)| *set)
    .fold(0, |acc, (_, bit)| acc | bit)
}

/// Set flag names in packet-list order (`SYN, ACK`).
fn flag_list(flags: u16) -> String {
    const ORDER: [(u16, &str); 8] = [
        (TCP_FIN, "FIN"),
        (TCP_SYN, "SYN"),
        (TCP_RST, "RST"),
        (TCP_PSH, "PSH"),
        (TCP_ACK, "ACK"),
        (TCP_URG, "URG"),
        (TCP_ECE, "ECE"),
        (TCP_CWR, "CWR"),
    ];
    ORDER.iter().filter(|(bit, _)| flags & bit != 0).map(|(_, name)| *name).collect::<Vec<_>>().join(", ")
}

fn options_node(tcp: &TcpHeaderSlice<'_>) -> FieldNode {
    let mut node = FieldNode::field("tcp.options", "Options", colon_hex(tcp.options()));
    for option in tcp.options_iterator() {
        let child = match option {
            Ok(TcpOptionElement::Noop) => FieldNode::subtree("tcp.options.nop", "TCP Option - No-Operation (NOP)"),
            Ok(TcpOptionElement::MaximumSegmentSize(mss)) => {
                FieldNode::subtree("tcp.options.mss", format!("TCP Option - Maximum segment size: {} bytes", mss))
                    .with_child(FieldNode::field("tcp.options.mss_val", "MSS Value", mss))
            }
            Ok(TcpOptionElement::WindowScale(shift)) => {
                FieldNode::subtree("tcp.options.wscale", format!("TCP Option - Window scale: {}", shift))
                    .with_child(FieldNode::field("tcp.options.wscale.shift", "Shift count", shift))
            }
            Ok(TcpOptionElement::SelectiveAcknowledgementPermitted) => {
                FieldNode::subtree("tcp.options.sack_perm", "TCP Option - SACK permitted")
            }
            Ok(TcpOptionElement::SelectiveAcknowledgement(..)) => {
                FieldNode::subtree("tcp.options.sack", "TCP Option - SACK")
            }
            Ok(TcpOptionElement::Timestamp(tsval, tsecr)) => FieldNode::subtree(
                "tcp.options.timestamp",
                format!("TCP Option - Timestamps: TSval {}, TSecr {}", tsval, tsecr),
            )
            .with_child(FieldNode::field("tcp.options.timestamp.tsval", "Timestamp value", tsval))
            .with_child(FieldNode::field("tcp.options.timestamp.tsecr", "Timestamp echo reply", tsecr)),
            Err(e) => {
                node.push(FieldNode::subtree("_ws.expert", format!("[Malformed TCP option: {}]", e)));
                break;
            }
        };
        node.push(child);
    }
    node
}

fn flags_node(flags: u16) -> FieldNode {
    let names: Vec<&str> =
        FLAG_NAMES.iter().filter(|(bit, ..)| flags & bit != 0).map(|(.., short)| *short).collect();
    let mut node = FieldNode::described(
        "tcp.flags",
        "Flags",
        format!("0x{:04x}", flags),
        format!("0x{:03x} ({})", flags, names.join(", ")),
    );
    node.push(FieldNode::field("tcp.flags.res", "Reserved", (flags >> 9) & 0x7));
    for (bit, key, title, _) in FLAG_NAMES {
        let set = flags & bit != 0;
        node.push(FieldNode::described(key, title, u8::from(set), if set { "Set" } else { "Not set" }));
    }
    let summary: String = FLAG_NAMES
        .iter()
        .map(|(bit, .., short)| if flags & bit != 0 { short.chars().next().unwrap_or('·') } else { '·' })
        .collect();
    node.push(FieldNode::field("tcp.flags.str", "TCP Flags", summary));
    node
}

pub(crate) fn dissect_tcp(
    session: &mut BuiltinSession,
    pkt: &mut Dissection<'_>,
    src: IpAddr,
    dst: IpAddr,
    data: &[u8],
) {
    pkt.note_protocol("tcp");
    let tcp = match TcpHeaderSlice::from_slice(data) {
        Ok(tcp) => tcp,
        Err(e) => {
            trace!(frame = pkt.frame.number, error = %e, "tcp header does not parse");
            pkt.malformed("TCP");
            return;
        }
    };
    let (srcport, dstport) = (tcp.source_port(), tcp.destination_port());
    let (seq, ack, window, checksum, urgent) = (
        tcp.sequence_number(),
        tcp.acknowledgment_number(),
        tcp.window_size(),
        tcp.checksum(),
        tcp.urgent_pointer(),
    );
    let header_len = tcp.slice().len();
    let flags = header_flags(&tcp);
    let options = tcp.options();
    let payload = &data[header_len..];

    let now = pkt.frame.timestamp;
    let (key, dir) = conversation_key((src, srcport), (dst, dstport));
    let conv = session.tcp.entry(key, now);
    let base = *conv.base_seq[dir].get_or_insert(if flags & TCP_SYN != 0 { seq } else { seq.wrapping_sub(1) });
    let peer_base = conv.base_seq[1 - dir];
    let stream = conv.index;
    let time_relative = now.saturating_sub(conv.first_seen);
    let time_delta = now.saturating_sub(conv.last_seen);
    conv.last_seen = now;

    let rel_seq = seq.wrapping_sub(base);
    let seg_len = payload.len() as u32;
    let next_seq = rel_seq
        .wrapping_add(seg_len)
        .wrapping_add(u32::from(flags & (TCP_SYN | TCP_FIN) != 0));
    let rel_ack = match peer_base {
        Some(peer) if flags & TCP_ACK != 0 => ack.wrapping_sub(peer),
        _ => ack,
    };
    // Sequence space wraps, so compare by signed distance.
    let ahead = next_seq.wrapping_sub(conv.max_next_seq[dir]) as i32;
    let retransmission = seg_len > 0 && ahead <= 0;
    if ahead > 0 {
        conv.max_next_seq[dir] = next_seq;
    }

    let mut layer = FieldNode::protocol(
        "tcp",
        format!(
            "Transmission Control Protocol, Src Port: {}, Dst Port: {}, Seq: {}, Len: {}",
            srcport, dstport, rel_seq, seg_len
        ),
    )
    .with_child(FieldNode::field("tcp.srcport", "Source Port", srcport))
    .with_child(FieldNode::field("tcp.dstport", "Destination Port", dstport))
    .with_child(FieldNode::field("tcp.port", "Source or Destination Port", srcport))
    .with_child(FieldNode::field("tcp.port", "Source or Destination Port", dstport))
    .with_child(FieldNode::field("tcp.stream", "Stream index", stream))
    .with_child(FieldNode::field("tcp.len", "TCP Segment Len", seg_len))
    .with_child(FieldNode::described("tcp.seq", "Sequence Number", rel_seq, format!("{} (relative sequence number)", rel_seq)))
    .with_child(FieldNode::field("tcp.seq_raw", "Sequence Number (raw)", seq))
    .with_child(FieldNode::described(
        "tcp.nxtseq",
        "Next Sequence Number",
        next_seq,
        format!("{} (relative sequence number)", next_seq),
    ))
    .with_child(FieldNode::described("tcp.ack", "Acknowledgment Number", rel_ack, format!("{} (relative ack number)", rel_ack)))
    .with_child(FieldNode::field("tcp.ack_raw", "Acknowledgment number (raw)", ack))
    .with_child(FieldNode::described(
        "tcp.hdr_len",
        "Header Length",
        header_len,
        format!("{} bytes ({})", header_len, header_len / 4),
    ))
    .with_child(flags_node(flags))
    .with_child(FieldNode::field("tcp.window_size_value", "Window", window))
    .with_child(FieldNode::field("tcp.checksum", "Checksum", format!("0x{:04x}", checksum)))
    .with_child(FieldNode::field("tcp.urgent_pointer", "Urgent Pointer", urgent));

    if !options.is_empty() {
        layer.push(options_node(&tcp));
    }
    layer.push(
        FieldNode::subtree("Timestamps", "[Timestamps]")
            .with_child(FieldNode::described(
                "tcp.time_relative",
                "Time since first frame in this TCP stream",
                format_seconds(time_relative),
                format!("{} seconds", format_seconds(time_relative)),
            ))
            .with_child(FieldNode::described(
                "tcp.time_delta",
                "Time since previous frame in this TCP stream",
                format_seconds(time_delta),
                format!("{} seconds", format_seconds(time_delta)),
            )),
    );
    if retransmission {
        layer.push(
            FieldNode::subtree("tcp.analysis", "[SEQ/ACK analysis]").with_child(
                FieldNode::subtree("tcp.analysis.flags", "[TCP Analysis Flags]")
                    .with_child(FieldNode::subtree("tcp.analysis.retransmission", "[This frame is a (suspected) retransmission]")),
            ),
        );
    }
    if !payload.is_empty() {
        layer.push(FieldNode::field("tcp.payload", "TCP payload", colon_hex(payload)));
    }
    pkt.push_layer(layer);

    let mut info = format!("{} \u{2192} {} [{}] Seq={}", srcport, dstport, flag_list(flags), rel_seq);
    if flags & TCP_ACK != 0 {
        info.push_str(&format!(" Ack={}", rel_ack));
    }
    info.push_str(&format!(" Win={} Len={}", window, seg_len));
    if retransmission {
        info.insert_str(0, "[TCP Retransmission] ");
    }
    pkt.summarize("TCP", info);

    // Retransmitted data was already handed to the application dissector.
    if payload.is_empty() || retransmission {
        return;
    }
    if srcport == mysql::MYSQL_PORT || dstport == mysql::MYSQL_PORT {
        mysql::dissect(pkt, payload, dstport == mysql::MYSQL_PORT);
    } else if http::is_http_port(srcport) || http::is_http_port(dstport) {
        http::dissect(session, pkt, stream, payload);
    } else {
        pkt.data_layer(payload);
    }
}

pub(crate) fn dissect_udp(
    session: &mut BuiltinSession,
    pkt: &mut Dissection<'_>,
    src: IpAddr,
    dst: IpAddr,
    data: &[u8],
) {
    pkt.note_protocol("udp");
    let udp = match UdpHeaderSlice::from_slice(data) {
        Ok(udp) => udp,
        Err(e) => {
            trace!(frame = pkt.frame.number, error = %e, "udp header does not parse");
            pkt.malformed("UDP");
            return;
        }
    };
    let (srcport, dstport, length, checksum) =
        (udp.source_port(), udp.destination_port(), udp.length(), udp.checksum());
    let rest = &data[udp.slice().len()..];
    let (key, _) = conversation_key((src, srcport), (dst, dstport));
    let stream = session.udp.index(key);
    let payload = &rest[..usize::from(length).saturating_sub(8).min(rest.len())];

    pkt.push_layer(
        FieldNode::protocol(
            "udp",
            format!("User Datagram Protocol, Src Port: {}, Dst Port: {}", srcport, dstport),
        )
        .with_child(FieldNode::field("udp.srcport", "Source Port", srcport))
        .with_child(FieldNode::field("udp.dstport", "Destination Port", dstport))
        .with_child(FieldNode::field("udp.port", "Source or Destination Port", srcport))
        .with_child(FieldNode::field("udp.port", "Source or Destination Port", dstport))
        .with_child(FieldNode::field("udp.length", "Length", length))
        .with_child(FieldNode::field("udp.checksum", "Checksum", format!("0x{:04x}", checksum)))
        .with_child(FieldNode::field("udp.stream", "Stream index", stream)),
    );
    pkt.summarize("UDP", format!("{} \u{2192} {} Len={}", srcport, dstport, payload.len()));
    if srcport == dns::DNS_PORT || dstport == dns::DNS_PORT {
        dns::dissect(pkt, payload);
    } else {
        pkt.data_layer(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TcpFlags, tcp_frame_with_timestamps};

    #[test]
    fn conversation_key_is_direction_independent() {
        let a = (IpAddr::from([10, 0, 0, 1]), 40000);
        let b = (IpAddr::from([10, 0, 0, 2]), 3306);
        let (fwd, d1) = conversation_key(a, b);
        let (rev, d2) = conversation_key(b, a);
        assert_eq!(fwd, rev);
        assert_ne!(d1, d2);
    }

    #[test]
    fn flag_list_follows_packet_list_order() {
        assert_eq!(flag_list(TCP_SYN | TCP_ACK), "SYN, ACK");
        assert_eq!(flag_list(TCP_FIN | TCP_PSH | TCP_ACK), "FIN, PSH, ACK");
        assert_eq!(flag_list(0), "");
    }

    #[test]
    fn timestamp_option_is_broken_out() {
        let frame = tcp_frame_with_timestamps(
            ([10, 0, 0, 1], 40000),
            ([10, 0, 0, 2], 3306),
            1,
            1,
            TcpFlags::PSH_ACK,
            (1_001_204, 2_409_118),
            b"x",
        );
        let tcp = TcpHeaderSlice::from_slice(&frame[34..]).unwrap();
        assert_eq!(header_flags(&tcp), TCP_PSH | TCP_ACK);

        let node = options_node(&tcp);
        assert_eq!(node.value.as_deref(), Some("01:01:08:0a:00:0f:46:f4:00:24:c2:9e"));
        assert_eq!(node.children.iter().filter(|n| n.key == "tcp.options.nop").count(), 2);
        assert_eq!(node.find("tcp.options.timestamp.tsval").and_then(|n| n.value.as_deref()), Some("1001204"));
        assert_eq!(node.find("tcp.options.timestamp.tsecr").and_then(|n| n.value.as_deref()), Some("2409118"));
    }

    #[test]
    fn flag_summary_marks_set_bits() {
        let node = flags_node(TCP_PSH | TCP_ACK);
        assert_eq!(node.descriptive_value(), Some("0x018 (ACK, PSH)"));
        let summary = node.find("tcp.flags.str").and_then(|n| n.value.clone());
        assert_eq!(summary.as_deref(), Some("···AP···"));
    }
}
