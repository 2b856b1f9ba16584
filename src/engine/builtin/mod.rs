//! Reference dissector for common link, network and transport protocols.
//!
//! Decodes Ethernet (with 802.1Q), ARP, IPv4, IPv6, ICMP, TCP, UDP, DNS,
//! HTTP/1.x and the MySQL wire protocol. Anything else lands in a `data`
//! layer. TCP and UDP conversations are numbered per session, and TCP sequence
//! numbers are shown relative to each direction's first segment, so results
//! depend on which frames the session has already seen. Every frame also gets
//! a `_ws.col` layer with the packet-list columns.

mod bytes;
mod dns;
mod http;
mod ip;
mod link;
mod mysql;
mod transport;

use std::fmt::Display;
use std::time::Duration;

use tracing::debug;

use self::bytes::{colon_hex, format_mac};
use self::http::HttpExchanges;
use self::transport::{TcpConversations, UdpStreams};
use super::ProtocolDissector;
use crate::config::Preferences;
use crate::tracker::TrackerSlots;
use crate::types::{
    FieldNode, FieldTree, FrameMeta, LINKTYPE_ETHERNET, LINKTYPE_IPV4, LINKTYPE_IPV6, LINKTYPE_RAW, capture_time,
};
use crate::{DissectError, Result};

/// Built-in protocol dissector.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDissector;

impl BuiltinDissector {
    pub fn new() -> Self {
        Self
    }
}

/// Conversation state for one capture session.
#[derive(Debug, Default)]
pub struct BuiltinSession {
    preferences: Preferences,
    tcp: TcpConversations,
    udp: UdpStreams,
    http: HttpExchanges,
}

impl BuiltinSession {
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Number of distinct TCP conversations seen so far.
    pub fn tcp_streams(&self) -> usize {
        self.tcp.len()
    }
}

impl ProtocolDissector for BuiltinDissector {
    type Session = BuiltinSession;

    fn new_session(&self, preferences: &Preferences) -> Result<BuiltinSession> {
        if let Some(keys) = preferences.get("tls.keys_list") {
            for entry in keys.split(';').filter(|e| !e.is_empty()) {
                if entry.split(',').count() != 5 {
                    return Err(DissectError::configuration(format!(
                        "malformed tls.keys_list entry: {}",
                        entry
                    )));
                }
            }
        }
        debug!(prefs = preferences.iter().count(), "builtin engine session created");
        Ok(BuiltinSession { preferences: preferences.clone(), ..Default::default() })
    }

    fn dissect(
        &self,
        session: &mut BuiltinSession,
        frame: &FrameMeta,
        slots: TrackerSlots,
        data: &[u8],
    ) -> Result<FieldTree> {
        if data.len() != frame.captured_len as usize {
            return Err(DissectError::engine(
                frame.number,
                format!(
                    "buffer holds {} bytes but frame declares {} captured",
                    data.len(),
                    frame.captured_len
                ),
            ));
        }

        let mut pkt = Dissection::new(frame);
        match frame.link_type {
            LINKTYPE_ETHERNET => link::dissect_ethernet(session, &mut pkt, data),
            LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => ip::dissect_raw(session, &mut pkt, data),
            _ => pkt.data_layer(data),
        }

        let mut tree = FieldTree::new();
        tree.push(frame_layer(frame, &slots, &pkt.protocols));
        tree.push(pkt.columns.layer(frame));
        tree.layers.extend(pkt.layers);
        Ok(tree)
    }
}

/// Packet-list columns, overwritten by each deeper protocol that knows better.
#[derive(Debug, Default)]
pub(crate) struct Columns {
    src: String,
    dst: String,
    protocol: String,
    info: String,
}

impl Columns {
    fn layer(&self, frame: &FrameMeta) -> FieldNode {
        FieldNode::protocol("_ws.col", "Packet list columns")
            .with_child(FieldNode::field("_ws.col.number", "No.", frame.number))
            .with_child(FieldNode::field("_ws.col.def_src", "Source", &self.src))
            .with_child(FieldNode::field("_ws.col.def_dst", "Destination", &self.dst))
            .with_child(FieldNode::field("_ws.col.protocol", "Protocol", &self.protocol))
            .with_child(FieldNode::field("_ws.col.packet_length", "Length", frame.declared_len))
            .with_child(FieldNode::field("_ws.col.info", "Info", &self.info))
    }
}

/// Layers collected while walking one frame.
pub(crate) struct Dissection<'a> {
    pub(crate) frame: &'a FrameMeta,
    pub(crate) layers: Vec<FieldNode>,
    protocols: Vec<&'static str>,
    columns: Columns,
}

impl<'a> Dissection<'a> {
    fn new(frame: &'a FrameMeta) -> Self {
        Self { frame, layers: Vec::new(), protocols: Vec::new(), columns: Columns::default() }
    }

    pub(crate) fn set_hw_addresses(&mut self, src: &[u8; 6], dst: &[u8; 6]) {
        self.columns.src = format_mac(src);
        self.columns.dst = format_mac(dst);
    }

    pub(crate) fn set_addresses(&mut self, src: impl Display, dst: impl Display) {
        self.columns.src = src.to_string();
        self.columns.dst = dst.to_string();
    }

    /// Set the protocol and info columns.
    pub(crate) fn summarize(&mut self, protocol: &str, info: impl Into<String>) {
        self.columns.protocol = protocol.to_string();
        self.columns.info = info.into();
    }

    pub(crate) fn push_layer(&mut self, node: FieldNode) {
        self.layers.push(node);
    }

    /// Record a protocol in `frame.protocols` without adding a layer for it.
    pub(crate) fn note_protocol(&mut self, name: &'static str) {
        self.protocols.push(name);
    }

    pub(crate) fn malformed(&mut self, protocol: &str) {
        self.note_protocol("_ws.malformed");
        self.columns.info = format!("[Malformed Packet: {}]", protocol);
        self.layers.push(FieldNode::protocol(
            "_ws.malformed",
            format!("[Malformed Packet: {}]", protocol),
        ));
    }

    pub(crate) fn data_layer(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.note_protocol("data");
        if self.columns.protocol.is_empty() {
            self.summarize("DATA", format!("{} bytes", data.len()));
        }
        self.layers.push(
            FieldNode::protocol("data", format!("Data ({} bytes)", data.len()))
                .with_child(FieldNode::field("data.data", "Data", colon_hex(data)))
                .with_child(FieldNode::field("data.len", "Length", data.len())),
        );
    }
}

/// Seconds with nanosecond precision, the analyzer's time rendering.
pub(crate) fn format_seconds(d: Duration) -> String {
    format!("{}.{:09}", d.as_secs(), d.subsec_nanos())
}

fn frame_layer(frame: &FrameMeta, slots: &TrackerSlots, protocols: &[&str]) -> FieldNode {
    let mut stack = vec!["frame"];
    stack.extend_from_slice(protocols);
    let seconds = |d: Duration| format!("{} seconds", format_seconds(d));

    FieldNode::protocol(
        "frame",
        format!(
            "Frame {}: {} bytes on wire ({} bits), {} bytes captured ({} bits)",
            frame.number,
            frame.declared_len,
            u64::from(frame.declared_len) * 8,
            frame.captured_len,
            u64::from(frame.captured_len) * 8
        ),
    )
    .with_child(FieldNode::field("frame.link_type", "Link-layer type", frame.link_type))
    .with_child(FieldNode::field(
        "frame.time",
        "Arrival Time",
        capture_time(frame.timestamp).format("%b %e, %Y %H:%M:%S%.9f UTC"),
    ))
    .with_child(FieldNode::described(
        "frame.time_epoch",
        "Epoch Arrival Time",
        format_seconds(frame.timestamp),
        seconds(frame.timestamp),
    ))
    .with_child(FieldNode::described(
        "frame.time_delta",
        "Time delta from previous captured frame",
        format_seconds(slots.time_delta(frame)),
        seconds(slots.time_delta(frame)),
    ))
    .with_child(FieldNode::described(
        "frame.time_delta_displayed",
        "Time delta from previous displayed frame",
        format_seconds(slots.time_delta_displayed(frame)),
        seconds(slots.time_delta_displayed(frame)),
    ))
    .with_child(FieldNode::described(
        "frame.time_relative",
        "Time since reference or first frame",
        format_seconds(slots.time_relative(frame)),
        seconds(slots.time_relative(frame)),
    ))
    .with_child(FieldNode::field("frame.number", "Frame Number", frame.number))
    .with_child(FieldNode::described(
        "frame.len",
        "Frame Length",
        frame.declared_len,
        format!("{} bytes ({} bits)", frame.declared_len, u64::from(frame.declared_len) * 8),
    ))
    .with_child(FieldNode::described(
        "frame.cap_len",
        "Capture Length",
        frame.captured_len,
        format!("{} bytes ({} bits)", frame.captured_len, u64::from(frame.captured_len) * 8),
    ))
    .with_child(FieldNode::field("frame.offset", "File Offset", frame.offset))
    .with_child(FieldNode::field("frame.cum_bytes", "Cumulative Bytes", frame.cum_bytes))
    .with_child(FieldNode::field("frame.protocols", "Protocols in frame", stack.join(":")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{JsonTreeSerializer, TreeSerializer};
    use crate::test_utils::{
        HTTP_CLIENT, HTTP_SERVER, TcpFlags, dns_query, http_session_capture, mysql_login_frame, tcp_frame,
        udp_frame, udp6_frame,
    };
    use crate::tracker::FrameContextTracker;
    use crate::types::CaptureMeta;

    fn meta(number: u64, data: &[u8]) -> FrameMeta {
        let capture = CaptureMeta {
            timestamp: Duration::from_secs(1_700_000_000 + number),
            declared_len: data.len() as u32,
            captured_len: data.len() as u32,
            offset: 24,
            link_type: LINKTYPE_ETHERNET,
        };
        FrameMeta::new(number, 0, &capture)
    }

    fn dissect(session: &mut BuiltinSession, tracker: &mut FrameContextTracker, number: u64, data: &[u8]) -> FieldTree {
        let frame = meta(number, data);
        let slots = tracker.before_dissect(&frame);
        let tree = BuiltinDissector.dissect(session, &frame, slots, data).unwrap();
        tracker.after_dissect(&frame);
        tree
    }

    #[test]
    fn mysql_login_request_decodes_user() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let frame = mysql_login_frame();
        assert_eq!(frame.len(), 155);

        let tree = dissect(&mut session, &mut tracker, 1, &frame);
        let json = JsonTreeSerializer.to_value(&tree, false);

        assert_eq!(json["tcp"]["tcp.dstport"], "3306");
        assert_eq!(json["mysql"]["mysql.login_request"]["mysql.user"], "root");
        assert_eq!(json["mysql"]["mysql.login_request"]["mysql.schema"], "test");
        assert_eq!(
            json["mysql"]["mysql.login_request"]["mysql.client_auth_plugin"],
            "mysql_native_password"
        );
        assert_eq!(json["frame"]["frame.protocols"], "frame:eth:ethertype:ip:tcp:mysql");
    }

    #[test]
    fn tcp_sequence_numbers_are_relative_per_session() {
        let client = ([10, 0, 0, 1], 40000);
        let server = ([10, 0, 0, 2], 80);
        let syn = tcp_frame(client, server, 1000, 0, TcpFlags::SYN, b"");
        let data = tcp_frame(client, server, 1501, 5000, TcpFlags::PSH_ACK, b"GET /");

        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let first = dissect(&mut session, &mut tracker, 1, &syn);
        let second = dissect(&mut session, &mut tracker, 2, &data);

        let seq = |tree: &FieldTree| tree.find("tcp.seq").and_then(|n| n.value.clone());
        assert_eq!(seq(&first).as_deref(), Some("0"));
        assert_eq!(seq(&second).as_deref(), Some("501"));
        assert_eq!(second.find("tcp.stream").and_then(|n| n.value.as_deref()), Some("0"));

        // A fresh session has not seen the SYN and numbers the same segment differently.
        let mut fresh = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut fresh_tracker = FrameContextTracker::new();
        let alone = dissect(&mut fresh, &mut fresh_tracker, 1, &data);
        assert_eq!(seq(&alone).as_deref(), Some("1"));
        assert_eq!(alone.find("tcp.seq_raw").and_then(|n| n.value.as_deref()), Some("1501"));
        assert_eq!(session.tcp_streams(), 1);
    }

    #[test]
    fn captured_length_mismatch_is_engine_error() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut frame = meta(3, &[0u8; 60]);
        frame.captured_len = 61;
        let err = BuiltinDissector
            .dissect(&mut session, &frame, TrackerSlots::default(), &[0u8; 60])
            .unwrap_err();
        assert!(matches!(err, DissectError::Engine { number: 3, .. }));
    }

    #[test]
    fn truncated_header_marks_frame_malformed() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let mut frame = udp_frame(([10, 0, 0, 1], 1), ([10, 0, 0, 2], 2), b"");
        frame.truncate(17);
        let tree = dissect(&mut session, &mut tracker, 1, &frame);
        assert!(tree.find("_ws.malformed").is_some());
    }

    #[test]
    fn columns_summarize_the_deepest_protocol() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let frame = udp_frame(([10, 0, 0, 9], 40001), ([10, 0, 0, 1], 53), &dns_query(0x1001, "host-01.example.com"));
        let tree = dissect(&mut session, &mut tracker, 7, &frame);
        let json = JsonTreeSerializer.to_value(&tree, false);

        assert_eq!(json["frame"]["frame.protocols"], "frame:eth:ethertype:ip:udp:dns");
        assert_eq!(json["_ws.col"]["_ws.col.number"], "7");
        assert_eq!(json["_ws.col"]["_ws.col.def_src"], "10.0.0.9");
        assert_eq!(json["_ws.col"]["_ws.col.def_dst"], "10.0.0.1");
        assert_eq!(json["_ws.col"]["_ws.col.protocol"], "DNS");
        assert_eq!(json["_ws.col"]["_ws.col.packet_length"], frame.len().to_string());
        assert_eq!(json["_ws.col"]["_ws.col.info"], "Standard query 0x1001 A host-01.example.com");
        assert_eq!(json["dns"]["Queries"]["host-01.example.com: type A, class IN"]["dns.qry.name"], "host-01.example.com");
    }

    #[test]
    fn frame_time_renders_in_utc() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let frame = udp_frame(([10, 0, 0, 1], 1), ([10, 0, 0, 2], 2), b"x");
        // meta() places frame n at 1_700_000_000 + n seconds.
        let tree = dissect(&mut session, &mut tracker, 1, &frame);
        assert_eq!(
            tree.find("frame.time").and_then(|n| n.value.as_deref()),
            Some("Nov 14, 2023 22:13:21.000000000 UTC")
        );
    }

    #[test]
    fn ipv6_addresses_fill_the_columns() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let mut src = [0u8; 16];
        src[0] = 0xfe;
        src[1] = 0x80;
        src[15] = 1;
        let frame = udp6_frame((src, 5000), ([0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xfb], 6000), b"hi");
        let tree = dissect(&mut session, &mut tracker, 1, &frame);
        let json = JsonTreeSerializer.to_value(&tree, false);
        assert_eq!(json["ipv6"]["ipv6.src"], "fe80::1");
        assert_eq!(json["ipv6"]["ipv6.plen"], "10");
        assert_eq!(json["_ws.col"]["_ws.col.def_dst"], "ff02::fb");
        assert_eq!(json["data"]["data.len"], "2");
    }

    #[test]
    fn http_exchange_pairs_and_skips_retransmitted_response() {
        let mut session = BuiltinDissector.new_session(&Preferences::default()).unwrap();
        let mut tracker = FrameContextTracker::new();
        let capture = http_session_capture();
        let trees: Vec<FieldTree> = capture
            .records()
            .iter()
            .enumerate()
            .map(|(i, record)| dissect(&mut session, &mut tracker, i as u64 + 1, &record.data))
            .collect();

        let request = JsonTreeSerializer.to_value(&trees[3], false);
        assert_eq!(request["http"]["http.host"], "example.com");
        assert_eq!(request["http"]["http.request.full_uri"], "http://example.com/index.html");
        assert_eq!(request["_ws.col"]["_ws.col.info"], "GET /index.html HTTP/1.1");
        assert_eq!(
            request["_ws.col"]["_ws.col.def_src"],
            std::net::Ipv4Addr::from(HTTP_CLIENT.0).to_string()
        );

        let response = JsonTreeSerializer.to_value(&trees[4], false);
        assert_eq!(response["http"]["http.request_in"], "4");
        // meta() spaces frames one second apart.
        assert_eq!(response["http"]["http.time"], "1.000000000");
        assert_eq!(response["http"]["http.file_data"], "<h1>hi</h1>\r\n");
        assert_eq!(response["frame"]["frame.protocols"], "frame:eth:ethertype:ip:tcp:http");
        assert_eq!(
            response["_ws.col"]["_ws.col.def_src"],
            std::net::Ipv4Addr::from(HTTP_SERVER.0).to_string()
        );

        let again = &trees[5];
        assert!(again.find("tcp.analysis.retransmission").is_some());
        assert!(again.find("http").is_none());
        assert_eq!(
            again.find("_ws.col.info").and_then(|n| n.value.as_deref()),
            Some("[TCP Retransmission] 80 \u{2192} 51000 [PSH, ACK] Seq=1 Ack=89 Win=502 Len=92")
        );
        assert_eq!(session.tcp_streams(), 1);
    }

    #[test]
    fn malformed_keys_list_is_rejected() {
        let mut prefs = Preferences::default();
        prefs.set("tls.keys_list", "10.0.0.1,443,http");
        assert!(BuiltinDissector.new_session(&prefs).is_err());
    }
}
