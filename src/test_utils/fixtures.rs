//! Packet and capture file builders shared by unit tests, integration tests
//! and benchmarks.
//!
//! This file stands alone: it does not reach into the crate, so the
//! integration tests include it by path instead of keeping their own copy.

#![allow(dead_code)]

use std::borrow::Cow;
use std::io::Write;
use std::time::Duration;

use etherparse::{PacketBuilder, TcpOptionElement};
use pcap_file::pcap::{PcapHeader, PcapWriter, RawPcapPacket};
use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
use pcap_file::pcapng::blocks::interface_description::{InterfaceDescriptionBlock, InterfaceDescriptionOption};
use pcap_file::pcapng::{PcapNgBlock, PcapNgWriter};
use pcap_file::{DataLink, Endianness};
use tempfile::NamedTempFile;

/// Timestamp of the first frame built by the helpers here.
pub const BASE_TIME: Duration = Duration::from_secs(1_700_000_000);

/// Snapshot length written into capture headers.
pub const FIXTURE_SNAPLEN: u32 = 262_144;

pub type Endpoint = ([u8; 4], u16);
pub type Endpoint6 = ([u8; 16], u16);

const CLIENT_MAC: [u8; 6] = [0x00, 0x1c, 0x42, 0x5e, 0x10, 0x2a];
const SERVER_MAC: [u8; 6] = [0x00, 0x1c, 0x42, 0x00, 0x00, 0x18];

// ----------------------------------------------------------------------------
// Packet builders
// ----------------------------------------------------------------------------

/// Control bits for [`tcp_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub psh: bool,
    pub fin: bool,
}

impl TcpFlags {
    pub const SYN: Self = Self { syn: true, ack: false, psh: false, fin: false };
    pub const SYN_ACK: Self = Self { syn: true, ack: true, psh: false, fin: false };
    pub const ACK: Self = Self { syn: false, ack: true, psh: false, fin: false };
    pub const PSH_ACK: Self = Self { syn: false, ack: true, psh: true, fin: false };
    pub const FIN_ACK: Self = Self { syn: false, ack: true, psh: false, fin: true };
}

/// An Ethernet/IPv4/UDP frame.
pub fn udp_frame(src: Endpoint, dst: Endpoint, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC).ipv4(src.0, dst.0, 64).udp(src.1, dst.1);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).expect("build udp frame");
    frame
}

/// An Ethernet/IPv6/UDP frame.
pub fn udp6_frame(src: Endpoint6, dst: Endpoint6, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC).ipv6(src.0, dst.0, 64).udp(src.1, dst.1);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).expect("build udp6 frame");
    frame
}

/// An Ethernet/IPv4/TCP frame without options.
pub fn tcp_frame(src: Endpoint, dst: Endpoint, seq: u32, ack: u32, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    tcp_frame_with_options(src, dst, seq, ack, flags, &[], payload)
}

/// An Ethernet/IPv4/TCP frame carrying the NOP, NOP, timestamp option block.
pub fn tcp_frame_with_timestamps(
    src: Endpoint,
    dst: Endpoint,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    (tsval, tsecr): (u32, u32),
    payload: &[u8],
) -> Vec<u8> {
    let options = [TcpOptionElement::Noop, TcpOptionElement::Noop, TcpOptionElement::Timestamp(tsval, tsecr)];
    tcp_frame_with_options(src, dst, seq, ack, flags, &options, payload)
}

fn tcp_frame_with_options(
    src: Endpoint,
    dst: Endpoint,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    options: &[TcpOptionElement],
    payload: &[u8],
) -> Vec<u8> {
    let mut builder = PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC).ipv4(src.0, dst.0, 64).tcp(src.1, dst.1, seq, 502);
    if flags.syn {
        builder = builder.syn();
    }
    if flags.ack {
        builder = builder.ack(ack);
    }
    if flags.psh {
        builder = builder.psh();
    }
    if flags.fin {
        builder = builder.fin();
    }
    if !options.is_empty() {
        builder = builder.options(options).expect("tcp options fit the header");
    }
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).expect("build tcp frame");
    frame
}

// ----------------------------------------------------------------------------
// DNS and HTTP payloads
// ----------------------------------------------------------------------------

fn push_dns_name(message: &mut Vec<u8>, name: &str) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.push(0);
}

fn dns_header(id: u16, flags: u16, questions: u16, answers: u16) -> Vec<u8> {
    let mut message = Vec::with_capacity(64);
    for word in [id, flags, questions, answers, 0, 0] {
        message.extend_from_slice(&word.to_be_bytes());
    }
    message
}

/// A recursive query for the A record of `name`.
pub fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut message = dns_header(id, 0x0100, 1, 0);
    push_dns_name(&mut message, name);
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    message
}

/// A response to [`dns_query`] with one A record per address. Answer names
/// point back at the question.
pub fn dns_response(id: u16, name: &str, addrs: &[[u8; 4]], ttl: u32) -> Vec<u8> {
    let mut message = dns_header(id, 0x8180, 1, addrs.len() as u16);
    push_dns_name(&mut message, name);
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    for addr in addrs {
        message.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01]);
        message.extend_from_slice(&ttl.to_be_bytes());
        message.extend_from_slice(&4u16.to_be_bytes());
        message.extend_from_slice(addr);
    }
    message
}

pub const HTTP_CLIENT: Endpoint = ([192, 168, 1, 10], 51000);
pub const HTTP_SERVER: Endpoint = ([93, 184, 216, 34], 80);

pub const HTTP_REQUEST: &[u8] =
    b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nUser-Agent: tracewire-test\r\nAccept: */*\r\n\r\n";
pub const HTTP_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Type: text/html\r\nContent-Length: 13\r\n\r\n<h1>hi</h1>\r\n";

/// Frame number of the response in [`http_session_capture`].
pub const HTTP_RESPONSE_INDEX: u64 = 5;

/// One HTTP exchange over a fresh connection: handshake, request, response,
/// a retransmission of the response, and the client's FIN.
pub fn http_session_capture() -> PcapBuilder {
    const CLIENT_ISN: u32 = 0x0100_0000;
    const SERVER_ISN: u32 = 0x7f00_0000;
    let client_next = CLIENT_ISN + 1 + HTTP_REQUEST.len() as u32;
    let server_next = SERVER_ISN + 1 + HTTP_RESPONSE.len() as u32;

    let frames = [
        tcp_frame(HTTP_CLIENT, HTTP_SERVER, CLIENT_ISN, 0, TcpFlags::SYN, b""),
        tcp_frame(HTTP_SERVER, HTTP_CLIENT, SERVER_ISN, CLIENT_ISN + 1, TcpFlags::SYN_ACK, b""),
        tcp_frame(HTTP_CLIENT, HTTP_SERVER, CLIENT_ISN + 1, SERVER_ISN + 1, TcpFlags::ACK, b""),
        tcp_frame(HTTP_CLIENT, HTTP_SERVER, CLIENT_ISN + 1, SERVER_ISN + 1, TcpFlags::PSH_ACK, HTTP_REQUEST),
        tcp_frame(HTTP_SERVER, HTTP_CLIENT, SERVER_ISN + 1, client_next, TcpFlags::PSH_ACK, HTTP_RESPONSE),
        tcp_frame(HTTP_SERVER, HTTP_CLIENT, SERVER_ISN + 1, client_next, TcpFlags::PSH_ACK, HTTP_RESPONSE),
        tcp_frame(HTTP_CLIENT, HTTP_SERVER, client_next, server_next, TcpFlags::FIN_ACK, b""),
    ];
    frames.iter().enumerate().fold(PcapBuilder::new(), |capture, (i, frame)| {
        capture.packet(BASE_TIME + Duration::from_millis(20 * i as u64), frame)
    })
}

// ----------------------------------------------------------------------------
// MySQL conversation
// ----------------------------------------------------------------------------

pub const MYSQL_CLIENT: Endpoint = ([10, 211, 55, 3], 52094);
pub const MYSQL_SERVER: Endpoint = ([10, 211, 55, 2], 3306);
pub const DNS_SERVER: Endpoint = ([10, 211, 55, 1], 53);

const CLIENT_ISN: u32 = 0x5a3c_0000;
const SERVER_ISN: u32 = 0x1f00_0000;

fn mysql_packet(number: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut packet = len.to_le_bytes()[..3].to_vec();
    packet.push(number);
    packet.extend_from_slice(body);
    packet
}

fn mysql_greeting_payload() -> Vec<u8> {
    let mut body = vec![10];
    body.extend_from_slice(b"5.7.29\0");
    body.extend_from_slice(&7u32.to_le_bytes());
    body.extend_from_slice(b"Zq4\x01bWk!\0");
    body.extend_from_slice(&0xf7ffu16.to_le_bytes());
    body.push(33);
    body.extend_from_slice(&0x0002u16.to_le_bytes());
    mysql_packet(0, &body)
}

fn mysql_login_payload() -> Vec<u8> {
    let mut body = Vec::with_capacity(85);
    body.extend_from_slice(&0x0008_8209u32.to_le_bytes());
    body.extend_from_slice(&16_777_216u32.to_le_bytes());
    body.push(0x21);
    body.extend_from_slice(&[0u8; 23]);
    body.extend_from_slice(b"root\0");
    body.push(0x14);
    body.extend_from_slice(&[
        0x6a, 0x2f, 0x8e, 0x11, 0xd3, 0x55, 0x90, 0x0c, 0x42, 0x7b, 0xe1, 0x09, 0xaa, 0x30, 0x5d, 0x71, 0x8c,
        0x02, 0xf4, 0x66,
    ]);
    body.extend_from_slice(b"test\0");
    body.extend_from_slice(b"mysql_native_password\0");
    mysql_packet(1, &body)
}

/// The 155-byte Ethernet/IPv4/TCP frame carrying a MySQL login request for
/// user `root` on schema `test`.
pub fn mysql_login_frame() -> Vec<u8> {
    let server_next = SERVER_ISN + 1 + mysql_greeting_payload().len() as u32;
    tcp_frame_with_timestamps(
        MYSQL_CLIENT,
        MYSQL_SERVER,
        CLIENT_ISN + 1,
        server_next,
        TcpFlags::PSH_ACK,
        (1_001_204, 2_409_118),
        &mysql_login_payload(),
    )
}

/// Frame number of the login request in [`mysql_session_capture`].
pub const MYSQL_LOGIN_INDEX: u64 = 65;

/// Name queried by DNS frame `i` (0-based) of [`mysql_session_capture`].
pub fn dns_query_name(i: u16) -> String {
    format!("host-{:02}.example.com", i)
}

/// A capture whose frame 65 is [`mysql_login_frame`], preceded by 61 DNS
/// queries and the MySQL connection's handshake and greeting, and followed
/// by the server's OK and a query.
pub fn mysql_session_capture() -> PcapBuilder {
    let mut frames: Vec<Vec<u8>> = (0..61u16)
        .map(|i| udp_frame(([10, 211, 55, 3], 40000 + i), DNS_SERVER, &dns_query(0x1000 + i, &dns_query_name(i))))
        .collect();

    let greeting = mysql_greeting_payload();
    let server_next = SERVER_ISN + 1 + greeting.len() as u32;
    let client_next = CLIENT_ISN + 1 + mysql_login_payload().len() as u32;
    let ts = (1_001_200, 0);
    let ok = mysql_packet(2, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
    let mut query = vec![0x03];
    query.extend_from_slice(b"SELECT @@version_comment LIMIT 1");

    frames.push(tcp_frame_with_timestamps(MYSQL_CLIENT, MYSQL_SERVER, CLIENT_ISN, 0, TcpFlags::SYN, ts, b""));
    frames.push(tcp_frame_with_timestamps(MYSQL_SERVER, MYSQL_CLIENT, SERVER_ISN, CLIENT_ISN + 1, TcpFlags::SYN_ACK, ts, b""));
    frames.push(tcp_frame_with_timestamps(
        MYSQL_SERVER,
        MYSQL_CLIENT,
        SERVER_ISN + 1,
        CLIENT_ISN + 1,
        TcpFlags::PSH_ACK,
        ts,
        &greeting,
    ));
    frames.push(mysql_login_frame());
    frames.push(tcp_frame_with_timestamps(MYSQL_SERVER, MYSQL_CLIENT, server_next, client_next, TcpFlags::PSH_ACK, ts, &ok));
    frames.push(tcp_frame_with_timestamps(
        MYSQL_CLIENT,
        MYSQL_SERVER,
        client_next,
        server_next + ok.len() as u32,
        TcpFlags::PSH_ACK,
        ts,
        &mysql_packet(0, &query),
    ));

    frames.iter().enumerate().fold(PcapBuilder::new(), |capture, (i, frame)| {
        capture.packet(BASE_TIME + Duration::from_micros(1_250 * (i as u64 + 1)), frame)
    })
}

/// `n` small UDP frames on one flow, 10 ms apart.
pub fn udp_capture(n: u64) -> PcapBuilder {
    (1..=n).fold(PcapBuilder::new(), |capture, i| {
        let payload = format!("payload {}", i);
        capture.packet(
            BASE_TIME + Duration::from_millis(i * 10),
            &udp_frame(([192, 168, 1, 10], 5000), ([192, 168, 1, 20], 6000), payload.as_bytes()),
        )
    })
}

// ----------------------------------------------------------------------------
// Capture file builders
// ----------------------------------------------------------------------------

/// One record of a capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub at: Duration,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(at: Duration, data: Vec<u8>) -> Self {
        Self { at, orig_len: data.len() as u32, data }
    }
}

/// Builds a little-endian, microsecond pcap file.
///
/// Records are written raw, so lengths the capture layer should reject
/// (zero, or declared shorter than captured) survive into the file.
#[derive(Debug, Clone, Default)]
pub struct PcapBuilder {
    records: Vec<Record>,
}

impl PcapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    /// Append a record whose original length equals its captured length.
    pub fn packet(self, timestamp: Duration, data: &[u8]) -> Self {
        self.record(Record::new(timestamp, data.to_vec()))
    }

    /// Append a record with an explicit original length.
    pub fn packet_with_len(self, timestamp: Duration, data: &[u8], orig_len: u32) -> Self {
        self.record(Record { at: timestamp, orig_len, data: data.to_vec() })
    }

    /// Append a record with zero declared and captured length.
    pub fn empty_packet(self, timestamp: Duration) -> Self {
        self.packet_with_len(timestamp, &[], 0)
    }

    pub fn frames(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn bytes(&self) -> Vec<u8> {
        let header = PcapHeader { endianness: Endianness::Little, snaplen: FIXTURE_SNAPLEN, ..Default::default() };
        let mut writer = PcapWriter::with_header(Vec::with_capacity(4096), header).expect("write pcap header");
        for record in &self.records {
            let packet = RawPcapPacket {
                ts_sec: record.at.as_secs() as u32,
                ts_frac: record.at.subsec_micros(),
                incl_len: record.data.len() as u32,
                orig_len: record.orig_len,
                data: Cow::Borrowed(&record.data),
            };
            writer.write_raw_packet(&packet).expect("write pcap record");
        }
        writer.into_writer()
    }

    pub fn write_temp(&self) -> NamedTempFile {
        write_temp(&self.bytes())
    }
}

impl FromIterator<Record> for PcapBuilder {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self { records: iter.into_iter().collect() }
    }
}

/// Builds a little-endian pcapng file with one Ethernet interface.
#[derive(Debug, Clone)]
pub struct PcapNgBuilder {
    resolution: Option<u8>,
    records: Vec<Record>,
}

impl Default for PcapNgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PcapNgBuilder {
    /// Interface with nanosecond timestamps.
    pub fn new() -> Self {
        Self { resolution: Some(9), records: Vec::new() }
    }

    /// Interface without `if_tsresol`, which means microsecond timestamps.
    pub fn with_default_resolution() -> Self {
        Self { resolution: None, records: Vec::new() }
    }

    /// Append an enhanced packet block on interface 0.
    pub fn packet(mut self, timestamp: Duration, data: &[u8]) -> Self {
        self.records.push(Record::new(timestamp, data.to_vec()));
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut writer =
            PcapNgWriter::with_endianness(Vec::with_capacity(4096), Endianness::Little).expect("write section header");
        let mut interface = InterfaceDescriptionBlock::new(DataLink::ETHERNET, FIXTURE_SNAPLEN);
        if let Some(resolution) = self.resolution {
            interface.options.push(InterfaceDescriptionOption::IfTsResol(resolution));
        }
        writer.write_block(&interface.into_block()).expect("write interface block");

        for record in &self.records {
            // The block stores a raw count of the interface's time units.
            let units = match self.resolution {
                Some(_) => record.at,
                None => Duration::from_nanos(record.at.as_micros() as u64),
            };
            let packet = EnhancedPacketBlock {
                interface_id: 0,
                timestamp: units,
                original_len: record.orig_len,
                data: Cow::Borrowed(&record.data),
                options: vec![],
            };
            writer.write_block(&packet.into_block()).expect("write packet block");
        }
        writer.into_inner()
    }

    pub fn write_temp(&self) -> NamedTempFile {
        write_temp(&self.bytes())
    }
}

/// Write `bytes` to a temporary file that is removed when dropped.
pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("tracewire-")
        .suffix(".pcap")
        .tempfile()
        .expect("create temporary capture file");
    file.write_all(bytes).expect("write temporary capture file");
    file.flush().expect("flush temporary capture file");
    file
}
