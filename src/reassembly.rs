//! TCP stream following over dissection results.
//!
//! The reassembler reads the fields the TCP dissector already produced
//! (`tcp.stream`, `tcp.seq_raw`, `tcp.payload`, addresses and ports), so it
//! works on any engine that emits them. Each direction of a stream keeps the
//! highest sequence end seen; segments wholly behind it are retransmissions
//! and are dropped, partial overlaps are trimmed to their new bytes.
//! Segments otherwise stay in capture order.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use tracing::trace;

use crate::emit::FrameSink;
use crate::types::DissectionResult;

/// Payload carried by one frame of a TCP stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSegment {
    pub stream_id: u32,
    /// Frame number the bytes arrived in.
    pub packet_id: u64,
    /// `ip:port` of the sender (`[ip]:port` for IPv6).
    pub src: String,
    pub dst: String,
    /// Capture time in epoch seconds.
    pub timestamp: f64,
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
}

fn serialize_hex<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&data.iter().map(|b| format!("{:02x}", b)).collect::<String>())
}

/// Followed streams keyed by stream index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TcpStreamStore {
    streams: BTreeMap<u32, Vec<StreamSegment>>,
}

impl TcpStreamStore {
    pub fn stream(&self, id: u32) -> Option<&[StreamSegment]> {
        self.streams.get(&id).map(Vec::as_slice)
    }

    /// Streams in index order.
    pub fn streams(&self) -> impl Iterator<Item = (u32, &[StreamSegment])> {
        self.streams.iter().map(|(id, segments)| (*id, segments.as_slice()))
    }

    /// Both directions of stream `id` concatenated in capture order.
    pub fn payload(&self, id: u32) -> Vec<u8> {
        self.segments_where(id, |_| true)
    }

    /// Bytes sent by `src` on stream `id`.
    pub fn payload_from(&self, id: u32, src: &str) -> Vec<u8> {
        self.segments_where(id, |segment| segment.src == src)
    }

    fn segments_where(&self, id: u32, keep: impl Fn(&StreamSegment) -> bool) -> Vec<u8> {
        self.stream(id)
            .unwrap_or_default()
            .iter()
            .filter(|segment| keep(segment))
            .flat_map(|segment| segment.data.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Collects TCP payloads into a [`TcpStreamStore`] as frames go by.
#[derive(Debug, Default)]
pub struct TcpReassembler {
    store: TcpStreamStore,
    /// Highest raw sequence end seen per stream and sender.
    next_seq: HashMap<(u32, String), u32>,
    retransmitted: u64,
}

impl TcpReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the payload of `result` if it carries new TCP bytes.
    ///
    /// Returns whether any bytes were added.
    pub fn push(&mut self, result: &DissectionResult) -> bool {
        let Some(segment) = Segment::read(result) else {
            return false;
        };
        let end = segment.seq.wrapping_add(segment.data.len() as u32);
        let key = (segment.stream_id, segment.src.clone());

        let skip = match self.next_seq.get(&key) {
            Some(&seen) => {
                let behind = seen.wrapping_sub(segment.seq) as i32;
                if end.wrapping_sub(seen) as i32 <= 0 {
                    trace!(frame = result.number, stream = segment.stream_id, "retransmitted segment dropped");
                    self.retransmitted += 1;
                    return false;
                }
                behind.max(0) as usize
            }
            None => 0,
        };
        self.next_seq.insert(key, end);

        let timestamp = number(result, "frame.time_epoch").unwrap_or_default();
        self.store.streams.entry(segment.stream_id).or_default().push(StreamSegment {
            stream_id: segment.stream_id,
            packet_id: result.number,
            src: segment.src,
            dst: segment.dst,
            timestamp,
            data: segment.data[skip..].to_vec(),
        });
        true
    }

    /// Segments dropped as already-seen bytes.
    pub fn retransmitted(&self) -> u64 {
        self.retransmitted
    }

    pub fn store(&self) -> &TcpStreamStore {
        &self.store
    }

    pub fn into_store(self) -> TcpStreamStore {
        self.store
    }
}

impl FrameSink for TcpReassembler {
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()> {
        self.push(&result);
        ControlFlow::Continue(())
    }
}

struct Segment {
    stream_id: u32,
    seq: u32,
    src: String,
    dst: String,
    data: Vec<u8>,
}

impl Segment {
    fn read(result: &DissectionResult) -> Option<Self> {
        let data = decode_hex(result.field_str("tcp.payload")?)?;
        if data.is_empty() {
            return None;
        }
        let (src, dst) = match (result.field_str("ip.src"), result.field_str("ip.dst")) {
            (Some(src), Some(dst)) => (src.to_string(), dst.to_string()),
            _ => (
                format!("[{}]", result.field_str("ipv6.src")?),
                format!("[{}]", result.field_str("ipv6.dst")?),
            ),
        };
        let srcport: u16 = number(result, "tcp.srcport")?;
        let dstport: u16 = number(result, "tcp.dstport")?;
        Some(Self {
            stream_id: number(result, "tcp.stream")?,
            seq: number(result, "tcp.seq_raw")?,
            src: format!("{}:{}", src, srcport),
            dst: format!("{}:{}", dst, dstport),
            data,
        })
    }
}

/// Leading number of a raw or descriptive field value.
fn number<T: std::str::FromStr>(result: &DissectionResult, key: &str) -> Option<T> {
    result.field_str(key)?.split_whitespace().next()?.parse().ok()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    text.split(':').filter(|byte| !byte.is_empty()).map(|byte| u8::from_str_radix(byte, 16).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HexDump;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn segment(number: u64, stream: u32, from_client: bool, seq: u32, payload: &str) -> DissectionResult {
        let (src, dst, sport, dport) =
            if from_client { ("10.0.0.1", "10.0.0.2", "51000", "80") } else { ("10.0.0.2", "10.0.0.1", "80", "51000") };
        let layers = json!({
            "frame": {"frame.number": number.to_string(), "frame.time_epoch": format!("{}.500000000", number)},
            "ip": {"ip.src": src, "ip.dst": dst},
            "tcp": {
                "tcp.srcport": sport,
                "tcp.dstport": dport,
                "tcp.stream": stream.to_string(),
                "tcp.seq_raw": seq.to_string(),
                "tcp.payload": payload,
            },
        });
        let Value::Object(layers) = layers else { unreachable!() };
        DissectionResult::new(number, Duration::from_secs(number), HexDump::from_bytes(b""), layers)
    }

    #[test]
    fn directions_keep_capture_order() {
        let mut reassembler = TcpReassembler::new();
        assert!(reassembler.push(&segment(1, 0, true, 100, "41:42")));
        assert!(reassembler.push(&segment(2, 0, false, 500, "78")));
        assert!(reassembler.push(&segment(3, 0, true, 102, "43")));

        let store = reassembler.into_store();
        assert_eq!(store.payload(0), b"ABxC");
        assert_eq!(store.payload_from(0, "10.0.0.1:51000"), b"ABC");
        assert_eq!(store.payload_from(0, "10.0.0.2:80"), b"x");

        let first = &store.stream(0).unwrap()[0];
        assert_eq!(first.packet_id, 1);
        assert_eq!(first.dst, "10.0.0.2:80");
        assert_eq!(first.timestamp, 1.5);
    }

    #[test]
    fn retransmission_is_dropped_and_overlap_trimmed() {
        let mut reassembler = TcpReassembler::new();
        reassembler.push(&segment(1, 0, true, 100, "41:42"));
        assert!(!reassembler.push(&segment(2, 0, true, 100, "41:42")));
        assert!(reassembler.push(&segment(3, 0, true, 101, "42:43:44")));

        assert_eq!(reassembler.retransmitted(), 1);
        assert_eq!(reassembler.store().payload(0), b"ABCD");
    }

    #[test]
    fn sequence_wrap_is_not_a_retransmission() {
        let mut reassembler = TcpReassembler::new();
        reassembler.push(&segment(1, 0, true, u32::MAX - 1, "01:02"));
        assert!(reassembler.push(&segment(2, 0, true, 0, "03")));
        assert_eq!(reassembler.store().payload(0), vec![1, 2, 3]);
    }

    #[test]
    fn streams_are_kept_apart() {
        let mut reassembler = TcpReassembler::new();
        reassembler.push(&segment(1, 1, true, 7, "62"));
        reassembler.push(&segment(2, 0, true, 7, "61"));

        let store = reassembler.into_store();
        assert_eq!(store.len(), 2);
        assert_eq!(store.streams().map(|(id, _)| id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(store.payload(1), b"b");
        assert!(store.payload(9).is_empty());
    }

    #[test]
    fn frames_without_payload_are_ignored() {
        let mut reassembler = TcpReassembler::new();
        let Value::Object(layers) = json!({"udp": {"udp.srcport": "53"}}) else { unreachable!() };
        let udp = DissectionResult::new(1, Duration::ZERO, HexDump::from_bytes(b""), layers);
        assert!(!reassembler.push(&udp));
        assert!(reassembler.store().is_empty());
    }
}
