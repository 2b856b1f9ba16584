//! Capture-side frame metadata and owned raw packets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest captured length a frame may carry before it is rejected.
pub const MAX_STANDARD_PACKET_SIZE: u32 = 262_144;

/// Link-layer type for Ethernet captures.
pub const LINKTYPE_ETHERNET: u32 = 1;
/// Link-layer type for raw IP captures.
pub const LINKTYPE_RAW: u32 = 101;
/// Link-layer type for raw IPv4 captures.
pub const LINKTYPE_IPV4: u32 = 228;
/// Link-layer type for raw IPv6 captures.
pub const LINKTYPE_IPV6: u32 = 229;

/// Metadata reported by the packet source for one captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    /// Length of the packet on the wire.
    pub declared_len: u32,
    /// Number of bytes actually captured.
    pub captured_len: u32,
    /// Absolute byte offset of the packet record in the source.
    pub offset: u64,
    /// Link-layer type of the packet data.
    pub link_type: u32,
}

impl CaptureMeta {
    /// Returns why a frame with this metadata cannot be dissected, if it cannot.
    pub fn rejection(&self) -> Option<SkipReason> {
        if self.declared_len == 0 {
            Some(SkipReason::ZeroLength)
        } else if self.captured_len > MAX_STANDARD_PACKET_SIZE {
            Some(SkipReason::Oversized { captured_len: self.captured_len })
        } else {
            None
        }
    }
}

/// Why the pipeline dropped a frame before it reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    ZeroLength,
    Oversized { captured_len: u32 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ZeroLength => f.write_str("declared length is zero"),
            SkipReason::Oversized { captured_len } => write!(
                f,
                "captured length {} exceeds maximum of {}",
                captured_len, MAX_STANDARD_PACKET_SIZE
            ),
        }
    }
}

/// One packet as handed over by a packet source.
///
/// The buffer is owned by the packet and released once the pipeline has
/// produced a result for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub meta: CaptureMeta,
    pub data: Vec<u8>,
}

impl RawPacket {
    pub fn new(meta: CaptureMeta, data: Vec<u8>) -> Self {
        Self { meta, data }
    }
}

/// Frame metadata bound to a session's numbering and byte totals.
///
/// This is what the dissection engine and the frame context tracker see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// 1-based sequence number within the session.
    pub number: u64,
    pub timestamp: Duration,
    pub declared_len: u32,
    pub captured_len: u32,
    pub offset: u64,
    /// Captured bytes of all frames before this one, plus this frame.
    pub cum_bytes: u64,
    pub link_type: u32,
}

impl FrameMeta {
    pub fn new(number: u64, cum_bytes: u64, meta: &CaptureMeta) -> Self {
        Self {
            number,
            timestamp: meta.timestamp,
            declared_len: meta.declared_len,
            captured_len: meta.captured_len,
            offset: meta.offset,
            cum_bytes,
            link_type: meta.link_type,
        }
    }
}
