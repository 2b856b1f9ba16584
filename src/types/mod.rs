//! Core types for frames, capture metadata and dissection output.
//!
//! - [`CaptureMeta`] and [`RawPacket`] describe what a packet source delivers
//! - [`FrameMeta`] binds a packet to a session's numbering and byte totals
//! - [`FieldTree`] is the engine's output for one frame
//! - [`DissectionResult`] is the fully owned, serialized record handed to callers

mod dissection;
mod frame;
mod frame_count;
mod hex_dump;

pub use dissection::{DissectionResult, FieldNode, FieldTree, LayerDocument, capture_time};
pub use frame::{
    CaptureMeta, FrameMeta, LINKTYPE_ETHERNET, LINKTYPE_IPV4, LINKTYPE_IPV6, LINKTYPE_RAW,
    MAX_STANDARD_PACKET_SIZE, RawPacket, SkipReason,
};
pub use frame_count::FrameCount;
pub use hex_dump::{BYTES_PER_ROW, HexDump};
