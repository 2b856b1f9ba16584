//! Per-frame dissection pipeline.
//!
//! For each raw packet the pipeline:
//!
//! 1. advances the session's frame counter and validates the capture metadata,
//! 2. binds the frame to the session's numbering and cumulative byte total,
//! 3. hands the frame and the tracker's lookback slots to the engine,
//! 4. records the frame in the tracker,
//! 5. serializes the field tree and the hex dump into an owned result.
//!
//! The packet buffer is consumed by the call and released once the result is
//! built, whichever way the call exits.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::engine::{JsonTreeSerializer, ProtocolDissector, TreeSerializer};
use crate::session::Session;
use crate::source::PacketSource;
use crate::types::{DissectionResult, FrameMeta, HexDump, RawPacket, SkipReason};
use crate::Result;

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Dissected(DissectionResult),
    /// The frame failed validation and never reached the engine.
    Skipped { number: u64, reason: SkipReason },
}

impl FrameOutcome {
    pub fn number(&self) -> u64 {
        match self {
            FrameOutcome::Dissected(result) => result.number,
            FrameOutcome::Skipped { number, .. } => *number,
        }
    }

    pub fn into_result(self) -> Option<DissectionResult> {
        match self {
            FrameOutcome::Dissected(result) => Some(result),
            FrameOutcome::Skipped { .. } => None,
        }
    }
}

/// Turns raw packets into dissection results for one session at a time.
#[derive(Clone)]
pub struct Pipeline {
    serializer: Arc<dyn TreeSerializer>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Arc::new(JsonTreeSerializer))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(serializer: Arc<dyn TreeSerializer>) -> Self {
        Self { serializer }
    }

    /// Fully dissect one packet.
    ///
    /// A frame rejected by validation still consumes a sequence number, so
    /// numbering has gaps where frames were dropped. Engine errors are local to
    /// this frame; the tracker has already registered it when they surface.
    pub fn dissect<D, S>(&self, session: &mut Session<D, S>, packet: RawPacket) -> Result<FrameOutcome>
    where
        D: ProtocolDissector,
        S: PacketSource,
    {
        let frame = match Self::admit(session, &packet) {
            Ok(frame) => frame,
            Err((number, reason)) => return Ok(FrameOutcome::Skipped { number, reason }),
        };

        let slots = session.tracker.before_dissect(&frame);
        let tree = session.engine.dissect(&frame, slots, &packet.data);
        session.tracker.after_dissect(&frame);
        let tree = tree?;

        let layers = self.serializer.to_value(&tree, session.options().descriptive_values);
        let hex = HexDump::from_bytes(&packet.data);
        drop(packet);

        trace!(frame = frame.number, layers = layers.len(), "frame dissected");
        Ok(FrameOutcome::Dissected(DissectionResult::new(frame.number, frame.timestamp, hex, layers)))
    }

    /// Register one packet with the tracker and engine without building a result.
    ///
    /// Returns the frame metadata, or `None` when the frame failed validation.
    pub fn observe<D, S>(&self, session: &mut Session<D, S>, packet: RawPacket) -> Result<Option<FrameMeta>>
    where
        D: ProtocolDissector,
        S: PacketSource,
    {
        let frame = match Self::admit(session, &packet) {
            Ok(frame) => frame,
            Err(_) => return Ok(None),
        };

        let slots = session.tracker.before_dissect(&frame);
        let observed = session.engine.observe(&frame, slots, &packet.data);
        session.tracker.after_dissect(&frame);
        observed.map(|()| Some(frame))
    }

    fn admit<D, S>(session: &mut Session<D, S>, packet: &RawPacket) -> std::result::Result<FrameMeta, (u64, SkipReason)>
    where
        D: ProtocolDissector,
        S: PacketSource,
    {
        session.counter += 1;
        let number = session.counter;
        if let Some(reason) = packet.meta.rejection() {
            debug!(frame = number, %reason, "frame skipped");
            return Err((number, reason));
        }
        session.cum_bytes += u64::from(packet.meta.captured_len);
        Ok(FrameMeta::new(number, session.cum_bytes, &packet.meta))
    }
}
