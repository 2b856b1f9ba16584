//! Per-session lookback state threaded through every dissected frame.
//!
//! Stateful protocols need to know which frame came before the current one
//! (relative time, TCP sequence analysis, reassembly). The tracker keeps three
//! slots and hands a snapshot of them to the engine for each frame:
//!
//! - `reference`: the anchor frame for relative timestamps, the first frame seen
//! - `prev_displayed`: the last frame that went through dissection
//! - `prev_captured`: the last frame that was registered at all
//!
//! The required call order per frame is [`FrameContextTracker::before_dissect`],
//! engine work, then [`FrameContextTracker::after_dissect`]. Frames that are only
//! observed (never fully dissected) must still go through both calls so the
//! slots stay aligned with the engine's own state.

use std::time::Duration;

use crate::types::FrameMeta;

/// Snapshot of the lookback slots for one dissection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerSlots {
    pub reference: Option<FrameMeta>,
    pub prev_displayed: Option<FrameMeta>,
    pub prev_captured: Option<FrameMeta>,
}

impl TrackerSlots {
    /// Time since the previous captured frame.
    pub fn time_delta(&self, frame: &FrameMeta) -> Duration {
        since(self.prev_captured.as_ref(), frame)
    }

    /// Time since the previous displayed frame.
    pub fn time_delta_displayed(&self, frame: &FrameMeta) -> Duration {
        since(self.prev_displayed.as_ref(), frame)
    }

    /// Time since the reference frame.
    pub fn time_relative(&self, frame: &FrameMeta) -> Duration {
        since(self.reference.as_ref(), frame)
    }
}

fn since(anchor: Option<&FrameMeta>, frame: &FrameMeta) -> Duration {
    anchor.map_or(Duration::ZERO, |anchor| frame.timestamp.saturating_sub(anchor.timestamp))
}

/// Rolling reference/previous-displayed/previous-captured pointers for one session.
#[derive(Debug, Default)]
pub struct FrameContextTracker {
    reference: Option<FrameMeta>,
    prev_displayed: Option<FrameMeta>,
    prev_captured: Option<FrameMeta>,
    registered: u64,
}

impl FrameContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> TrackerSlots {
        TrackerSlots {
            reference: self.reference,
            prev_displayed: self.prev_displayed,
            prev_captured: self.prev_captured,
        }
    }

    /// Prepare the slots for `frame` and return the snapshot the engine must see.
    ///
    /// The first frame of a session becomes the reference frame.
    pub fn before_dissect(&mut self, frame: &FrameMeta) -> TrackerSlots {
        if self.reference.is_none() {
            self.reference = Some(*frame);
        }
        self.slots()
    }

    /// Record `frame` as both the previous displayed and previous captured frame.
    pub fn after_dissect(&mut self, frame: &FrameMeta) {
        self.prev_displayed = Some(*frame);
        self.prev_captured = Some(*frame);
        self.registered += 1;
    }

    /// Frames registered since the session started.
    pub fn registered(&self) -> u64 {
        self.registered
    }
}
