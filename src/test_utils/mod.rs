//! Test utilities: scripted packet sources, a recording engine, and capture
//! file builders.
//!
//! Everything here builds its fixtures in memory, so tests never depend on
//! capture files checked into the repository.

#![cfg(any(test, feature = "benchmark"))]

mod fixtures;

pub use fixtures::*;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::Preferences;
use crate::engine::ProtocolDissector;
use crate::registry::SessionKey;
use crate::source::{PacketSource, SourceConfig, SourceEvent, SourceOpener, opener_fn};
use crate::tracker::TrackerSlots;
use crate::types::{CaptureMeta, FieldNode, FieldTree, FrameMeta, LINKTYPE_ETHERNET, RawPacket};
use crate::{DissectError, Result};

/// A packet as a source would hand it over, numbered `number` for timing.
pub fn raw_packet(number: u64, data: &[u8]) -> RawPacket {
    let meta = CaptureMeta {
        timestamp: BASE_TIME + Duration::from_millis(number * 10),
        declared_len: data.len() as u32,
        captured_len: data.len() as u32,
        offset: 24 + number * 100,
        link_type: LINKTYPE_ETHERNET,
    };
    RawPacket::new(meta, data.to_vec())
}

// ----------------------------------------------------------------------------
// Scripted packet source
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Tail {
    /// Block until cancelled, like an idle interface.
    Hang,
    End,
    Fail(String),
}

/// Packet source that replays a fixed list of packets, then ends, fails, or
/// blocks until cancelled.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    packets: VecDeque<RawPacket>,
    tail: Tail,
    delay: Duration,
}

impl ScriptedSource {
    /// Yield `packets`, then block until the session is cancelled.
    pub fn hanging(packets: Vec<RawPacket>) -> Self {
        Self { packets: packets.into(), tail: Tail::Hang, delay: Duration::ZERO }
    }

    /// Yield `packets`, then report end of data.
    pub fn end(packets: Vec<RawPacket>) -> Self {
        Self { packets: packets.into(), tail: Tail::End, delay: Duration::ZERO }
    }

    /// Yield `packets`, then fail with `reason`.
    pub fn fail(packets: Vec<RawPacket>, reason: &str) -> Self {
        Self { packets: packets.into(), tail: Tail::Fail(reason.to_string()), delay: Duration::ZERO }
    }

    /// Wait `delay` before every packet.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep for up to `duration`, returning early if `cancel` fires.
    fn wait(cancel: &CancellationToken, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        !cancel.is_cancelled()
    }
}

impl PacketSource for ScriptedSource {
    fn next_packet(&mut self, cancel: &CancellationToken) -> Result<SourceEvent> {
        if cancel.is_cancelled() {
            return Ok(SourceEvent::Interrupted);
        }
        if let Some(packet) = self.packets.pop_front() {
            if !self.delay.is_zero() && !Self::wait(cancel, self.delay) {
                return Ok(SourceEvent::Interrupted);
            }
            return Ok(SourceEvent::Packet(packet));
        }
        match &self.tail {
            Tail::End => Ok(SourceEvent::EndOfData),
            Tail::Fail(reason) => Err(DissectError::source_failed(reason.clone())),
            Tail::Hang => loop {
                if !Self::wait(cancel, Duration::from_millis(5)) {
                    return Ok(SourceEvent::Interrupted);
                }
            },
        }
    }
}

/// Opener that builds a fresh scripted source for every session.
pub fn scripted_opener<F>(make: F) -> impl SourceOpener<Source = ScriptedSource>
where
    F: Fn() -> ScriptedSource + Send + Sync + 'static,
{
    opener_fn(move |_: &SessionKey, _: &SourceConfig| Ok(make()))
}

// ----------------------------------------------------------------------------
// Recording dissector
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recording {
    created: u64,
    destroyed: u64,
    dissected: Vec<FrameMeta>,
    observed: Vec<u64>,
    slots: Vec<TrackerSlots>,
}

/// Engine that records every call and builds a small tree per frame.
///
/// Clones share their recording, so a test can keep one clone and hand the
/// other to a session.
#[derive(Debug, Clone, Default)]
pub struct RecordingDissector {
    recording: Arc<Mutex<Recording>>,
    fail_new_session: bool,
    fail_on: Option<u64>,
}

/// Engine session of a [`RecordingDissector`].
#[derive(Debug)]
pub struct RecordingSession {
    id: u64,
    frames_seen: u64,
}

impl RecordingDissector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make session creation fail with a configuration error.
    pub fn fail_new_session(mut self) -> Self {
        self.fail_new_session = true;
        self
    }

    /// Fail with an engine error whenever frame `number` is dissected or observed.
    pub fn fail_on_frame(mut self, number: u64) -> Self {
        self.fail_on = Some(number);
        self
    }

    fn recording(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sessions_created(&self) -> u64 {
        self.recording().created
    }

    pub fn sessions_destroyed(&self) -> u64 {
        self.recording().destroyed
    }

    pub fn live_sessions(&self) -> u64 {
        let recording = self.recording();
        recording.created - recording.destroyed
    }

    pub fn dissected_frames(&self) -> Vec<FrameMeta> {
        self.recording().dissected.clone()
    }

    pub fn dissected_numbers(&self) -> Vec<u64> {
        self.recording().dissected.iter().map(|f| f.number).collect()
    }

    pub fn observed_numbers(&self) -> Vec<u64> {
        self.recording().observed.clone()
    }

    /// Tracker slots passed with every dissect or observe call, in call order.
    pub fn seen_slots(&self) -> Vec<TrackerSlots> {
        self.recording().slots.clone()
    }

    fn check(&self, frame: &FrameMeta) -> Result<()> {
        if self.fail_on == Some(frame.number) {
            return Err(DissectError::engine(frame.number, "scripted engine failure"));
        }
        Ok(())
    }
}

impl ProtocolDissector for RecordingDissector {
    type Session = RecordingSession;

    fn version(&self) -> String {
        "recording".to_string()
    }

    fn new_session(&self, _preferences: &Preferences) -> Result<RecordingSession> {
        if self.fail_new_session {
            return Err(DissectError::configuration("scripted session failure"));
        }
        let mut recording = self.recording();
        recording.created += 1;
        Ok(RecordingSession { id: recording.created, frames_seen: 0 })
    }

    fn dissect(
        &self,
        session: &mut RecordingSession,
        frame: &FrameMeta,
        slots: TrackerSlots,
        _data: &[u8],
    ) -> Result<FieldTree> {
        {
            let mut recording = self.recording();
            recording.slots.push(slots);
            recording.dissected.push(*frame);
        }
        session.frames_seen += 1;
        self.check(frame)?;

        let mut tree = FieldTree::new();
        tree.push(
            FieldNode::protocol("frame", format!("Frame {}", frame.number))
                .with_child(FieldNode::field("frame.number", "Frame Number", frame.number))
                .with_child(FieldNode::field("frame.len", "Frame Length", frame.declared_len))
                .with_child(FieldNode::field("frame.cum_bytes", "Cumulative Bytes", frame.cum_bytes)),
        );
        tree.push(
            FieldNode::protocol("rec", "Recording")
                .with_child(FieldNode::field("rec.session", "Session", session.id))
                .with_child(FieldNode::field("rec.seen", "Frames Seen", session.frames_seen))
                .with_child(FieldNode::field(
                    "rec.prev",
                    "Previous Frame",
                    slots.prev_captured.map_or(0, |f| f.number),
                )),
        );
        Ok(tree)
    }

    fn observe(
        &self,
        session: &mut RecordingSession,
        frame: &FrameMeta,
        slots: TrackerSlots,
        _data: &[u8],
    ) -> Result<()> {
        {
            let mut recording = self.recording();
            recording.slots.push(slots);
            recording.observed.push(frame.number);
        }
        session.frames_seen += 1;
        self.check(frame)
    }

    fn destroy_session(&self, _session: RecordingSession) {
        self.recording().destroyed += 1;
    }
}
