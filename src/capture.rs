//! Capture loop controller.
//!
//! [`run`] drives one session to completion on the calling thread: it pulls
//! packets from the session's source, dissects them, and hands results to a
//! sink in frame order. It returns when the requested count is reached, the
//! session is cancelled, the consumer goes away, or the source ends or fails.
//! The session is consumed and torn down before `run` returns on every path.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::emit::FrameSink;
use crate::engine::ProtocolDissector;
use crate::pipeline::{FrameOutcome, Pipeline};
use crate::session::Session;
use crate::source::{PacketSource, SourceEvent};
use crate::Result;

/// Why a capture loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    /// The requested number of frames was read.
    CountReached,
    /// The session's cancellation token fired.
    Cancelled,
    /// The source has no more packets.
    #[default]
    EndOfData,
    /// The sink stopped accepting results.
    ConsumerClosed,
}

/// Counters from one completed capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub frames_read: u64,
    pub delivered: u64,
    /// Frames dropped by validation.
    pub skipped: u64,
    /// Frames the engine failed on while `ignore_errors` was set.
    pub frame_errors: u64,
    pub stop_reason: StopReason,
}

/// Run `session` until it stops, delivering each result to `sink`.
///
/// Frame-local failures are skipped when the session's options set
/// `ignore_errors`, and end the run otherwise. Source failures always end the
/// run.
#[instrument(level = "info", skip_all, fields(key = %session.key()))]
pub fn run<D, S, K>(mut session: Session<D, S>, pipeline: &Pipeline, sink: &mut K) -> Result<CaptureSummary>
where
    D: ProtocolDissector,
    S: PacketSource,
    K: FrameSink + ?Sized,
{
    let count = session.config().count;
    let ignore_errors = session.options().ignore_errors;
    let cancel = session.cancel_token().clone();
    let mut summary = CaptureSummary::default();

    info!(limit = ?count.limit(), ignore_errors, "capture loop started");

    let stopped = loop {
        if count.is_reached(summary.frames_read) {
            break Ok(StopReason::CountReached);
        }
        if cancel.is_cancelled() {
            break Ok(StopReason::Cancelled);
        }

        let packet = match session.read() {
            Ok(SourceEvent::Packet(packet)) => packet,
            Ok(SourceEvent::EndOfData) => break Ok(StopReason::EndOfData),
            Ok(SourceEvent::Interrupted) => break Ok(StopReason::Cancelled),
            Err(e) => break Err(e),
        };
        summary.frames_read += 1;

        match pipeline.dissect(&mut session, packet) {
            Ok(FrameOutcome::Dissected(result)) => {
                if sink.deliver(result).is_break() {
                    // A sink blocked on a full queue also breaks on cancellation.
                    let reason = if cancel.is_cancelled() { StopReason::Cancelled } else { StopReason::ConsumerClosed };
                    break Ok(reason);
                }
                summary.delivered += 1;
            }
            Ok(FrameOutcome::Skipped { .. }) => summary.skipped += 1,
            Err(e) if e.is_frame_local() && ignore_errors => {
                warn!(error = %e, "frame dropped");
                summary.frame_errors += 1;
            }
            Err(e) => break Err(e),
        }
    };

    session.close();

    match stopped {
        Ok(reason) => {
            summary.stop_reason = reason;
            info!(
                frames = summary.frames_read,
                delivered = summary.delivered,
                skipped = summary.skipped,
                reason = ?reason,
                "capture loop finished"
            );
            Ok(summary)
        }
        Err(e) => {
            debug!(frames = summary.frames_read, delivered = summary.delivered, "capture loop aborted");
            warn!(error = %e, "capture loop failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DissectError;
    use crate::config::Options;
    use crate::emit::CollectSink;
    use crate::registry::{SessionKey, SessionRegistry};
    use crate::session::SessionConfig;
    use crate::test_utils::{RecordingDissector, ScriptedSource, raw_packet, scripted_opener};
    use crate::types::FrameCount;
    use std::ops::ControlFlow;
    use std::sync::Arc;

    fn packets(n: u64) -> Vec<crate::types::RawPacket> {
        (1..=n).map(|i| raw_packet(i, &[0u8; 60])).collect()
    }

    fn open(
        registry: &Arc<SessionRegistry>,
        dissector: &Arc<RecordingDissector>,
        source: ScriptedSource,
        config: SessionConfig,
    ) -> Session<RecordingDissector, ScriptedSource> {
        let source = std::sync::Mutex::new(Some(source));
        let opener = scripted_opener(move || source.lock().unwrap().take().unwrap_or_else(|| ScriptedSource::end(vec![])));
        registry.open(SessionKey::device("eth0"), config, dissector, &opener).unwrap()
    }

    #[test]
    fn count_limit_stops_after_n_frames() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let config = SessionConfig { count: FrameCount::from_raw(3), ..Default::default() };
        let session = open(&registry, &dissector, ScriptedSource::hanging(packets(10)), config);

        let mut sink = CollectSink::new();
        let summary = run(session, &Pipeline::default(), &mut sink).unwrap();

        assert_eq!(summary.stop_reason, StopReason::CountReached);
        assert_eq!(summary.delivered, 3);
        let numbers: Vec<_> = sink.into_records().iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(registry.is_empty());
        assert_eq!(dissector.live_sessions(), 0);
    }

    #[test]
    fn short_source_delivers_what_it_has() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let config = SessionConfig { count: FrameCount::from_raw(10), ..Default::default() };
        let session = open(&registry, &dissector, ScriptedSource::end(packets(4)), config);

        let mut sink = CollectSink::new();
        let summary = run(session, &Pipeline::default(), &mut sink).unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfData);
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn source_failure_tears_down_and_surfaces() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let session = open(&registry, &dissector, ScriptedSource::fail(packets(2), "device vanished"), SessionConfig::default());

        let mut sink = CollectSink::new();
        let err = run(session, &Pipeline::default(), &mut sink).unwrap_err();
        assert!(matches!(err, DissectError::Source { .. }));
        assert_eq!(sink.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(dissector.sessions_destroyed(), 1);
    }

    #[test]
    fn engine_errors_follow_ignore_policy() {
        let registry = Arc::new(SessionRegistry::new());

        let dissector = Arc::new(RecordingDissector::new().fail_on_frame(2));
        let session = open(&registry, &dissector, ScriptedSource::end(packets(4)), SessionConfig::default());
        let err = run(session, &Pipeline::default(), &mut CollectSink::new()).unwrap_err();
        assert!(matches!(err, DissectError::Engine { number: 2, .. }));

        let dissector = Arc::new(RecordingDissector::new().fail_on_frame(2));
        let config = SessionConfig::new(Options::new().with_ignore_errors(true));
        let session = open(&registry, &dissector, ScriptedSource::end(packets(4)), config);
        let mut sink = CollectSink::new();
        let summary = run(session, &Pipeline::default(), &mut sink).unwrap();
        assert_eq!(summary.frame_errors, 1);
        assert_eq!(sink.into_records().iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 3, 4]);
    }

    #[test]
    fn cancellation_before_read_stops_cleanly() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let session = open(&registry, &dissector, ScriptedSource::hanging(packets(2)), SessionConfig::default());
        let handle = registry.close(session.key()).unwrap();

        let summary = run(session, &Pipeline::default(), &mut CollectSink::new()).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.frames_read, 0);
        assert!(!handle.is_active());
    }

    #[test]
    fn consumer_break_stops_loop() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let session = open(&registry, &dissector, ScriptedSource::hanging(packets(5)), SessionConfig::default());

        let mut sink = |_: crate::types::DissectionResult| ControlFlow::Break(());
        let summary = run(session, &Pipeline::default(), &mut sink).unwrap();
        assert_eq!(summary.stop_reason, StopReason::ConsumerClosed);
        assert_eq!(summary.delivered, 0);
        assert!(registry.is_empty());
    }
}
