//! Single-pass offline reader.
//!
//! One pass walks a capture from the first frame to the last (or to the last
//! selected frame when no total is needed). Frames before and between
//! selected ones are registered with the tracker and engine without being
//! materialized, so stateful protocols decode selected frames exactly as they
//! would in a full read. Frames after the selection are only counted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

use crate::emit::{CollectSink, Echo, FrameSink};
use crate::engine::ProtocolDissector;
use crate::pipeline::{FrameOutcome, Pipeline};
use crate::session::Session;
use crate::source::{PacketSource, SourceEvent};
use crate::types::DissectionResult;
use crate::{DissectError, Result};

/// Which frames of a capture to materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSelection {
    All,
    /// `len` frames starting at 1-based frame `start`.
    Range { start: u64, len: u64 },
    /// Sorted, deduplicated 1-based frame numbers.
    Indexes(Vec<u64>),
}

impl FrameSelection {
    /// Normalize raw indexes: non-positive entries are dropped, the rest
    /// sorted and deduplicated.
    pub fn indexes(raw: impl IntoIterator<Item = i64>) -> Self {
        let set: BTreeSet<u64> = raw.into_iter().filter_map(|i| u64::try_from(i).ok()).filter(|&i| i > 0).collect();
        FrameSelection::Indexes(set.into_iter().collect())
    }

    /// The frames of 1-based page `page` with `size` frames per page.
    pub fn page(page: i64, size: i64) -> Result<Self> {
        if page < 1 {
            return Err(DissectError::configuration(format!("page must be at least 1, got {}", page)));
        }
        if size < 1 {
            return Err(DissectError::configuration(format!("page size must be at least 1, got {}", size)));
        }
        let (page, size) = (page as u64, size as u64);
        let start = (page - 1)
            .checked_mul(size)
            .and_then(|skip| skip.checked_add(1))
            .ok_or_else(|| DissectError::configuration("page offset overflows"))?;
        Ok(FrameSelection::Range { start, len: size })
    }

    pub fn contains(&self, number: u64) -> bool {
        match self {
            FrameSelection::All => true,
            FrameSelection::Range { start, len } => number >= *start && number - start < *len,
            FrameSelection::Indexes(indexes) => indexes.binary_search(&number).is_ok(),
        }
    }

    /// Last frame number this selection can match.
    pub fn last(&self) -> Option<u64> {
        match self {
            FrameSelection::All => None,
            FrameSelection::Range { start, len } => Some(start.saturating_add(len.saturating_sub(1))),
            FrameSelection::Indexes(indexes) => Some(indexes.last().copied().unwrap_or(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FrameSelection::All => false,
            FrameSelection::Range { len, .. } => *len == 0,
            FrameSelection::Indexes(indexes) => indexes.is_empty(),
        }
    }
}

/// Everything one pass produced, including a failure that cut it short.
#[derive(Debug)]
pub struct PassOutcome<T = Vec<DissectionResult>> {
    /// Whatever the pass delivered its results to.
    pub records: T,
    /// Frames counted in the pass. Exact whenever `failure` is `None` or a
    /// frame-local error.
    pub total_frames: u64,
    pub failure: Option<DissectError>,
}

impl<T> PassOutcome<T> {
    /// Results, or the failure in place of partial data.
    pub fn into_result(self) -> Result<T> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.records),
        }
    }

    pub fn map_records<U>(self, f: impl FnOnce(T) -> U) -> PassOutcome<U> {
        PassOutcome { records: f(self.records), total_frames: self.total_frames, failure: self.failure }
    }
}

/// Walk `session` once and collect the frames in `selection`.
///
/// See [`read_pass_into`] for how the pass ends.
pub fn read_pass<D, S>(
    session: Session<D, S>,
    pipeline: &Pipeline,
    selection: &FrameSelection,
    count_all: bool,
) -> PassOutcome
where
    D: ProtocolDissector,
    S: PacketSource,
{
    read_pass_into(session, pipeline, selection, count_all, CollectSink::new()).map_records(CollectSink::into_records)
}

/// Walk `session` once and deliver the frames in `selection` to `sink`.
///
/// With `count_all` the pass reads to the end of the source so that
/// `total_frames` is exact; without it the pass stops after the last
/// selected frame, or as soon as `sink` breaks. After a frame-local error
/// (without `ignore_errors`) the engine is no longer called, but counting
/// continues when `count_all` is set. With the `debug` option every
/// delivered result is echoed first.
#[instrument(level = "debug", skip_all, fields(key = %session.key()))]
pub fn read_pass_into<D, S, K>(
    mut session: Session<D, S>,
    pipeline: &Pipeline,
    selection: &FrameSelection,
    count_all: bool,
    sink: K,
) -> PassOutcome<K>
where
    D: ProtocolDissector,
    S: PacketSource,
    K: FrameSink,
{
    let ignore_errors = session.options().ignore_errors;
    let cancel = session.cancel_token().clone();
    let last = selection.last();
    let mut sink = Echo::new(sink, session.options().debug);
    let mut total_frames = 0u64;
    let mut delivered = 0u64;
    let mut failure = None;
    let mut consumer_done = false;

    loop {
        let past_selection = last.is_some_and(|last| total_frames >= last) || consumer_done;
        if past_selection && !count_all {
            break;
        }

        let packet = match session.read() {
            Ok(SourceEvent::Packet(packet)) => packet,
            Ok(SourceEvent::EndOfData) => break,
            Ok(SourceEvent::Interrupted) => {
                failure = Some(DissectError::source_failed("offline read interrupted"));
                break;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        total_frames += 1;
        let number = total_frames;

        if past_selection || failure.is_some() || cancel.is_cancelled() {
            continue;
        }

        let step = if selection.contains(number) {
            pipeline.dissect(&mut session, packet).map(|frame| match frame {
                FrameOutcome::Dissected(result) => {
                    delivered += 1;
                    consumer_done = sink.deliver(result).is_break();
                }
                FrameOutcome::Skipped { number, reason } => debug!(frame = number, %reason, "selected frame skipped"),
            })
        } else {
            pipeline.observe(&mut session, packet).map(drop)
        };

        match step {
            Ok(()) => {}
            Err(e) if e.is_frame_local() && ignore_errors => warn!(error = %e, "frame dropped"),
            Err(e) => failure = Some(e),
        }
    }

    debug!(total = total_frames, records = delivered, failed = failure.is_some(), "offline pass finished");
    session.close();
    PassOutcome { records: sink.into_inner(), total_frames, failure }
}
