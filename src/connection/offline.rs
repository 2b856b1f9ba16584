//! Offline reads from capture files
//!
//! Every request opens its own session on the file, makes one sequential
//! pass, and tears the session down before returning. Concurrent requests
//! on the same path never share engine state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Options;
use crate::emit::{CollectSink, FrameSink};
use crate::engine::ProtocolDissector;
use crate::reassembly::{TcpReassembler, TcpStreamStore};
use crate::reader::{self, FrameSelection, PassOutcome};
use crate::session::SessionConfig;
use crate::source::{FileOpener, FileSource, PacketSource, SourceEvent};
use crate::types::{DissectionResult, HexDump};
use crate::{DissectError, Result, Tracewire};

/// One page of a capture and the total frame count of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<DissectionResult>,
    pub total_frames: u64,
    pub page: u64,
    pub size: u64,
}

impl Page {
    /// Pages needed to cover the whole file at this page size.
    pub fn page_count(&self) -> u64 {
        self.total_frames.div_ceil(self.size.max(1))
    }

    pub fn is_last(&self) -> bool {
        self.page >= self.page_count()
    }
}

impl<D: ProtocolDissector> Tracewire<D> {
    async fn pass(&self, path: &Path, options: Options, selection: FrameSelection, count_all: bool) -> Result<PassOutcome> {
        let outcome = self.pass_into(path, options, selection, count_all, CollectSink::new()).await?;
        Ok(outcome.map_records(CollectSink::into_records))
    }

    pub(crate) async fn pass_into<K>(
        &self,
        path: &Path,
        options: Options,
        selection: FrameSelection,
        count_all: bool,
        sink: K,
    ) -> Result<PassOutcome<K>>
    where
        K: FrameSink + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let dissector = Arc::clone(&self.dissector);
        let pipeline = self.pipeline.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<PassOutcome<K>> {
            let key = registry.file_key(&path);
            let session = registry.open(key, SessionConfig::new(options), &dissector, &FileOpener)?;
            Ok(reader::read_pass_into(session, &pipeline, &selection, count_all, sink))
        })
        .await?
    }

    /// Dissect frame `index` (1-based).
    ///
    /// Fails with `FrameNotFound` if the file has no such frame or the frame
    /// cannot be dissected (zero length, oversized).
    pub async fn get_frame(&self, path: impl AsRef<Path>, index: i64, options: Options) -> Result<DissectionResult> {
        if index < 1 {
            return Err(DissectError::FrameNotFound { index });
        }
        let selection = FrameSelection::indexes([index]);
        self.pass(path.as_ref(), options, selection, false)
            .await?
            .into_result()?
            .into_iter()
            .next()
            .ok_or(DissectError::FrameNotFound { index })
    }

    /// Dissect the frames at `indexes`, in ascending order.
    ///
    /// Duplicates are collapsed; non-positive and out-of-range indexes are
    /// omitted from the result.
    pub async fn get_frames(
        &self,
        path: impl AsRef<Path>,
        indexes: impl IntoIterator<Item = i64>,
        options: Options,
    ) -> Result<Vec<DissectionResult>> {
        let selection = FrameSelection::indexes(indexes);
        self.pass(path.as_ref(), options, selection, false).await?.into_result()
    }

    /// Dissect every frame of the file.
    pub async fn get_all_frames(&self, path: impl AsRef<Path>, options: Options) -> Result<Vec<DissectionResult>> {
        self.pass(path.as_ref(), options, FrameSelection::All, true).await?.into_result()
    }

    /// Follow every TCP stream in the file.
    ///
    /// Payload bytes are grouped by stream index in capture order, with
    /// retransmitted bytes dropped.
    pub async fn follow_tcp_streams(&self, path: impl AsRef<Path>, options: Options) -> Result<TcpStreamStore> {
        let options = options.with_descriptive_values(false);
        let outcome = self.pass_into(path.as_ref(), options, FrameSelection::All, true, TcpReassembler::new()).await?;
        let reassembler = outcome.into_result()?;
        info!(
            streams = reassembler.store().len(),
            retransmitted = reassembler.retransmitted(),
            "tcp streams followed"
        );
        Ok(reassembler.into_store())
    }

    /// Dissect page `page` (1-based) of `size` frames and count the whole file.
    ///
    /// A page read that fails still reports how many frames the file holds
    /// through [`DissectError::PageFailed`].
    ///
    /// ```rust,no_run
    /// use tracewire::{Options, Tracewire};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> tracewire::Result<()> {
    /// let tracewire = Tracewire::new();
    /// let page = tracewire.get_page("capture.pcap", 1, 50, Options::new()).await?;
    /// println!("{} of {} frames", page.records.len(), page.total_frames);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_page(&self, path: impl AsRef<Path>, page: i64, size: i64, options: Options) -> Result<Page> {
        let selection = FrameSelection::page(page, size)?;
        let outcome = self.pass(path.as_ref(), options, selection, true).await?;
        match outcome.failure {
            Some(source) => Err(DissectError::PageFailed { total_frames: outcome.total_frames, source: Box::new(source) }),
            None => {
                debug!(page, size, total = outcome.total_frames, records = outcome.records.len(), "page read");
                Ok(Page { records: outcome.records, total_frames: outcome.total_frames, page: page as u64, size: size as u64 })
            }
        }
    }

    /// Number of frames in the file. Nothing is dissected.
    pub async fn count_frames(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || scan(&path, |_, _| false).map(|(count, _)| count)).await?
    }

    /// Hex dump of frame `index` (1-based) without dissecting anything.
    pub async fn get_hex_data(&self, path: impl AsRef<Path>, index: i64) -> Result<HexDump> {
        let Ok(target) = u64::try_from(index) else {
            return Err(DissectError::FrameNotFound { index });
        };
        let path = path.as_ref().to_path_buf();
        let found = tokio::task::spawn_blocking(move || {
            scan(&path, |number, data| number == target && data.is_some()).map(|(_, hex)| hex)
        })
        .await??;
        found.ok_or(DissectError::FrameNotFound { index })
    }
}

/// Walk `path` without a session. `stop` sees each frame number and, for
/// frames that would pass validation, the raw bytes; returning `true` ends
/// the walk with that frame's hex dump.
fn scan(path: &Path, stop: impl Fn(u64, Option<&[u8]>) -> bool) -> Result<(u64, Option<HexDump>)> {
    let mut source = FileSource::open(path)?;
    let cancel = CancellationToken::new();
    let mut count = 0u64;
    loop {
        match source.next_packet(&cancel)? {
            SourceEvent::Packet(packet) => {
                count += 1;
                let data = packet.meta.rejection().is_none().then_some(packet.data.as_slice());
                if stop(count, data) {
                    return Ok((count, data.map(HexDump::from_bytes)));
                }
            }
            SourceEvent::EndOfData | SourceEvent::Interrupted => {
                info!(path = %path.display(), frames = count, "capture file scanned");
                return Ok((count, None));
            }
        }
    }
}
