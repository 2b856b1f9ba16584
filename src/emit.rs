//! Delivery of dissection results to the host.
//!
//! Offline requests collect results and return them directly. Live captures
//! push each result onto a bounded per-session queue; when the queue is full
//! the capture loop blocks until the consumer catches up or the session is
//! cancelled. Nothing is ever dropped to relieve pressure.

use std::ops::ControlFlow;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::DissectionResult;
use crate::{DissectError, Result};

/// Tracing target the debug echo is written to.
pub const ECHO_TARGET: &str = "tracewire::echo";

/// Receives dissection results in frame order.
pub trait FrameSink {
    /// Deliver one result. `Break` means the consumer is gone and the capture
    /// should stop.
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(DissectionResult) -> ControlFlow<()>,
{
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()> {
        self(result)
    }
}

/// Collects results for a direct return value.
#[derive(Debug, Default)]
pub struct CollectSink {
    records: Vec<DissectionResult>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<DissectionResult> {
        self.records
    }
}

impl FrameSink for CollectSink {
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()> {
        self.records.push(result);
        ControlFlow::Continue(())
    }
}

/// Bounded queue feeding a live capture's consumer.
///
/// Must be driven from a blocking context (such as `spawn_blocking`), never
/// from inside an async task.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Result<DissectionResult>>,
    runtime: Handle,
    cancel: CancellationToken,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<DissectionResult>>, runtime: Handle, cancel: CancellationToken) -> Self {
        Self { tx, runtime, cancel }
    }

    /// Push the terminal error of a failed capture.
    pub fn fail(self, error: DissectError) {
        let tx = self.tx;
        if self.runtime.block_on(tx.send(Err(error))).is_err() {
            debug!("consumer gone before terminal error could be delivered");
        }
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()> {
        let tx = &self.tx;
        let cancel = &self.cancel;
        let sent = self.runtime.block_on(async {
            tokio::select! {
                sent = tx.send(Ok(result)) => sent.is_ok(),
                _ = cancel.cancelled() => false,
            }
        });
        if sent { ControlFlow::Continue(()) } else { ControlFlow::Break(()) }
    }
}

/// Wraps a sink and renders every result to the echo target first.
#[derive(Debug)]
pub struct Echo<K> {
    inner: K,
    enabled: bool,
}

impl<K: FrameSink> Echo<K> {
    pub fn new(inner: K, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    pub fn into_inner(self) -> K {
        self.inner
    }
}

impl<K: FrameSink> FrameSink for Echo<K> {
    fn deliver(&mut self, result: DissectionResult) -> ControlFlow<()> {
        if self.enabled {
            echo(&result);
        }
        self.inner.deliver(result)
    }
}

/// Human-readable rendering of a result's layers.
pub fn render_debug(result: &DissectionResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result.layers())?)
}

/// Write `result` to the echo target.
pub fn echo(result: &DissectionResult) {
    match render_debug(result) {
        Ok(text) => info!(target: ECHO_TARGET, frame = result.number, "{}", text),
        Err(e) => debug!(frame = result.number, error = %e, "debug echo failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HexDump;
    use serde_json::{Map, Value};
    use std::time::Duration;

    fn result(number: u64) -> DissectionResult {
        let mut layers = Map::new();
        layers.insert("frame".into(), Value::Object(Map::new()));
        DissectionResult::new(number, Duration::from_secs(1_600_000_000), HexDump::from_bytes(&[1, 2, 3]), layers)
    }

    #[test]
    fn echo_leaves_result_untouched() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut echo = Echo::new(CollectSink::new(), true);
        let original = result(1);

        assert!(echo.deliver(original.clone()).is_continue());
        assert_eq!(echo.into_inner().into_records(), vec![original]);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        let mut sink = |r: DissectionResult| {
            seen.push(r.number);
            if r.number >= 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        };
        assert!(sink.deliver(result(1)).is_continue());
        assert!(sink.deliver(result(2)).is_break());
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn render_debug_is_pretty_json() {
        let text = render_debug(&result(1)).unwrap();
        assert!(text.contains("\"frame\""));
        assert!(text.contains('\n'));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_blocks_until_drained() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = ChannelSink::new(tx, Handle::current(), cancel);

        let producer = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            (1..=3).map(|n| sink.deliver(result(n)).is_continue()).collect::<Vec<_>>()
        });

        let mut numbers = Vec::new();
        while let Some(item) = rx.recv().await {
            numbers.push(item.unwrap().number);
        }
        assert_eq!(producer.await.unwrap(), vec![true, true, true]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_unblocks_a_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = ChannelSink::new(tx, Handle::current(), cancel.clone());

        let producer = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            let first = sink.deliver(result(1));
            let second = sink.deliver(result(2));
            (first.is_continue(), second.is_break())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(producer.await.unwrap(), (true, true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_consumer_breaks_delivery() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sink = ChannelSink::new(tx, Handle::current(), CancellationToken::new());
        let broke = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            sink.deliver(result(1)).is_break()
        });
        assert!(broke.await.unwrap());
    }
}
