//! Live capture sessions driven through the public API
//!
//! Capture files stand in for interfaces: the opener hands every device key a
//! fresh file source, or an idle source that blocks until cancelled.

mod common;

use anyhow::{Context, Result};
use common::{init_tracing, mysql_session_capture, udp_capture};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracewire::source::opener_fn;
use tracewire::{
    CaptureRequest, DissectError, DissectionResult, FileSource, Options, PacketSource, SessionKey, SourceConfig,
    SourceEvent, SourceOpener, Tracewire,
};

fn replay(path: &Path) -> impl SourceOpener<Source = FileSource> {
    let path: PathBuf = path.to_path_buf();
    opener_fn(move |_: &SessionKey, _: &SourceConfig| FileSource::open(&path))
}

/// An interface on which nothing ever arrives.
struct Idle;

impl PacketSource for Idle {
    fn next_packet(&mut self, cancel: &CancellationToken) -> tracewire::Result<SourceEvent> {
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(SourceEvent::Interrupted)
    }
}

fn idle() -> impl SourceOpener<Source = Idle> {
    opener_fn(|_: &SessionKey, _: &SourceConfig| Ok(Idle))
}

async fn collect(stream: tracewire::CaptureStream) -> Result<Vec<DissectionResult>> {
    let items: Vec<_> = stream.collect().await;
    items.into_iter().collect::<tracewire::Result<Vec<_>>>().context("capture stream failed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_sessions_match_sequential_runs() -> Result<()> {
    init_tracing();
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();
    let sequential = tracewire.get_all_frames(file.path(), Options::new()).await?;

    // Queue depth 1 keeps both capture loops stepping in lockstep with the consumer.
    let a = tracewire.start_capture_with(CaptureRequest::new("a").with_queue_depth(1), replay(file.path())).await?;
    let b = tracewire.start_capture_with(CaptureRequest::new("b").with_queue_depth(1), replay(file.path())).await?;
    let (a, b) = tokio::join!(collect(a), collect(b));

    assert_eq!(a?, sequential);
    assert_eq!(b?, sequential);
    assert!(tracewire.registry().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn count_delivers_at_most_the_available_frames() -> Result<()> {
    let file = udp_capture(12).write_temp();
    let tracewire = Tracewire::new();

    for (count, expected) in [(1, 1), (5, 5), (12, 12), (50, 12), (0, 12), (-1, 12)] {
        let stream = tracewire
            .start_capture_with(CaptureRequest::new("eth0").with_count(count), replay(file.path()))
            .await?;
        let frames = collect(stream).await?;
        assert_eq!(frames.len(), expected, "count {}", count);
        assert_eq!(frames.last().map(|f| f.number), Some(expected as u64));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_on_a_running_device_conflicts() -> Result<()> {
    let tracewire = Tracewire::new();
    let running = tracewire.start_capture_with(CaptureRequest::new("eth0"), idle()).await?;

    let err = tracewire.start_capture_with(CaptureRequest::new("eth0"), idle()).await.unwrap_err();
    assert!(matches!(err, DissectError::SessionConflict { key } if key == SessionKey::device("eth0")));
    assert!(running.handle().is_active());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_then_restart_on_the_same_device() -> Result<()> {
    init_tracing();
    let tracewire = Tracewire::new();

    for _ in 0..3 {
        let stream = tracewire.start_capture_with(CaptureRequest::new("eth0"), idle()).await?;
        tokio::time::timeout(Duration::from_secs(5), tracewire.stop_capture("eth0")).await??;
        assert!(!stream.handle().is_active());
        assert!(collect(stream).await?.is_empty());
    }

    assert!(matches!(tracewire.stop_capture("eth0").await, Err(DissectError::SessionNotFound { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_on_an_unknown_device_is_not_found() {
    let tracewire = Tracewire::new();
    assert!(matches!(tracewire.stop_capture("nope0").await, Err(DissectError::SessionNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_stop_ends_capture() -> Result<()> {
    let tracewire = Tracewire::new();
    let stream = tracewire.start_capture_with(CaptureRequest::new("eth0"), idle()).await?;

    stream.stop();
    tokio::time::timeout(Duration::from_secs(5), stream.closed()).await?;
    assert!(tracewire.registry().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debug_echo_leaves_results_unchanged() -> Result<()> {
    init_tracing();
    let file = udp_capture(3).write_temp();
    let tracewire = Tracewire::new();

    let quiet = collect(tracewire.start_capture_with(CaptureRequest::new("eth0"), replay(file.path())).await?).await?;
    let request = CaptureRequest::new("eth0").with_options(Options::new().with_debug(true));
    let echoed = collect(tracewire.start_capture_with(request, replay(file.path())).await?).await?;

    assert_eq!(quiet, echoed);
    Ok(())
}
