//! Stream of results from one live capture

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::Result;
use crate::registry::{SessionHandle, SessionKey};
use crate::types::DissectionResult;

/// Cancels the session when the consumer goes away.
#[derive(Debug)]
struct StopOnDrop {
    handle: SessionHandle,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.handle.is_active() && !self.handle.is_stop_requested() {
            debug!(key = %self.handle.key(), "capture stream dropped, cancelling session");
            self.handle.cancel();
        }
    }
}

pin_project! {
    /// Results of a live capture, in frame order.
    ///
    /// Yields `Ok` for each dissected frame. A capture that fails ends with
    /// one `Err` item; a capture that stops normally just ends. The stream
    /// ends only after the session has released its handles and left the
    /// registry, so the key can be reused as soon as `next()` returns `None`.
    ///
    /// Dropping the stream cancels the capture.
    #[derive(Debug)]
    pub struct CaptureStream {
        #[pin]
        inner: ReceiverStream<Result<DissectionResult>>,
        guard: StopOnDrop,
    }
}

impl CaptureStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<DissectionResult>>, handle: SessionHandle) -> Self {
        Self { inner: ReceiverStream::new(rx), guard: StopOnDrop { handle } }
    }

    pub fn key(&self) -> &SessionKey {
        self.guard.handle.key()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.guard.handle
    }

    /// Ask the capture to stop. Results already queued are still yielded.
    pub fn stop(&self) {
        self.guard.handle.cancel();
    }

    /// Resolves once the session behind this stream has torn down.
    pub async fn closed(&self) {
        self.guard.handle.wait_closed().await;
    }
}

impl Stream for CaptureStream {
    type Item = Result<DissectionResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
