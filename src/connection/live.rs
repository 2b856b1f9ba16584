//! Live capture on network interfaces

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::capture;
use crate::config::Options;
use crate::emit::{ChannelSink, Echo};
use crate::engine::ProtocolDissector;
use crate::registry::SessionKey;
use crate::session::SessionConfig;
use crate::source::{SourceConfig, SourceOpener};
use crate::stream::CaptureStream;
use crate::types::FrameCount;
use crate::{DissectError, Result, Tracewire};

#[cfg(feature = "live")]
use crate::source::{InterfaceInfo, PcapOpener};

/// Results buffered per capture before the capture loop blocks.
pub const DEFAULT_QUEUE_DEPTH: usize = 1000;

/// Default upper bound on a single blocking read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Parameters of one live capture.
///
/// ```rust
/// use tracewire::{CaptureRequest, Options};
///
/// let request = CaptureRequest::new("eth0")
///     .with_filter("tcp port 3306")
///     .with_count(100)
///     .with_options(Options::new().with_descriptive_values(true));
/// assert_eq!(request.count.limit(), Some(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub device: String,
    /// BPF filter expression.
    pub filter: Option<String>,
    pub count: FrameCount,
    pub promiscuous: bool,
    pub read_timeout: Duration,
    pub options: Options,
    pub queue_depth: usize,
}

impl CaptureRequest {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            filter: None,
            count: FrameCount::Unbounded,
            promiscuous: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
            options: Options::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Stop after `count` frames; zero or negative captures until stopped.
    pub fn with_count(mut self, count: i64) -> Self {
        self.count = FrameCount::from_raw(count);
        self
    }

    pub fn with_frame_count(mut self, count: FrameCount) -> Self {
        self.count = count;
        self
    }

    pub fn with_promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::device(self.device.as_str())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            options: self.options.clone(),
            source: SourceConfig {
                filter: self.filter.clone(),
                promiscuous: self.promiscuous,
                read_timeout: self.read_timeout,
                ..SourceConfig::default()
            },
            count: self.count,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(DissectError::configuration("device name is empty"));
        }
        if self.queue_depth == 0 {
            return Err(DissectError::configuration("queue depth must be at least 1"));
        }
        Ok(())
    }
}

impl<D: ProtocolDissector> Tracewire<D> {
    /// Start capturing on a network interface.
    ///
    /// Fails with `SessionConflict` if the device already has a running
    /// capture, and with `Configuration` for a bad filter expression.
    ///
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use tracewire::{CaptureRequest, Tracewire};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> tracewire::Result<()> {
    /// let tracewire = Tracewire::new();
    /// let mut stream = tracewire.start_capture(CaptureRequest::new("eth0").with_count(10)).await?;
    /// while let Some(result) = stream.next().await {
    ///     println!("frame {}", result?.number);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "live")]
    pub async fn start_capture(&self, request: CaptureRequest) -> Result<CaptureStream> {
        self.start_capture_with(request, PcapOpener).await
    }

    /// Start a capture whose packets come from `opener`.
    pub async fn start_capture_with<O: SourceOpener>(&self, request: CaptureRequest, opener: O) -> Result<CaptureStream> {
        request.validate()?;
        let key = request.key();
        let config = request.session_config();
        let debug = config.options.debug;

        let registry = Arc::clone(&self.registry);
        let dissector = Arc::clone(&self.dissector);
        let session =
            tokio::task::spawn_blocking(move || registry.open(key, config, &dissector, &opener)).await??;
        let handle = session.handle();

        // The queue exists before the loop starts and closes only after the
        // session is torn down.
        let (tx, rx) = mpsc::channel(request.queue_depth);
        let sink = ChannelSink::new(tx, Handle::current(), session.cancel_token().clone());
        let pipeline = self.pipeline.clone();

        tokio::task::spawn_blocking(move || {
            let mut sink = Echo::new(sink, debug);
            match capture::run(session, &pipeline, &mut sink) {
                Ok(summary) => debug!(?summary, "capture task finished"),
                Err(e) => sink.into_inner().fail(e),
            }
        });

        info!(device = %request.device, queue_depth = request.queue_depth, "live capture started");
        Ok(CaptureStream::new(rx, handle))
    }

    /// Stop the capture on `device` and wait until its resources are released.
    ///
    /// Fails with `SessionNotFound` if nothing is running on the device or a
    /// stop is already under way.
    pub async fn stop_capture(&self, device: &str) -> Result<()> {
        let handle = self.registry.close(&SessionKey::device(device))?;
        handle.wait_closed().await;
        info!(device, "live capture stopped");
        Ok(())
    }

    /// Interfaces available for capture.
    #[cfg(feature = "live")]
    pub async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        tokio::task::spawn_blocking(crate::source::list_interfaces).await?
    }
}
