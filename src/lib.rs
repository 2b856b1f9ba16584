//! Session-aware packet dissection for live interfaces and capture files.
//!
//! Tracewire turns raw packets into owned, JSON-shaped dissection results.
//! Every capture target gets its own session: a dissection engine session, a
//! packet source, a frame context tracker and frame counters. Stateful
//! protocols (TCP sequence analysis, conversation indexes, relative times)
//! therefore decode the same whether sessions run alone or side by side.
//!
//! # Features
//!
//! - **Live capture**: per-device streams with backpressure and cooperative stop
//!   (`live` feature, requires libpcap)
//! - **Offline reads**: single frames, index sets, pages and whole files from
//!   pcap and pcapng captures, each in one sequential pass
//! - **Pluggable engines**: any [`ProtocolDissector`]; a built-in reference
//!   dissector covers Ethernet, IPv4/IPv6, TCP, UDP, DNS, HTTP/1.x and MySQL
//! - **Typed layers**: [`layers`] reads common protocol fields out of results,
//!   and a [`ParserRegistry`] looks parsers up by protocol name
//! - **Stream following**: [`Tracewire::follow_tcp_streams`] regroups TCP
//!   payloads by stream
//!
//! # Quick Start
//!
//! ## Example (offline page)
//!
//! ```rust,no_run
//! use tracewire::{Options, Tracewire};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracewire = Tracewire::new();
//!     let page = tracewire.get_page("capture.pcap", 1, 20, Options::new()).await?;
//!
//!     for frame in &page.records {
//!         println!("{}: {:?}", frame.number, frame.field_str("frame.protocols"));
//!     }
//!     println!("{} frames in file", page.total_frames);
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils/mod.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Session machinery
pub mod capture;
pub mod emit;
pub mod engine;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod session;
pub mod source;
pub mod tracker;

// Host-facing surface
pub mod connection;
pub mod layers;
pub mod reassembly;
pub mod stream;

// Core exports
pub use config::{Options, Preferences, TlsConf, TlsKey};
pub use error::*;
pub use types::*;

// Session exports
pub use capture::{CaptureSummary, StopReason};
pub use engine::{BuiltinDissector, JsonTreeSerializer, ProtocolDissector, TreeSerializer};
pub use pipeline::{FrameOutcome, Pipeline};
pub use reader::FrameSelection;
pub use registry::{SessionHandle, SessionKey, SessionRegistry};
pub use session::{Session, SessionConfig};
pub use source::{FileOpener, FileSource, InterfaceInfo, PacketSource, SourceConfig, SourceEvent, SourceOpener};
#[cfg(feature = "live")]
pub use source::{PcapOpener, PcapSource};

// Main API exports
pub use connection::{CaptureRequest, Page};
pub use layers::ParserRegistry;
pub use reassembly::{StreamSegment, TcpReassembler, TcpStreamStore};
pub use stream::CaptureStream;

use std::sync::Arc;

/// Entry point for live captures and offline reads.
///
/// Owns the session registry, so at most one capture runs per device for
/// each `Tracewire` value. Clones share the registry.
///
/// # Examples
///
/// ## Live capture
///
/// Requires the `live` feature.
///
/// ```rust,ignore
/// use futures::StreamExt;
/// use tracewire::{CaptureRequest, Tracewire};
///
/// # #[tokio::main]
/// # async fn main() -> tracewire::Result<()> {
/// let tracewire = Tracewire::new();
/// let mut frames = tracewire.start_capture(CaptureRequest::new("eth0").with_filter("tcp")).await?;
/// while let Some(frame) = frames.next().await {
///     let frame = frame?;
///     println!("{} {:?}", frame.number, frame.field_str("tcp.dstport"));
/// }
/// # Ok(())
/// # }
/// ```
///
/// ## Single frame from a file
/// ```rust,no_run
/// use tracewire::{Options, Tracewire};
///
/// # #[tokio::main]
/// # async fn main() -> tracewire::Result<()> {
/// let tracewire = Tracewire::new();
/// let frame = tracewire.get_frame("login.pcap", 65, Options::new().with_descriptive_values(true)).await?;
/// println!("{}", serde_json::to_string_pretty(&frame)?);
/// # Ok(())
/// # }
/// ```
pub struct Tracewire<D: ProtocolDissector = BuiltinDissector> {
    registry: Arc<SessionRegistry>,
    dissector: Arc<D>,
    pipeline: Pipeline,
}

impl Tracewire {
    /// Tracewire over the built-in dissector.
    pub fn new() -> Self {
        Self::with_dissector(BuiltinDissector::new())
    }
}

impl Default for Tracewire {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ProtocolDissector> Tracewire<D> {
    pub fn with_dissector(dissector: D) -> Self {
        Self { registry: Arc::new(SessionRegistry::new()), dissector: Arc::new(dissector), pipeline: Pipeline::default() }
    }

    /// Replace the serializer that renders field trees.
    pub fn with_serializer(mut self, serializer: Arc<dyn TreeSerializer>) -> Self {
        self.pipeline = Pipeline::new(serializer);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn dissector(&self) -> &D {
        &self.dissector
    }
}

impl<D: ProtocolDissector> Clone for Tracewire<D> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry), dissector: Arc::clone(&self.dissector), pipeline: self.pipeline.clone() }
    }
}

impl<D: ProtocolDissector> std::fmt::Debug for Tracewire<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracewire")
            .field("engine", &self.dissector.version())
            .field("active_sessions", &self.registry.len())
            .finish()
    }
}
