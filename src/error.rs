//! Error types for capture and dissection.
//!
//! Every fallible operation in tracewire returns [`DissectError`]. The variants
//! follow the way failures are handled by the capture machinery:
//!
//! - **Configuration**: bad filter expression, invalid page or page size, missing
//!   capture file. Reported before anything starts.
//! - **Session conflicts**: a key already has a running session.
//! - **Frame-local errors**: a malformed frame or an engine failure on one frame.
//!   Skipped when `ignore_errors` is set, otherwise promoted to a fatal error.
//! - **Source errors**: the packet source failed. Always fatal for the current
//!   capture or offline pass.
//! - **Layer parsing**: no parser for a protocol, a layer absent from the
//!   frame, or a layer whose fields do not decode (reported as a frame error).
//!
//! ```rust
//! use tracewire::DissectError;
//!
//! let error = DissectError::frame(12, "declared length is zero");
//! assert!(error.is_frame_local());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::SessionKey;

/// Result type alias for dissection operations.
pub type Result<T, E = DissectError> = std::result::Result<T, E>;

/// Main error type for capture and dissection operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DissectError {
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Failed to parse options: {0}")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    #[error("Session already active for {key}")]
    SessionConflict { key: SessionKey },

    #[error("No active session for {key}")]
    SessionNotFound { key: SessionKey },

    #[error("Frame {number} rejected: {reason}")]
    Frame { number: u64, reason: String },

    #[error("Dissection engine failed on frame {number}: {reason}")]
    Engine { number: u64, reason: String },

    #[error("Packet source failed: {context}")]
    Source {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Capture file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize dissection result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame {index} not found in capture")]
    FrameNotFound { index: i64 },

    #[error("No parser registered for protocol {protocol}")]
    ParserNotFound { protocol: String },

    #[error("Frame {number} has no {layer} layer")]
    LayerMissing { number: u64, layer: String },

    #[error("Page read failed after counting {total_frames} frames")]
    PageFailed {
        total_frames: u64,
        #[source]
        source: Box<DissectError>,
    },
}

impl DissectError {
    /// Whether this error concerns a single frame and leaves the session usable.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, DissectError::Frame { .. } | DissectError::Engine { .. })
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DissectError::SessionConflict { .. } => true,
            DissectError::Source { .. } => true,
            DissectError::Frame { .. } => false,
            DissectError::Engine { .. } => false,
            DissectError::Configuration { .. } => false,
            DissectError::ConfigParse(_) => false,
            DissectError::SessionNotFound { .. } => false,
            DissectError::File { .. } => false,
            DissectError::Serialization(_) => false,
            DissectError::FrameNotFound { .. } => false,
            DissectError::ParserNotFound { .. } => false,
            DissectError::LayerMissing { .. } => false,
            DissectError::PageFailed { source, .. } => source.is_retryable(),
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DissectError::Configuration { .. } | DissectError::ConfigParse(_) => vec![
                "Check the capture filter syntax",
                "Use a page number and page size of at least 1",
                "Verify the capture file path exists",
            ],
            DissectError::SessionConflict { .. } => vec![
                "Stop the running capture on this key first",
                "Wait for the previous capture to finish",
            ],
            DissectError::SessionNotFound { .. } => vec![
                "Check the device name or file handle",
                "The capture may already have stopped",
            ],
            DissectError::Frame { .. } => vec![
                "Enable ignore_errors to skip malformed frames",
                "Inspect the frame with get_hex_data",
            ],
            DissectError::Engine { .. } => vec![
                "Enable ignore_errors to continue past engine failures",
                "Check TLS key configuration",
            ],
            DissectError::Source { .. } => vec![
                "Verify the interface is still present",
                "Check capture permissions",
                "Verify the capture file is not truncated",
            ],
            DissectError::File { .. } => vec![
                "Check file exists and is readable",
                "Verify the file is a pcap or pcapng capture",
            ],
            DissectError::Serialization(_) => vec!["Report the frame that failed to serialize"],
            DissectError::FrameNotFound { .. } => vec![
                "Frame indexes start at 1",
                "Use count_frames to find the number of frames",
            ],
            DissectError::ParserNotFound { .. } => vec![
                "Register a parser for the protocol first",
                "List registered names with ParserRegistry::protocols",
            ],
            DissectError::LayerMissing { .. } => vec![
                "Check frame.protocols before parsing a layer",
                "Use parse_all to parse only the layers present",
            ],
            DissectError::PageFailed { source, .. } => source.recovery_suggestions(),
        }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        DissectError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for frame validation errors.
    pub fn frame(number: u64, reason: impl Into<String>) -> Self {
        DissectError::Frame { number, reason: reason.into() }
    }

    /// Helper constructor for engine failures on one frame.
    pub fn engine(number: u64, reason: impl Into<String>) -> Self {
        DissectError::Engine { number, reason: reason.into() }
    }

    /// Helper constructor for source failures without an underlying cause.
    pub fn source_failed(context: impl Into<String>) -> Self {
        DissectError::Source { context: context.into(), source: None }
    }

    /// Helper constructor for source failures with an underlying cause.
    pub fn source_failed_with(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DissectError::Source { context: context.into(), source: Some(source.into()) }
    }

    /// Helper constructor for file errors with path context.
    ///
    /// A missing file is reported as a configuration problem since the
    /// operation never started.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return DissectError::Configuration {
                reason: format!("capture file not found: {}", path.display()),
            };
        }
        DissectError::File { path, source }
    }
}

impl From<std::io::Error> for DissectError {
    fn from(err: std::io::Error) -> Self {
        DissectError::Source { context: "I/O failure".to_string(), source: Some(Box::new(err)) }
    }
}

impl From<tokio::task::JoinError> for DissectError {
    fn from(err: tokio::task::JoinError) -> Self {
        DissectError::Source { context: "capture task failed".to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn messages_carry_their_context(
                reason in "[a-z ]{1,40}",
                number in 1u64..1_000_000u64,
                index in any::<i64>(),
            ) {
                let frame = DissectError::frame(number, reason.clone());
                prop_assert!(frame.to_string().contains(&reason));
                prop_assert!(frame.to_string().contains(&number.to_string()));

                let engine = DissectError::engine(number, reason.clone());
                prop_assert!(engine.to_string().contains(&reason));

                let missing = DissectError::FrameNotFound { index };
                prop_assert!(missing.to_string().contains(&index.to_string()));
            }

            #[test]
            fn page_failure_keeps_total_and_classification(
                total in 0u64..100_000u64,
                reason in "[a-z]{1,20}",
            ) {
                let inner = DissectError::source_failed(reason.clone());
                let retryable = inner.is_retryable();
                let err = DissectError::PageFailed { total_frames: total, source: Box::new(inner) };

                prop_assert!(err.to_string().contains(&total.to_string()));
                prop_assert_eq!(err.is_retryable(), retryable);
                let source = std::error::Error::source(&err).map(|s| s.to_string());
                prop_assert!(source.is_some_and(|s| s.contains(&reason)));
            }
        }
    }

    #[test]
    fn frame_local_classification() {
        assert!(DissectError::frame(1, "zero length").is_frame_local());
        assert!(DissectError::engine(1, "bad tree").is_frame_local());
        assert!(!DissectError::source_failed("device gone").is_frame_local());
        assert!(!DissectError::configuration("bad filter").is_frame_local());
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = DissectError::file_error(
            PathBuf::from("/nope.pcap"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, DissectError::Configuration { .. }));

        let err = DissectError::file_error(
            PathBuf::from("/locked.pcap"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, DissectError::File { .. }));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DissectError>();
    }

    #[test]
    fn recovery_methods_work() {
        let conflict = DissectError::SessionConflict { key: SessionKey::device("eth0") };
        assert!(conflict.is_retryable());
        assert!(conflict.to_string().contains("eth0"));

        for err in [
            conflict,
            DissectError::configuration("x"),
            DissectError::source_failed("x"),
            DissectError::FrameNotFound { index: 3 },
            DissectError::ParserNotFound { protocol: "sip".to_string() },
            DissectError::LayerMissing { number: 1, layer: "dns".to_string() },
        ] {
            let suggestions = err.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn io_errors_become_source_errors() {
        let err: DissectError = std::io::Error::other("read failed").into();
        assert!(matches!(err, DissectError::Source { .. }));
        assert!(!err.is_frame_local());
    }
}
