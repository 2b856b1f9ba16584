//! Host-facing capture operations on [`Tracewire`](crate::Tracewire)
//!
//! - [`live`]: start and stop interface captures that stream results
//! - [`offline`]: frame, index set, page and whole-file reads of capture files

pub mod live;
pub mod offline;

pub use live::{CaptureRequest, DEFAULT_QUEUE_DEPTH, DEFAULT_READ_TIMEOUT};
pub use offline::Page;
