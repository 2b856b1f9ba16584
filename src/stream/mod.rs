//! Stream adapters for live captures

mod capture_stream;

pub use capture_stream::CaptureStream;
