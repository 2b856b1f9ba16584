//! Capture fixtures shared by the integration tests

#![allow(dead_code)]

#[path = "../../src/test_utils/fixtures.rs"]
mod fixtures;

pub use fixtures::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("tracewire=debug").with_test_writer().try_init();
}
