//! Packet source seam.
//!
//! A packet source yields raw packets one at a time from a live interface or a
//! capture file. `next_packet` blocks until a packet arrives, the source ends,
//! or the session's cancellation token fires; sources poll the token at least
//! once per read timeout so a stop request interrupts a pending read for that
//! source only.

mod file;
#[cfg(feature = "live")]
mod live;

pub use file::{FileOpener, FileSource};
#[cfg(feature = "live")]
pub use live::{PcapOpener, PcapSource, list_interfaces};

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::registry::SessionKey;
use crate::types::{MAX_STANDARD_PACKET_SIZE, RawPacket};

/// What one read from a packet source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Packet(RawPacket),
    /// The source has no more packets.
    EndOfData,
    /// The session was cancelled while waiting for a packet.
    Interrupted,
}

/// Trait for packet sources.
///
/// Returns:
/// - `Ok(SourceEvent::Packet(_))` - next packet, in capture order
/// - `Ok(SourceEvent::EndOfData)` - normal end of the source
/// - `Ok(SourceEvent::Interrupted)` - `cancel` fired during the read
/// - `Err(e)` - the source failed and cannot continue
pub trait PacketSource: Send + 'static {
    fn next_packet(&mut self, cancel: &CancellationToken) -> Result<SourceEvent>;
}

/// Settings used to open a packet source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Capture filter expression (BPF syntax), live sources only.
    pub filter: Option<String>,
    pub promiscuous: bool,
    /// Upper bound on how long a single read blocks before polling cancellation.
    pub read_timeout: Duration,
    pub snaplen: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            filter: None,
            promiscuous: false,
            read_timeout: Duration::from_millis(1000),
            snaplen: MAX_STANDARD_PACKET_SIZE,
        }
    }
}

/// Opens the packet source for a session key.
pub trait SourceOpener: Send + Sync + 'static {
    type Source: PacketSource;

    fn open(&self, key: &SessionKey, config: &SourceConfig) -> Result<Self::Source>;
}

/// Adapts a closure into a [`SourceOpener`].
pub struct OpenerFn<F>(F);

pub fn opener_fn<F, S>(f: F) -> OpenerFn<F>
where
    F: Fn(&SessionKey, &SourceConfig) -> Result<S> + Send + Sync + 'static,
    S: PacketSource,
{
    OpenerFn(f)
}

impl<F, S> SourceOpener for OpenerFn<F>
where
    F: Fn(&SessionKey, &SourceConfig) -> Result<S> + Send + Sync + 'static,
    S: PacketSource,
{
    type Source = S;

    fn open(&self, key: &SessionKey, config: &SourceConfig) -> Result<S> {
        (self.0)(key, config)
    }
}

/// A capture interface as reported by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: Option<String>,
    pub flags: Vec<String>,
    pub addresses: Vec<InterfaceAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub netmask: Option<IpAddr>,
    pub broadcast: Option<IpAddr>,
}
