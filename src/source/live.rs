//! Live interface capture through libpcap.

use std::time::Duration;

use pcap::{Active, Capture, Device, Error as PcapError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{InterfaceAddress, InterfaceInfo, PacketSource, SourceConfig, SourceEvent, SourceOpener};
use crate::registry::SessionKey;
use crate::types::{CaptureMeta, RawPacket};
use crate::{DissectError, Result};

/// Packet source reading from a network interface.
pub struct PcapSource {
    device: String,
    capture: Capture<Active>,
    link_type: u32,
    bytes_seen: u64,
}

impl std::fmt::Debug for PcapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcapSource").field("device", &self.device).field("link_type", &self.link_type).finish()
    }
}

impl PcapSource {
    pub fn open(device: &str, config: &SourceConfig) -> Result<Self> {
        let timeout_ms = i32::try_from(config.read_timeout.as_millis()).unwrap_or(i32::MAX).max(1);
        let snaplen = i32::try_from(config.snaplen).unwrap_or(i32::MAX);
        let mut capture = Capture::from_device(device)
            .map_err(|e| DissectError::source_failed_with(format!("unknown device {}", device), e))?
            .promisc(config.promiscuous)
            .snaplen(snaplen)
            .timeout(timeout_ms)
            .open()
            .map_err(|e| DissectError::source_failed_with(format!("failed to open device {}", device), e))?;

        if let Some(filter) = config.filter.as_deref().filter(|f| !f.is_empty()) {
            capture.filter(filter, true).map_err(|e| {
                DissectError::configuration(format!("bad capture filter {:?}: {}", filter, e))
            })?;
        }

        let link_type = u32::try_from(capture.get_datalink().0).unwrap_or_default();
        info!(device, link_type, promiscuous = config.promiscuous, "live capture opened");
        Ok(Self { device: device.to_string(), capture, link_type, bytes_seen: 0 })
    }
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self, cancel: &CancellationToken) -> Result<SourceEvent> {
        loop {
            if cancel.is_cancelled() {
                debug!(device = %self.device, "capture read interrupted");
                return Ok(SourceEvent::Interrupted);
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts;
                    let timestamp = Duration::new(
                        u64::try_from(ts.tv_sec).unwrap_or_default(),
                        u32::try_from(ts.tv_usec).unwrap_or_default().saturating_mul(1000),
                    );
                    let meta = CaptureMeta {
                        timestamp,
                        declared_len: packet.header.len,
                        captured_len: packet.header.caplen,
                        offset: self.bytes_seen,
                        link_type: self.link_type,
                    };
                    self.bytes_seen += u64::from(packet.header.caplen);
                    return Ok(SourceEvent::Packet(RawPacket::new(meta, packet.data.to_vec())));
                }
                Err(PcapError::TimeoutExpired) => continue,
                Err(PcapError::NoMorePackets) => return Ok(SourceEvent::EndOfData),
                Err(e) => {
                    return Err(DissectError::source_failed_with(
                        format!("capture on {} failed", self.device),
                        e,
                    ));
                }
            }
        }
    }
}

/// Opens [`PcapSource`]s for device session keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapOpener;

impl SourceOpener for PcapOpener {
    type Source = PcapSource;

    fn open(&self, key: &SessionKey, config: &SourceConfig) -> Result<PcapSource> {
        match key {
            SessionKey::Device(name) => PcapSource::open(name, config),
            other => Err(DissectError::configuration(format!("{} is not a network device", other))),
        }
    }
}

/// Lists the interfaces libpcap can capture on.
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>> {
    let devices = Device::list().map_err(|e| DissectError::source_failed_with("failed to list interfaces", e))?;
    Ok(devices
        .into_iter()
        .map(|device| {
            let mut flags = Vec::new();
            if device.flags.is_loopback() {
                flags.push("loopback".to_string());
            }
            if device.flags.is_up() {
                flags.push("up".to_string());
            }
            if device.flags.is_running() {
                flags.push("running".to_string());
            }
            if device.flags.is_wireless() {
                flags.push("wireless".to_string());
            }
            InterfaceInfo {
                name: device.name,
                description: device.desc,
                flags,
                addresses: device
                    .addresses
                    .into_iter()
                    .map(|a| InterfaceAddress {
                        address: a.addr,
                        netmask: a.netmask,
                        broadcast: a.broadcast_addr,
                    })
                    .collect(),
            }
        })
        .collect())
}
