//! Capture file source over a memory map.
//!
//! Reads classic pcap (either byte order, micro or nanosecond timestamps) and
//! pcapng. The file is mapped rather than read, so only the pages the pass
//! touches are brought into memory.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::Mmap;
use pcap_file::PcapError;
use pcap_file::pcap::PcapParser;
use pcap_file::pcapng::blocks::interface_description::{InterfaceDescriptionBlock, InterfaceDescriptionOption};
use pcap_file::pcapng::{Block, PcapNgParser};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{PacketSource, SourceConfig, SourceEvent, SourceOpener};
use crate::registry::SessionKey;
use crate::types::{CaptureMeta, LINKTYPE_ETHERNET, RawPacket};
use crate::{DissectError, Result};

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

enum Format {
    Pcap(PcapParser),
    PcapNg(PcapNgParser),
}

/// Sequential reader over a pcap or pcapng file.
pub struct FileSource {
    path: PathBuf,
    map: Mmap,
    pos: usize,
    format: Format,
    link_type: u32,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| DissectError::file_error(path.clone(), e))?;
        // SAFETY: the map is read-only; a file truncated underneath us surfaces
        // as a parse error at the truncation point.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| DissectError::file_error(path.clone(), e))?;

        let (format, link_type, header_len) = if map.starts_with(&PCAPNG_MAGIC) {
            let (rem, parser) = PcapNgParser::new(&map)
                .map_err(|e| DissectError::source_failed_with(format!("invalid pcapng header in {}", path.display()), e))?;
            (Format::PcapNg(parser), LINKTYPE_ETHERNET, map.len() - rem.len())
        } else {
            let (rem, parser) = PcapParser::new(&map)
                .map_err(|e| DissectError::source_failed_with(format!("invalid pcap header in {}", path.display()), e))?;
            let link_type = u32::from(parser.header().datalink);
            (Format::Pcap(parser), link_type, map.len() - rem.len())
        };

        debug!(path = %path.display(), size = map.len(), link_type, "capture file opened");
        Ok(Self { path, map, pos: header_len, format, link_type })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncated(&self) -> SourceEvent {
        if self.pos < self.map.len() {
            warn!(
                path = %self.path.display(),
                offset = self.pos,
                trailing = self.map.len() - self.pos,
                "capture file ends in a partial record"
            );
        }
        SourceEvent::EndOfData
    }

    fn parse_failed(&self, err: PcapError) -> DissectError {
        DissectError::source_failed_with(
            format!("corrupt record at offset {} in {}", self.pos, self.path.display()),
            err,
        )
    }
}

impl PacketSource for FileSource {
    fn next_packet(&mut self, cancel: &CancellationToken) -> Result<SourceEvent> {
        loop {
            if cancel.is_cancelled() {
                return Ok(SourceEvent::Interrupted);
            }
            let offset = self.pos;
            let slice = &self.map[offset..];
            if slice.is_empty() {
                return Ok(SourceEvent::EndOfData);
            }

            let parsed = match &mut self.format {
                Format::Pcap(parser) => parser.next_packet(slice).map(|(rem, packet)| {
                    let data = packet.data.into_owned();
                    let meta = CaptureMeta {
                        timestamp: packet.timestamp,
                        declared_len: packet.orig_len,
                        captured_len: data.len() as u32,
                        offset: offset as u64,
                        link_type: self.link_type,
                    };
                    (rem.len(), Some(RawPacket::new(meta, data)))
                }),
                Format::PcapNg(parser) => parser.next_block(slice).map(|(rem, block)| {
                    let packet = match block {
                        Block::EnhancedPacket(epb) => {
                            let interface = parser.interfaces().get(epb.interface_id as usize);
                            let link_type = interface.map_or(LINKTYPE_ETHERNET, |idb| u32::from(idb.linktype));
                            let timestamp = scale_timestamp(epb.timestamp, interface);
                            let data = epb.data.into_owned();
                            Some(RawPacket::new(
                                CaptureMeta {
                                    timestamp,
                                    declared_len: epb.original_len,
                                    captured_len: data.len() as u32,
                                    offset: offset as u64,
                                    link_type,
                                },
                                data,
                            ))
                        }
                        Block::SimplePacket(spb) => {
                            let link_type = parser
                                .interfaces()
                                .first()
                                .map_or(LINKTYPE_ETHERNET, |idb| u32::from(idb.linktype));
                            let data = spb.data.into_owned();
                            Some(RawPacket::new(
                                CaptureMeta {
                                    timestamp: Duration::ZERO,
                                    declared_len: spb.original_len,
                                    captured_len: data.len() as u32,
                                    offset: offset as u64,
                                    link_type,
                                },
                                data,
                            ))
                        }
                        _ => None,
                    };
                    (rem.len(), packet)
                }),
            };

            match parsed {
                Ok((remaining, packet)) => {
                    self.pos = self.map.len() - remaining;
                    if let Some(packet) = packet {
                        return Ok(SourceEvent::Packet(packet));
                    }
                }
                Err(PcapError::IncompleteBuffer { .. }) => return Ok(self.truncated()),
                Err(err) => return Err(self.parse_failed(err)),
            }
        }
    }
}

/// Convert an enhanced packet block's raw tick count to a duration.
///
/// The parser hands the count over as nanoseconds; the interface's
/// `if_tsresol` says what one tick really is (microseconds when absent).
fn scale_timestamp(raw: Duration, interface: Option<&InterfaceDescriptionBlock<'_>>) -> Duration {
    let ticks = raw.as_nanos();
    let resolution = interface
        .and_then(|idb| {
            idb.options.iter().find_map(|option| match option {
                InterfaceDescriptionOption::IfTsResol(resolution) => Some(*resolution),
                _ => None,
            })
        })
        .unwrap_or(6);

    let exponent = u32::from(resolution & 0x7f);
    let nanos = if resolution & 0x80 == 0 {
        match 9u32.checked_sub(exponent) {
            Some(shift) => ticks.saturating_mul(10u128.pow(shift)),
            None => ticks / 10u128.saturating_pow(exponent - 9),
        }
    } else {
        ticks.saturating_mul(1_000_000_000) >> exponent.min(127)
    };
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Opens [`FileSource`]s for file session keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    type Source = FileSource;

    fn open(&self, key: &SessionKey, config: &SourceConfig) -> Result<FileSource> {
        let SessionKey::File { path, .. } = key else {
            return Err(DissectError::configuration(format!("{} is not a capture file", key)));
        };
        if config.filter.is_some() {
            return Err(DissectError::configuration("capture filters are not supported for files"));
        }
        FileSource::open(path)
    }
}
