//! Hex and ASCII dump of a frame's raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Bytes rendered per dump row.
pub const BYTES_PER_ROW: usize = 16;

/// Width of the hex column: two digits and a separating blank per byte.
const HEX_COLUMN_WIDTH: usize = BYTES_PER_ROW * 3 - 1;

/// Row-oriented hex dump, one entry per 16-byte row in each column.
///
/// Offsets use at least four hex digits and widen when the buffer needs it.
/// The hex column is always padded to full width; the ASCII column of the
/// last row is as short as the row itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexDump {
    pub offset: Vec<String>,
    pub hex: Vec<String>,
    pub ascii: Vec<String>,
}

impl HexDump {
    pub fn from_bytes(data: &[u8]) -> Self {
        let digits = offset_digits(data.len());
        let rows = data.len().div_ceil(BYTES_PER_ROW);
        let mut dump = HexDump {
            offset: Vec::with_capacity(rows),
            hex: Vec::with_capacity(rows),
            ascii: Vec::with_capacity(rows),
        };

        for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
            dump.offset.push(format!("{:0width$x}", row * BYTES_PER_ROW, width = digits));

            let mut hex = String::with_capacity(HEX_COLUMN_WIDTH);
            for (i, byte) in chunk.iter().enumerate() {
                if i > 0 {
                    hex.push(' ');
                }
                let _ = write!(hex, "{:02x}", byte);
            }
            while hex.len() < HEX_COLUMN_WIDTH {
                hex.push(' ');
            }
            dump.hex.push(hex);

            dump.ascii.push(
                chunk
                    .iter()
                    .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                    .collect(),
            );
        }
        dump
    }

    pub fn rows(&self) -> usize {
        self.offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offset.is_empty()
    }
}

fn offset_digits(len: usize) -> usize {
    let last = len.saturating_sub(1) as u64;
    if last & 0xF000_0000 != 0 {
        8
    } else if last & 0x0F00_0000 != 0 {
        7
    } else if last & 0x00F0_0000 != 0 {
        6
    } else if last & 0x000F_0000 != 0 {
        5
    } else {
        4
    }
}
