//! Bounds-checked cursor over packet bytes.

use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(drop)
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub(crate) fn be16(&mut self) -> Option<u16> {
        self.array().map(u16::from_be_bytes)
    }

    pub(crate) fn be32(&mut self) -> Option<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn le16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn le24(&mut self) -> Option<u32> {
        let [a, b, c] = self.array()?;
        Some(u32::from_le_bytes([a, b, c, 0]))
    }

    pub(crate) fn le32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn ipv4(&mut self) -> Option<Ipv4Addr> {
        self.array::<4>().map(Ipv4Addr::from)
    }

    pub(crate) fn mac(&mut self) -> Option<[u8; 6]> {
        self.array()
    }

    /// Bytes up to a NUL terminator, consuming the terminator. Without a
    /// terminator the rest of the buffer is returned.
    pub(crate) fn cstr(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.pos += nul + 1;
                Some(&rest[..nul])
            }
            None => {
                self.pos = self.data.len();
                Some(rest)
            }
        }
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
}

pub(crate) fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Colon-separated hex, the analyzer's rendering of byte fields.
pub(crate) fn colon_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let mut r = Reader::new(&[0x12, 0x34, 0x56]);
        assert_eq!(r.be16(), Some(0x1234));
        assert_eq!(r.be16(), None);
        assert_eq!(r.u8(), Some(0x56));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn little_endian_widths() {
        let mut r = Reader::new(&[0x55, 0x00, 0x00, 0x01, 0x0d, 0xa2, 0x08, 0x00]);
        assert_eq!(r.le24(), Some(0x55));
        assert_eq!(r.u8(), Some(1));
        assert_eq!(r.le32(), Some(0x0008_a20d));
    }

    #[test]
    fn cstr_consumes_terminator() {
        let mut r = Reader::new(b"root\0test");
        assert_eq!(r.cstr(), Some(&b"root"[..]));
        assert_eq!(r.cstr(), Some(&b"test"[..]));
        assert_eq!(r.cstr(), None);
    }

    #[test]
    fn hex_renderings() {
        assert_eq!(format_mac(&[0, 0x1c, 0x42, 0, 0, 0x18]), "00:1c:42:00:00:18");
        assert_eq!(colon_hex(&[0xde, 0xad]), "de:ad");
    }
}
