use crate::error::*;

// Cursor over a big-endian byte buffer. Everything on the wire and in the executable
// (protocol payloads, Hunk blocks, STABS records) is M68k big-endian, so this is the
// one place that knows how to pull scalars out of raw bytes.
// Truncation surfaces as an error of the kind the caller chose at construction:
// Protocol for wire payloads, DebugInfoMalformed for executable contents.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    kind: ErrorKind,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], kind: ErrorKind) -> Self { Self {data, pos: 0, kind} }

    pub fn pos(&self) -> usize { self.pos }
    pub fn remaining(&self) -> usize { self.data.len() - self.pos }
    pub fn is_empty(&self) -> bool { self.pos >= self.data.len() }

    fn short(&self, what: &str) -> Error {
        Error::new(self.kind.clone(), format!("truncated data: expected {} at offset {}", what, self.pos))
    }

    // The raw bytes consumed since an earlier position, for callers that keep
    // the region they just walked.
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.pos]
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.short(&format!("{} bytes", n)));
        }
        let r = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(r)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    // NUL-terminated ASCII string starting at the current position.
    pub fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            None => Err(self.short("NUL terminator")),
            Some(idx) => {
                let s = String::from_utf8_lossy(&rest[..idx]).into_owned();
                self.pos += idx + 1;
                Ok(s)
            }
        }
    }
}

pub fn get_u16_be(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

pub fn get_i16_be(b: &[u8]) -> i16 {
    get_u16_be(b) as i16
}

pub fn get_u32_be(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

// One hexdump row: 16 bytes of hex, gap, printable ASCII gutter.
pub fn hexdump_row(addr: u32, row: &[u8]) -> String {
    let mut hex = String::new();
    for i in 0..16 {
        if i == 8 {
            hex.push(' ');
        }
        match row.get(i) {
            Some(b) => hex.push_str(&format!("{:02x} ", b)),
            None => hex.push_str("   "),
        }
    }
    let ascii: String = row.iter().map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' }).collect();
    format!("0x{:08x}:  {} |{}|", addr, hex, ascii)
}

#[cfg(test)]
mod tests {
    use crate::{error::*, util::*};

    #[test]
    fn reader_scalars() {
        let data = [0xde, 0xad, 0x00, 0x00, 0x01, 0x02, b'h', b'i', 0, 0xff];
        let mut r = ByteReader::new(&data, ErrorKind::Protocol);
        assert_eq!(r.u16().unwrap(), 0xdead);
        assert_eq!(r.u32().unwrap(), 0x0102);
        assert_eq!(r.cstr().unwrap(), "hi");
        assert_eq!(r.u8().unwrap(), 0xff);
        assert!(r.is_empty());
        let e = r.u8().unwrap_err();
        assert_eq!(e.kind, ErrorKind::Protocol);
    }

    #[test]
    fn reader_negative() {
        let data = [0xff, 0x8a];
        let mut r = ByteReader::new(&data, ErrorKind::Protocol);
        assert_eq!(r.i16().unwrap(), -118);
    }

    #[test]
    fn hexdump_format() {
        let row = hexdump_row(0x100, b"ABCDEFGH\x00\x01");
        assert!(row.starts_with("0x00000100:  41 42 43 44 45 46 47 48  00 01"));
        assert!(row.ends_with("|ABCDEFGH..|"));
    }
}
