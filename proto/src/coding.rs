//! Cursor-based big-endian codec primitives.
//!
//! Every `decode_*`/`encode_*` pair advances a mutable cursor and a
//! remaining-length counter together; on short-buffer they leave both
//! untouched so the caller can retry once more data has arrived.

use byteorder::{BigEndian, ByteOrder};

/// Reads big-endian primitives out of a borrowed byte slice, tracking how
/// much of it remains unconsumed.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn decode_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Some(v)
    }

    pub fn decode_u16(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let v = BigEndian::read_u16(&self.buf[self.pos..]);
        self.pos += 2;
        Some(v)
    }

    pub fn decode_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = BigEndian::read_u32(&self.buf[self.pos..]);
        self.pos += 4;
        Some(v)
    }

    /// Borrows `n` bytes without copying. The borrow ties the result's
    /// lifetime to the cursor's source buffer, not to `self`.
    pub fn decode_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(v)
    }
}

/// Writes big-endian primitives into a growable `Vec<u8>`, failing (without
/// partial writes) if a fixed output cap would be exceeded.
pub struct Encoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    pub fn encode_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    pub fn encode_u16(&mut self, v: u16) {
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.out.extend_from_slice(&tmp);
    }

    pub fn encode_u32(&mut self, v: u32) {
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.out.extend_from_slice(&tmp);
    }

    pub fn encode_bytes(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_primitives() {
        let mut buf = Vec::new();
        {
            let mut enc = Encoder::new(&mut buf);
            enc.encode_u8(0xab);
            enc.encode_u16(0x1234);
            enc.encode_u32(0xdead_beef);
            enc.encode_bytes(b"hello");
        }
        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.decode_u8(), Some(0xab));
        assert_eq!(cur.decode_u16(), Some(0x1234));
        assert_eq!(cur.decode_u32(), Some(0xdead_beef));
        assert_eq!(cur.decode_bytes(5), Some(&b"hello"[..]));
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn short_buffer_leaves_cursor_unmoved() {
        let buf = [0u8; 1];
        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.decode_u16(), None);
        assert_eq!(cur.position(), 0);
    }
}
