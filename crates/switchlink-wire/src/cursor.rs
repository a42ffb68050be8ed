use crate::{MAX_STRING_LEN, WireError};

/// Appends big-endian, length-prefixed fields to a growable buffer.
///
/// Mirrors the `%1i`/`%2i`/`%4i`/`%s` field codes of the wire schema: each
/// `put_*` call writes exactly one field in network byte order.
pub struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.put_u16(v as u16)
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.put_u32(v as u32)
    }

    pub fn put_code(&mut self, code: crate::MessageCode) -> &mut Self {
        self.buf.extend_from_slice(&code);
        self
    }

    /// `%s`: a `u32` length prefix followed by the raw bytes.
    pub fn put_str(&mut self, s: &[u8]) -> &mut Self {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s);
        self
    }
}

/// Reads big-endian fields out of a frame payload, tracking position.
///
/// Every `get_*` returns [`WireError::Truncated`] rather than panicking when
/// the buffer runs short; callers treat that as a malformed frame.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_i16(&mut self) -> Result<i16, WireError> {
        Ok(self.get_u16()? as i16)
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_code(&mut self) -> Result<crate::MessageCode, WireError> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// `%s`: a `u32` length prefix followed by that many raw bytes.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.get_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(WireError::StringTooLong(MAX_STRING_LEN));
        }
        self.take(len)
    }

    pub fn get_string(&mut self) -> Result<String, WireError> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_field_kind() {
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf)
            .put_u8(7)
            .put_u16(1234)
            .put_u32(0xdead_beef)
            .put_str(b"hello")
            .put_code(*b"DINF");

        let mut r = FrameReader::new(&buf);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 1234);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_bytes().unwrap(), b"hello");
        assert_eq!(r.get_code().unwrap(), *b"DINF");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_is_an_error_not_a_panic() {
        let buf = vec![0u8, 1];
        let mut r = FrameReader::new(&buf);
        assert_eq!(r.get_u32(), Err(WireError::Truncated));
    }
}
