use std::io::Cursor;
use byteorder::{BigEndian, ReadBytesExt};

use super::writer::padded_len;
use super::DecodeError;

/// Big-endian reader over a single inbound datagram. Borrows the receive
/// buffer, so nothing outlives the datagram except what the caller copies.
pub struct OscReader<'a> {
    inner: Cursor<&'a [u8]>,
}

impl<'a> OscReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        OscReader {
            inner: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.inner
            .read_i32::<BigEndian>()
            .map_err(|_| DecodeError::Truncated)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.inner
            .read_f32::<BigEndian>()
            .map_err(|_| DecodeError::Truncated)
    }

    /// Read a NUL-terminated string and step over its padding.
    /// Fails with `Truncated` when the terminator or the padding runs past the buffer.
    pub fn read_padded_str(&mut self) -> Result<&'a str, DecodeError> {
        let data: &'a [u8] = *self.inner.get_ref();
        let start = self.position();
        let rest = data.get(start..).ok_or(DecodeError::Truncated)?;

        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Truncated)?;
        let padded = padded_len(len);
        if rest.len() < padded {
            return Err(DecodeError::Truncated);
        }

        let s = std::str::from_utf8(&rest[..len]).map_err(|_| DecodeError::InvalidUtf8)?;
        self.inner.set_position((start + padded) as u64);
        Ok(s)
    }
}
