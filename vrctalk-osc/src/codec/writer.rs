use byteorder::{BigEndian, ByteOrder};

/// Big-endian OSC writer. Every string it emits is NUL-terminated and
/// zero-padded to a 4-byte boundary.
pub struct OscWriter {
    data: Vec<u8>,
}

impl OscWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        OscWriter {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn write_i32(&mut self, v: i32) {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_f32(&mut self, v: f32) {
        let mut buf = [0u8; 4];
        BigEndian::write_f32(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    /// Write `s` followed by at least one NUL, padded out to a multiple of 4.
    pub fn write_padded_str(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
        let padded = padded_len(s.len());
        self.data.resize(self.data.len() + (padded - s.len()), 0);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Encoded size of a string of `len` bytes: content, one terminator, then
/// padding up to the next multiple of 4.
pub(crate) fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}
