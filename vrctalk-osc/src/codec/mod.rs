//! vrctalk-osc/src/codec/mod.rs
//!
//! Encode/decode of a single OSC message (no bundle framing).
//!
//! Layout of one message:
//!   address   : NUL-terminated, padded to 4 bytes, must start with `/`
//!   type tags : `,` then one char per argument, padded the same way
//!   arguments : `s` padded string, `i`/`f` 4 bytes big-endian,
//!               `T`/`F` carry no payload
//!
//! Both functions are pure; the listener and the transmitter call them
//! concurrently without sharing anything.

mod reader;
mod writer;

use thiserror::Error;

use reader::OscReader;
use writer::{padded_len, OscWriter};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty OSC address")]
    Empty,

    #[error("truncated OSC message")]
    Truncated,

    #[error("unsupported OSC type tag '{0}'")]
    UnsupportedType(char),

    #[error("OSC type tag string does not start with ','")]
    MalformedTypeTag,

    #[error("OSC address does not start with '/'")]
    InvalidAddress,

    #[error("OSC string is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscArgument {
    Str(String),
    Int32(i32),
    Float32(f32),
    Bool(bool),
}

impl OscArgument {
    pub fn type_tag(&self) -> char {
        match self {
            OscArgument::Str(_) => 's',
            OscArgument::Int32(_) => 'i',
            OscArgument::Float32(_) => 'f',
            OscArgument::Bool(true) => 'T',
            OscArgument::Bool(false) => 'F',
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OscArgument::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            OscArgument::Str(s) => padded_len(s.len()),
            OscArgument::Int32(_) | OscArgument::Float32(_) => 4,
            OscArgument::Bool(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArgument>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArgument>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Non-empty address starting with `/`, and no NUL inside any string.
    pub fn is_well_formed(&self) -> bool {
        self.address.starts_with('/')
            && !self.address.contains('\0')
            && self.args.iter().all(|a| match a {
                OscArgument::Str(s) => !s.contains('\0'),
                _ => true,
            })
    }

    /// `,` followed by one tag char per argument.
    pub fn type_tags(&self) -> String {
        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(OscArgument::type_tag));
        tags
    }

    fn encoded_len(&self) -> usize {
        padded_len(self.address.len())
            + padded_len(self.args.len() + 1)
            + self.args.iter().map(OscArgument::payload_len).sum::<usize>()
    }
}

/// Serialize one message into a datagram payload.
pub fn encode(message: &OscMessage) -> Vec<u8> {
    debug_assert!(message.is_well_formed(), "malformed OSC message: {message:?}");

    let mut writer = OscWriter::with_capacity(message.encoded_len());
    writer.write_padded_str(&message.address);
    writer.write_padded_str(&message.type_tags());
    for arg in &message.args {
        match arg {
            OscArgument::Str(s) => writer.write_padded_str(s),
            OscArgument::Int32(v) => writer.write_i32(*v),
            OscArgument::Float32(v) => writer.write_f32(*v),
            OscArgument::Bool(_) => {}
        }
    }
    writer.into_inner()
}

/// Parse one datagram. The message is accepted whole or rejected whole;
/// bytes after the last declared argument are ignored.
pub fn decode(bytes: &[u8]) -> Result<OscMessage, DecodeError> {
    match bytes.first() {
        None | Some(0) => return Err(DecodeError::Empty),
        Some(_) => {}
    }

    let mut reader = OscReader::new(bytes);
    let address = reader.read_padded_str()?;
    if !address.starts_with('/') {
        return Err(DecodeError::InvalidAddress);
    }

    let tags = reader
        .read_padded_str()?
        .strip_prefix(',')
        .ok_or(DecodeError::MalformedTypeTag)?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            's' => OscArgument::Str(reader.read_padded_str()?.to_owned()),
            'i' => OscArgument::Int32(reader.read_i32()?),
            'f' => OscArgument::Float32(reader.read_f32()?),
            'T' => OscArgument::Bool(true),
            'F' => OscArgument::Bool(false),
            other => return Err(DecodeError::UnsupportedType(other)),
        };
        args.push(arg);
    }

    tracing::trace!(
        "decoded OSC {} ({} args, {} of {} bytes used)",
        address,
        args.len(),
        reader.position(),
        bytes.len()
    );

    Ok(OscMessage {
        address: address.to_owned(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_true() -> OscMessage {
        OscMessage::new("/chatbox/typing", vec![OscArgument::Bool(true)])
    }

    #[test]
    fn test_encode_typing_true_exact_bytes() {
        let bytes = encode(&typing_true());

        let mut expected = b"/chatbox/typing\0".to_vec();
        expected.extend_from_slice(b",T\0\0");
        assert_eq!(bytes, expected);
        assert_eq!(decode(&bytes).unwrap(), typing_true());
    }

    #[test]
    fn test_encode_chatbox_input_layout() {
        let msg = OscMessage::new(
            "/chatbox/input",
            vec![OscArgument::Str("Hello".into()), OscArgument::Bool(true)],
        );
        let bytes = encode(&msg);

        let mut expected = b"/chatbox/input\0\0".to_vec();
        expected.extend_from_slice(b",sT\0");
        expected.extend_from_slice(b"Hello\0\0\0");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_string_on_boundary_gets_full_pad_word() {
        // 4 chars of content still need a terminator, so a whole extra word.
        let msg = OscMessage::new("/abc", vec![]);
        let bytes = encode(&msg);
        assert_eq!(bytes, b"/abc\0\0\0\0,\0\0\0".to_vec());
    }

    #[test]
    fn test_bool_adds_only_a_tag_char() {
        let without = OscMessage::new("/x", vec![OscArgument::Int32(7)]);
        let with = OscMessage::new("/x", vec![OscArgument::Int32(7), OscArgument::Bool(false)]);

        assert_eq!(with.type_tags().len(), without.type_tags().len() + 1);
        // ",i" and ",iF" both fit in one padded word.
        assert_eq!(encode(&with).len(), encode(&without).len());
    }

    #[test]
    fn test_all_strings_padded_to_four() {
        for len in 0..12 {
            let text: String = "x".repeat(len);
            let msg = OscMessage::new(format!("/{text}"), vec![OscArgument::Str(text.clone())]);
            let bytes = encode(&msg);
            assert_eq!(bytes.len() % 4, 0);
            assert!(bytes.contains(&0));
            assert_eq!(decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_round_trip_mixed_args() {
        let msg = OscMessage::new(
            "/avatar/parameters/Mixed",
            vec![
                OscArgument::Str("こんにちは".into()),
                OscArgument::Int32(-42),
                OscArgument::Float32(0.25),
                OscArgument::Bool(false),
                OscArgument::Str(String::new()),
                OscArgument::Bool(true),
            ],
        );
        assert_eq!(decode(&encode(&msg)).unwrap(), msg);
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert_eq!(decode(b"\0\0\0\0,\0\0\0"), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_missing_terminator_is_truncated() {
        assert_eq!(decode(b"/chatbox"), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_decode_missing_padding_is_truncated() {
        // terminator present but the pad word is cut short
        assert_eq!(decode(b"/ab\0,T"), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_decode_bad_type_tag() {
        assert_eq!(decode(b"/ab\0T\0\0\0"), Err(DecodeError::MalformedTypeTag));
    }

    #[test]
    fn test_decode_rejects_bundle() {
        let mut bundle = b"#bundle\0".to_vec();
        bundle.extend_from_slice(&[0u8; 8]);
        assert_eq!(decode(&bundle), Err(DecodeError::InvalidAddress));
    }

    #[test]
    fn test_decode_unsupported_type_rejects_whole_message() {
        let mut bytes = b"/ab\0".to_vec();
        bytes.extend_from_slice(b",iTd\0\0\0\0");
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(decode(&bytes), Err(DecodeError::UnsupportedType('d')));
    }

    #[test]
    fn test_decode_short_int_is_truncated() {
        let mut bytes = b"/ab\0,i\0\0".to_vec();
        bytes.extend_from_slice(&[0, 1]);
        assert_eq!(decode(&bytes), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let bytes = b"/a\xff\0,\0\0\0".to_vec();
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_every_prefix_of_valid_message_is_typed_error() {
        let msg = OscMessage::new(
            "/chatbox/input",
            vec![OscArgument::Str("prefix check".into()), OscArgument::Int32(3)],
        );
        let bytes = encode(&msg);
        for cut in 0..bytes.len() {
            assert!(decode(&bytes[..cut]).is_err(), "prefix of {cut} bytes decoded");
        }
    }

    #[test]
    fn test_pseudo_random_bytes_never_panic() {
        // xorshift keeps this deterministic without pulling in an RNG crate
        let mut state: u32 = 0x9E37_79B9;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let len = (state % 64) as usize;
            let mut buf = Vec::with_capacity(len);
            for i in 0..len {
                let b = (state.rotate_left(i as u32 % 32) & 0xFF) as u8;
                buf.push(b);
            }
            if !buf.is_empty() && state % 3 == 0 {
                buf[0] = b'/';
            }
            let _ = decode(&buf);
        }
    }
}
