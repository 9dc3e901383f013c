//! Stream codec for length-prefixed envelopes.

use bytes::{Buf, BytesMut};

use crate::envelope::{Envelope, LENGTH_PREFIX_SIZE, MAX_ENVELOPE_SIZE};
use crate::error::EnvelopeError;

/// A codec for reading envelopes out of a byte stream.
///
/// Bytes are accumulated until a complete envelope is available. Unlike a
/// notification stream there is no resynchronisation: an oversized length
/// prefix means the stream is corrupt and the caller should drop the link.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl EnvelopeCodec {
    /// Create a new envelope codec.
    pub fn new() -> Self {
        EnvelopeCodec {
            buffer: BytesMut::with_capacity(MAX_ENVELOPE_SIZE),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete envelope from the buffer.
    ///
    /// Returns `Ok(Some(envelope))` if a complete envelope was decoded,
    /// `Ok(None)` if more data is needed, or `Err` if the stream is corrupt.
    pub fn decode(&mut self) -> Result<Option<Envelope>, EnvelopeError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
            as usize;
        if len > MAX_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooLong {
                max: MAX_ENVELOPE_SIZE,
                actual: len,
            });
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        let body = self.buffer.split_to(len);
        let envelope = Envelope::decode(&body)?;
        log::trace!("decoded envelope {}", envelope);
        Ok(Some(envelope))
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceAddress, Message};

    fn envelope(seq: u16, data: &[u8]) -> Envelope {
        Envelope::new(
            seq,
            "AA:BB".parse::<DeviceAddress>().unwrap(),
            Message::Notify {
                characteristic: 0xFE51,
                data: data.to_vec(),
            },
        )
    }

    #[test]
    fn test_codec_partial() {
        let mut codec = EnvelopeCodec::new();
        let encoded = envelope(0, b"partial").encode().unwrap();

        codec.push(&encoded[..3]);
        assert!(codec.decode().unwrap().is_none());
        codec.push(&encoded[3..9]);
        assert!(codec.decode().unwrap().is_none());

        codec.push(&encoded[9..]);
        let decoded = codec.decode().unwrap().expect("should decode envelope");
        assert_eq!(decoded, envelope(0, b"partial"));
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_codec_multiple() {
        let mut codec = EnvelopeCodec::new();
        codec.push(&envelope(1, b"first").encode().unwrap());
        codec.push(&envelope(2, b"second").encode().unwrap());

        assert_eq!(codec.decode().unwrap().unwrap().seq, 1);
        assert_eq!(codec.decode().unwrap().unwrap().seq, 2);
        assert!(codec.decode().unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_oversized_prefix() {
        let mut codec = EnvelopeCodec::new();
        codec.push(&(MAX_ENVELOPE_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(codec.decode(), Err(EnvelopeError::TooLong { .. })));
    }
}
