//! Frame encoding/decoding.
//!
//! Every AM43 message, in either direction, is one frame:
//!
//! ```text
//! +------+------+-----+-------------------+----------+
//! | 0x9A | code | len | payload[0..len]   | checksum |
//! +------+------+-----+-------------------+----------+
//! ```
//!
//! Outbound frames are preceded on the wire by the wake-up preamble
//! `00 FF 00 00`, which is not covered by the checksum.

use bytes::{Buf, BytesMut};

use crate::constants::*;
use crate::error::{MalformedFrame, ProtocolError, ProtocolResult};

/// Checksum algorithm used to seal frames.
///
/// Both ends of a link must agree on the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Checksum {
    /// Sum of all preceding frame bytes modulo 256.
    #[default]
    Sum8,
    /// XOR of all preceding frame bytes, as verified by shipping firmware.
    Xor,
}

impl Checksum {
    /// Compute the checksum of `bytes`.
    pub fn compute(self, bytes: &[u8]) -> u8 {
        match self {
            Checksum::Sum8 => bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
            Checksum::Xor => bytes.iter().fold(0u8, |acc, b| acc ^ b),
        }
    }
}

/// One decoded, checksum-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads longer than [`MAX_PAYLOAD_LEN`].
    pub fn new(code: u8, payload: impl Into<Vec<u8>>) -> ProtocolResult<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(Frame { code, payload })
    }

    /// Build a frame whose payload is known to fit.
    pub(crate) fn from_parts(code: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Frame { code, payload }
    }

    /// Frame carrying a single status byte.
    pub fn status(code: u8, status: u8) -> Self {
        Frame {
            code,
            payload: vec![status],
        }
    }

    /// Command code.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The status byte, if this frame carries exactly one.
    pub fn status_byte(&self) -> Option<u8> {
        match self.payload.as_slice() {
            [status] => Some(*status),
            _ => None,
        }
    }

    /// Whether the frame is an ACK status reply.
    pub fn is_ack(&self) -> bool {
        self.status_byte() == Some(STATUS_ACK)
    }

    /// Whether the frame is an ERROR status reply.
    pub fn is_error(&self) -> bool {
        self.status_byte() == Some(STATUS_ERROR)
    }

    /// Encode header, code, length, payload and checksum.
    pub fn encode(&self, checksum: Checksum) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.push(FRAME_HEADER);
        buf.push(self.code);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(checksum.compute(&buf));
        buf
    }

    /// Encode with the wake-up preamble, ready to write to the characteristic.
    pub fn to_wire(&self, checksum: Checksum) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_PREAMBLE.len() + FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&WIRE_PREAMBLE);
        buf.extend_from_slice(&self.encode(checksum));
        buf
    }

    /// Decode exactly one frame from `bytes`.
    ///
    /// A leading preamble is skipped. Length and checksum are verified before
    /// the payload is exposed; trailing bytes are an error.
    pub fn decode(bytes: &[u8], checksum: Checksum) -> ProtocolResult<Self> {
        let bytes = bytes.strip_prefix(&WIRE_PREAMBLE[..]).unwrap_or(bytes);
        let frame_len = frame_length(bytes)?;
        if bytes.len() > frame_len {
            return Err(MalformedFrame::TrailingBytes(bytes.len() - frame_len).into());
        }
        let frame = verify(&bytes[..frame_len], checksum)?;
        log::trace!("decoded frame code=0x{:02X} payload={:02X?}", frame.code, frame.payload);
        Ok(frame)
    }
}

/// Total frame length announced by a buffer that starts at the header.
fn frame_length(bytes: &[u8]) -> ProtocolResult<usize> {
    if bytes.len() < FRAME_OVERHEAD_HEAD {
        return Err(MalformedFrame::Truncated {
            expected: FRAME_OVERHEAD,
            actual: bytes.len(),
        }
        .into());
    }
    if bytes[0] != FRAME_HEADER {
        return Err(MalformedFrame::BadHeader(bytes[0]).into());
    }
    let payload_len = bytes[2] as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(MalformedFrame::Oversized(payload_len).into());
    }
    let frame_len = FRAME_OVERHEAD + payload_len;
    if bytes.len() < frame_len {
        return Err(MalformedFrame::Truncated {
            expected: frame_len,
            actual: bytes.len(),
        }
        .into());
    }
    Ok(frame_len)
}

/// Check the trailing checksum of a complete frame.
fn verify(frame: &[u8], checksum: Checksum) -> ProtocolResult<Frame> {
    let (body, tail) = frame.split_at(frame.len() - 1);
    let expected = checksum.compute(body);
    if tail[0] != expected {
        return Err(ProtocolError::Checksum {
            expected,
            actual: tail[0],
        });
    }
    Ok(Frame {
        code: body[1],
        payload: body[FRAME_OVERHEAD_HEAD..].to_vec(),
    })
}

/// Whether a chunk opens a frame rather than continuing one.
fn starts_frame(data: &[u8]) -> bool {
    data.first() == Some(&FRAME_HEADER) || data.starts_with(&WIRE_PREAMBLE)
}

/// Reassembles frames from notification fragments.
///
/// A reply may arrive split over several GATT notifications, or several
/// frames may arrive in one. Bytes before a header marker are discarded.
///
/// A notification that begins with a header or the wire preamble starts a
/// new frame: whatever is still buffered from an earlier, truncated
/// notification is dropped so it cannot swallow the new frame. Callers
/// drain [`next_frame`](Self::next_frame) after every [`push`](Self::push).
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    checksum: Checksum,
}

impl FrameAssembler {
    /// Create an assembler for the given checksum algorithm.
    pub fn new(checksum: Checksum) -> Self {
        FrameAssembler {
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN * 2),
            checksum,
        }
    }

    /// Add one notification's data to the buffer.
    ///
    /// Returns the number of stale bytes discarded because `data` opens a
    /// new frame while an incomplete one was still buffered.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let discarded = if starts_frame(data) { self.buffer.len() } else { 0 };
        if discarded > 0 {
            log::trace!("dropping {} bytes of an incomplete frame", discarded);
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(data);
        discarded
    }

    /// Try to take the next frame from the buffer.
    ///
    /// Returns `None` when more data is needed. A corrupt frame is consumed
    /// and returned as an error so the caller can count it and move on.
    pub fn next_frame(&mut self) -> Option<ProtocolResult<Frame>> {
        // Scan for the header, discarding preamble and garbage
        while !self.buffer.is_empty() && self.buffer[0] != FRAME_HEADER {
            self.buffer.advance(1);
        }

        match frame_length(&self.buffer) {
            Ok(len) => {
                let raw = self.buffer.split_to(len);
                Some(verify(&raw, self.checksum))
            }
            Err(ProtocolError::Malformed(MalformedFrame::Truncated { .. })) => None,
            Err(e) => {
                // Oversized length byte: drop the header and resync
                self.buffer.advance(1);
                Some(Err(e))
            }
        }
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

    #[test]
    fn test_known_battery_request_bytes() {
        // Captured from the vendor app
        let frame = Frame::new(CMD_GET_BATTERY, vec![QUERY_PLACEHOLDER]).unwrap();
        assert_eq!(
            frame.to_wire(Checksum::Xor),
            vec![0x00, 0xFF, 0x00, 0x00, 0x9A, 0xA2, 0x01, 0x01, 0x38]
        );
    }

    #[test]
    fn test_known_stop_bytes() {
        let frame = Frame::new(CMD_MOVE, vec![MOVE_STOP]).unwrap();
        assert_eq!(
            frame.to_wire(Checksum::Xor),
            vec![0x00, 0xFF, 0x00, 0x00, 0x9A, 0x0A, 0x01, 0xCC, 0x5D]
        );
    }

    #[test]
    fn test_sum_checksum() {
        let frame = Frame::new(CMD_MOVE_TO, vec![50]).unwrap();
        let encoded = frame.encode(Checksum::Sum8);
        let expected = (0x9Au32 + 0x0D + 1 + 50) % 256;
        assert_eq!(encoded[4] as u32, expected);
    }

    #[test]
    fn test_decode_with_and_without_preamble() {
        let frame = Frame::new(CMD_GET_POSITION, vec![0x0C, 30, 42]).unwrap();
        for checksum in [Checksum::Sum8, Checksum::Xor] {
            assert_eq!(Frame::decode(&frame.encode(checksum), checksum).unwrap(), frame);
            assert_eq!(Frame::decode(&frame.to_wire(checksum), checksum).unwrap(), frame);
        }
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = Frame::new(CMD_GET_BATTERY, vec![1, 2, 3]).unwrap().encode(Checksum::Sum8);
        let err = Frame::decode(&encoded[..encoded.len() - 2], Checksum::Sum8).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Malformed(MalformedFrame::Truncated { .. })
        ));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_decode_bad_header_and_trailing() {
        let mut encoded = Frame::status(CMD_MOVE, STATUS_ACK).encode(Checksum::Sum8);
        encoded.push(0x00);
        assert_eq!(
            Frame::decode(&encoded, Checksum::Sum8).unwrap_err(),
            ProtocolError::Malformed(MalformedFrame::TrailingBytes(1))
        );
        assert_eq!(
            Frame::decode(&[0x55, 0x0A, 0x00, 0x5F], Checksum::Sum8).unwrap_err(),
            ProtocolError::Malformed(MalformedFrame::BadHeader(0x55))
        );
    }

    #[test]
    fn test_payload_too_long() {
        assert!(matches!(
            Frame::new(CMD_MOVE, vec![0u8; MAX_PAYLOAD_LEN + 1]),
            Err(ProtocolError::PayloadTooLong { .. })
        ));
        let mut raw = vec![FRAME_HEADER, CMD_MOVE, (MAX_PAYLOAD_LEN + 1) as u8];
        raw.extend(std::iter::repeat(0).take(MAX_PAYLOAD_LEN + 2));
        assert_eq!(
            Frame::decode(&raw, Checksum::Sum8).unwrap_err(),
            ProtocolError::Malformed(MalformedFrame::Oversized(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_single_byte_mutation_never_decodes() {
        let frame = Frame::new(CMD_GET_BATTERY, vec![0, 0, 0, 0, 77]).unwrap();
        for checksum in [Checksum::Sum8, Checksum::Xor] {
            let encoded = frame.encode(checksum);
            // Header, code, payload and checksum bytes; the length byte changes
            // the frame boundary and is reported as malformed instead.
            for index in (0..encoded.len()).filter(|i| *i != 2) {
                for delta in 1..=255u8 {
                    let mut mutated = encoded.clone();
                    mutated[index] = mutated[index].wrapping_add(delta);
                    let result = Frame::decode(&mutated, checksum);
                    assert!(result.is_err(), "mutation at {} by {} decoded", index, delta);
                    if index > 0 {
                        assert!(matches!(result, Err(ProtocolError::Checksum { .. })));
                    }
                }
            }
        }
    }

    #[test]
    fn test_assembler_fragments() {
        let mut assembler = FrameAssembler::new(Checksum::Xor);
        let wire = Frame::new(CMD_GET_POSITION, vec![0x0C, 30, 55, 0, 0, 0])
            .unwrap()
            .to_wire(Checksum::Xor);

        assembler.push(&wire[..6]);
        assert!(assembler.next_frame().is_none());

        assembler.push(&wire[6..]);
        let frame = assembler.next_frame().expect("complete").expect("valid");
        assert_eq!(frame.payload()[POSITION_OFFSET], 55);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_assembler_multiple_and_corrupt() {
        let mut assembler = FrameAssembler::new(Checksum::Sum8);
        let good = Frame::status(CMD_MOVE, STATUS_ACK).encode(Checksum::Sum8);
        let mut bad = Frame::status(CMD_MOVE_TO, STATUS_ACK).encode(Checksum::Sum8);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut notification = vec![0x13, 0x37];
        notification.extend_from_slice(&bad);
        notification.extend_from_slice(&good);
        assert_eq!(assembler.push(&notification), 0);

        assert!(matches!(
            assembler.next_frame(),
            Some(Err(ProtocolError::Checksum { .. }))
        ));
        let frame = assembler.next_frame().unwrap().unwrap();
        assert!(frame.is_ack());
        assert_eq!(frame.code(), CMD_MOVE);
        assert!(assembler.next_frame().is_none());
    }

    #[test]
    fn test_truncated_notification_does_not_swallow_next_frame() {
        let mut assembler = FrameAssembler::new(Checksum::Sum8);
        let mut payload = vec![0u8; BATTERY_OFFSET + 1];
        payload[BATTERY_OFFSET] = 77;
        let good = Frame::new(CMD_GET_BATTERY, payload)
            .unwrap()
            .encode(Checksum::Sum8);

        assert_eq!(assembler.push(&good[..5]), 0);
        assert!(assembler.next_frame().is_none());

        assert_eq!(assembler.push(&good), 5);
        let frame = assembler.next_frame().expect("complete").expect("valid");
        assert_eq!(frame.code(), CMD_GET_BATTERY);
        assert_eq!(frame.payload()[BATTERY_OFFSET], 77);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_preamble_starts_new_frame() {
        let mut assembler = FrameAssembler::new(Checksum::Xor);
        let wire = Frame::status(CMD_MOVE, STATUS_ACK).to_wire(Checksum::Xor);

        assembler.push(&wire[..7]);
        assert!(assembler.next_frame().is_none());
        // The preamble was already skipped; three header bytes remain
        assert_eq!(assembler.push(&wire), 3);
        assert!(assembler.next_frame().unwrap().unwrap().is_ack());
    }
}
