//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with AM43 frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The checksum byte does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// The bytes do not form a frame.
    #[error("malformed frame: {0}")]
    Malformed(MalformedFrame),

    /// A payload longer than the protocol allows.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// A command code outside the known table.
    #[error("unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// A frame that does not answer the command it was matched against.
    #[error("unexpected frame: expected code 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedFrame {
        /// Code of the outstanding command.
        expected: u8,
        /// Code carried by the frame.
        actual: u8,
    },

    /// The device answered with an error status.
    #[error("device rejected command 0x{0:02X}")]
    Rejected(u8),

    /// A decoded field is outside its documented range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Name of the field.
        field: &'static str,
        /// Raw value received.
        value: u8,
    },
}

impl ProtocolError {
    /// Whether this error means the bytes were corrupt rather than unexpected.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ProtocolError::Checksum { .. } | ProtocolError::Malformed(_))
    }
}

/// Why a byte buffer could not be parsed as a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedFrame {
    /// Buffer ends before the frame does.
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes needed for a complete frame.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// First byte is not the frame header.
    #[error("bad header byte 0x{0:02X}")]
    BadHeader(u8),

    /// Length byte exceeds the maximum payload.
    #[error("length byte {0} exceeds maximum payload")]
    Oversized(usize),

    /// Bytes left over after a complete frame.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

impl From<MalformedFrame> for ProtocolError {
    fn from(reason: MalformedFrame) -> Self {
        ProtocolError::Malformed(reason)
    }
}

/// A caller-supplied value outside the protocol range.
///
/// Raised before anything is encoded, so invalid values never reach the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{field} must be between {min} and {max}, got {value}")]
pub struct ValidationError {
    /// Name of the rejected field.
    pub field: &'static str,
    /// Value supplied by the caller.
    pub value: i64,
    /// Smallest accepted value.
    pub min: i64,
    /// Largest accepted value.
    pub max: i64,
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
