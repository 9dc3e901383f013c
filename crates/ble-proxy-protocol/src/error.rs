//! Proxy protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Envelope is too short to be valid.
    #[error("envelope too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Envelope is too long.
    #[error("envelope too long: maximum {max} bytes, got {actual}")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Unknown message type.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Device address is empty, too long or not UTF-8.
    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    /// UTF-8 decoding error.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Error codes a radio host reports for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorCode {
    /// The host does not know the device.
    DeviceNotFound,
    /// The BLE connection could not be established.
    ConnectFailed,
    /// The request needs a connected device.
    NotConnected,
    /// A GATT read, write or subscribe failed.
    GattFailure,
    /// The host does not support the request.
    Unsupported,
    /// The host is busy with another operation for the device.
    Busy,
    /// Unknown error code.
    Unknown(u8),
}

/// Host error code: unknown device.
pub const ERR_DEVICE_NOT_FOUND: u8 = 1;
/// Host error code: connect failed.
pub const ERR_CONNECT_FAILED: u8 = 2;
/// Host error code: not connected.
pub const ERR_NOT_CONNECTED: u8 = 3;
/// Host error code: GATT failure.
pub const ERR_GATT_FAILURE: u8 = 4;
/// Host error code: unsupported.
pub const ERR_UNSUPPORTED: u8 = 5;
/// Host error code: busy.
pub const ERR_BUSY: u8 = 6;

impl std::fmt::Display for HostErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostErrorCode::DeviceNotFound => write!(f, "device not found"),
            HostErrorCode::ConnectFailed => write!(f, "connect failed"),
            HostErrorCode::NotConnected => write!(f, "not connected"),
            HostErrorCode::GattFailure => write!(f, "GATT failure"),
            HostErrorCode::Unsupported => write!(f, "unsupported"),
            HostErrorCode::Busy => write!(f, "busy"),
            HostErrorCode::Unknown(code) => write!(f, "unknown error (0x{:02X})", code),
        }
    }
}

impl From<u8> for HostErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ERR_DEVICE_NOT_FOUND => HostErrorCode::DeviceNotFound,
            ERR_CONNECT_FAILED => HostErrorCode::ConnectFailed,
            ERR_NOT_CONNECTED => HostErrorCode::NotConnected,
            ERR_GATT_FAILURE => HostErrorCode::GattFailure,
            ERR_UNSUPPORTED => HostErrorCode::Unsupported,
            ERR_BUSY => HostErrorCode::Busy,
            _ => HostErrorCode::Unknown(code),
        }
    }
}

impl From<HostErrorCode> for u8 {
    fn from(code: HostErrorCode) -> Self {
        match code {
            HostErrorCode::DeviceNotFound => ERR_DEVICE_NOT_FOUND,
            HostErrorCode::ConnectFailed => ERR_CONNECT_FAILED,
            HostErrorCode::NotConnected => ERR_NOT_CONNECTED,
            HostErrorCode::GattFailure => ERR_GATT_FAILURE,
            HostErrorCode::Unsupported => ERR_UNSUPPORTED,
            HostErrorCode::Busy => ERR_BUSY,
            HostErrorCode::Unknown(code) => code,
        }
    }
}
