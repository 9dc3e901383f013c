//! Error types for the controller.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use am43_protocol::ValidationError;
use ble_proxy_protocol::{DeviceAddress, EnvelopeError, HostErrorCode};
use thiserror::Error;

use crate::session::SessionState;

/// Failures of the proxy link or of a request relayed over it.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The radio host could not be reached.
    #[error("radio host at {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Why the connection failed.
        reason: String,
    },

    /// The link dropped while the request was outstanding.
    #[error("proxy link is down")]
    LinkDown,

    /// The host did not answer in time.
    #[error("no reply from radio host within {0:?}")]
    Timeout(Duration),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The host sent bytes that are not a valid envelope.
    #[error("proxy protocol error: {0}")]
    Protocol(#[from] EnvelopeError),

    /// The host does not know the device.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The host could not open a BLE connection.
    #[error("BLE connect failed: {0}")]
    ConnectFailed(String),

    /// The device has no BLE connection on the host.
    #[error("device not connected: {0}")]
    NotConnected(String),

    /// A GATT operation failed on the host.
    #[error("GATT operation failed: {0}")]
    GattFailure(String),

    /// The host does not support the request.
    #[error("request unsupported by host: {0}")]
    Unsupported(String),

    /// The host is busy with another operation.
    #[error("host busy: {0}")]
    Busy(String),

    /// The host returned an error code this controller does not know.
    #[error("host error 0x{code:02X}: {message}")]
    Host {
        /// Raw error code.
        code: u8,
        /// Detail from the host.
        message: String,
    },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Map an `Error` reply from the host.
    pub fn from_host(code: HostErrorCode, message: String) -> Self {
        match code {
            HostErrorCode::DeviceNotFound => TransportError::DeviceNotFound(message),
            HostErrorCode::ConnectFailed => TransportError::ConnectFailed(message),
            HostErrorCode::NotConnected => TransportError::NotConnected(message),
            HostErrorCode::GattFailure => TransportError::GattFailure(message),
            HostErrorCode::Unsupported => TransportError::Unsupported(message),
            HostErrorCode::Busy => TransportError::Busy(message),
            HostErrorCode::Unknown(code) => TransportError::Host { code, message },
        }
    }

    /// Whether the device's session cannot survive this error.
    pub fn is_session_loss(&self) -> bool {
        matches!(
            self,
            TransportError::LinkDown
                | TransportError::Shutdown
                | TransportError::NotConnected(_)
                | TransportError::DeviceNotFound(_)
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

/// An illegal session state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested transition is not allowed from the current state.
    #[error("device {address}: invalid session transition {from} -> {to}")]
    InvalidTransition {
        /// Device whose session refused the change.
        address: DeviceAddress,
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },
}

/// Invalid controller configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configured PIN is out of range.
    #[error("invalid configuration: {0}")]
    Pin(#[from] ValidationError),
}

/// Errors returned to callers of the command API.
#[derive(Error, Debug, Clone)]
pub enum ControlError {
    /// Every attempt went unanswered.
    #[error("{command} timed out after {attempts} attempts")]
    CommandTimeout {
        /// Command name.
        command: &'static str,
        /// Attempts made.
        attempts: u32,
    },

    /// The device session could not be opened or was lost.
    #[error("device {address} unreachable: {reason}")]
    DeviceUnreachable {
        /// Device address.
        address: DeviceAddress,
        /// What went wrong.
        reason: String,
    },

    /// The proxy link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An argument was out of range; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The device answered with an error status.
    #[error("device rejected {command}")]
    CommandRejected {
        /// Command name.
        command: &'static str,
    },

    /// The device answered with something the command did not expect.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Called after the controller was shut down. Commands still pending
    /// when it shuts down fail with `DeviceUnreachable` instead.
    #[error("controller shut down")]
    Shutdown,
}

impl ControlError {
    /// Shorthand for [`ControlError::DeviceUnreachable`].
    pub fn unreachable(address: &DeviceAddress, reason: impl Into<String>) -> Self {
        ControlError::DeviceUnreachable {
            address: address.clone(),
            reason: reason.into(),
        }
    }

    /// Outcome label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ControlError::CommandTimeout { .. } => "timeout",
            ControlError::DeviceUnreachable { .. } => "unreachable",
            ControlError::CommandRejected { .. } => "rejected",
            _ => "error",
        }
    }
}

impl From<SessionError> for ControlError {
    fn from(e: SessionError) -> Self {
        match &e {
            SessionError::InvalidTransition { address, .. } => {
                ControlError::unreachable(address, e.to_string())
            }
        }
    }
}
