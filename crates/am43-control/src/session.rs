//! Per-device connection state.

use std::sync::Arc;

use am43_metrics::{metric_defs, MetricLabels};
use am43_protocol::CONTROL_CHARACTERISTIC_UUID;
use ble_proxy_protocol::DeviceAddress;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::error::{ControlError, SessionError};
use crate::transport::ProxyTransport;

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No BLE connection.
    Disconnected,
    /// BLE connect requested.
    Connecting,
    /// Connected; notifications not yet enabled.
    Connected,
    /// Accepting commands.
    Ready,
    /// Tearing down.
    Closing,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Closing)
                | (Connected, Ready)
                | (Connected, Disconnected)
                | (Connected, Closing)
                | (Ready, Closing)
                | (Ready, Disconnected)
                | (Closing, Disconnected)
        )
    }

    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Ready => "Ready",
            SessionState::Closing => "Closing",
        };
        f.write_str(name)
    }
}

/// The session state of one device.
///
/// All state changes go through [`DeviceSession::transition`] or
/// [`DeviceSession::reset`]; observers follow them through a watch channel.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    address: DeviceAddress,
    state: Arc<watch::Sender<SessionState>>,
}

impl DeviceSession {
    pub fn new(address: DeviceAddress) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        DeviceSession {
            address,
            state: Arc::new(state),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut refused = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(address = %self.address, from = %current, to = %next, "session transition");
                *current = next;
                true
            } else {
                refused = Some(*current);
                false
            }
        });
        match refused {
            Some(from) => {
                let err = SessionError::InvalidTransition {
                    address: self.address.clone(),
                    from,
                    to: next,
                };
                warn!("{}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Drop to Disconnected from any state after an unrecoverable failure.
    pub fn reset(&self, reason: &str) {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Disconnected {
                return false;
            }
            debug!(address = %self.address, from = %current, %reason, "session reset");
            *current = SessionState::Disconnected;
            true
        });
    }

    /// Drive Disconnected → Connecting → Connected → Ready.
    ///
    /// The BLE connect is tried `connect_attempts` times. Any failure leaves
    /// the session Disconnected and returns `DeviceUnreachable`.
    pub async fn establish(
        &self,
        transport: &ProxyTransport,
        config: &ControlConfig,
    ) -> Result<(), ControlError> {
        self.transition(SessionState::Connecting)?;

        let attempts = config.connect_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match transport
                .connect_device(&self.address, config.connect_timeout())
                .await
            {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    debug!(address = %self.address, attempt, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(config.connect_retry_delay()).await;
            }
        }
        if let Some(e) = last_error {
            self.reset("connect failed");
            return Err(ControlError::unreachable(&self.address, e.to_string()));
        }
        self.transition(SessionState::Connected)?;

        if let Err(e) = transport
            .subscribe(&self.address, CONTROL_CHARACTERISTIC_UUID)
            .await
        {
            if !e.is_session_loss() {
                // Release the half-open connection
                let _ = transport.disconnect_device(&self.address).await;
            }
            self.reset("subscribe failed");
            return Err(ControlError::unreachable(
                &self.address,
                format!("subscribe failed: {}", e),
            ));
        }
        self.transition(SessionState::Ready)?;

        let labels = MetricLabels::new(self.address.as_str());
        metrics::counter!(metric_defs::SESSIONS_OPENED.name, &labels.to_labels()).increment(1);
        info!(address = %self.address, "session ready");
        Ok(())
    }
}
