//! Controller configuration.
//!
//! Every field has a default, so a YAML file only needs the values it
//! changes. Durations are whole milliseconds.

use std::time::Duration;

use am43_protocol::{Checksum, Pin};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do with a command submitted while the device session is not Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPolicy {
    /// Queue the command and open the session.
    #[default]
    WaitForReady,
    /// Fail with `DeviceUnreachable` at once.
    FailFast,
}

/// Reconnect backoff for the proxy link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay ceiling for the first retry.
    pub base_ms: u64,
    /// Largest delay ceiling.
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

/// Link liveness probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between pings; zero disables the heartbeat.
    pub interval_ms: u64,
    /// How long to wait for a pong before declaring the link dead.
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval_ms: 15_000,
            timeout_ms: 5_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Radio host address, `host:port`.
    pub endpoint: String,
    /// Frame checksum algorithm; must match the motors.
    pub checksum: Checksum,
    /// Budget for one BLE connect.
    pub connect_timeout_ms: u64,
    /// BLE connect attempts per session open.
    pub connect_attempts: u32,
    /// Pause between connect attempts.
    pub connect_retry_delay_ms: u64,
    /// How long each command attempt waits for a reply.
    pub attempt_timeout_ms: u64,
    /// Attempts per command, including the first.
    pub max_attempts: u32,
    /// How long a queued command may wait for the session to become Ready;
    /// derived from the other budgets when unset.
    pub request_timeout_ms: Option<u64>,
    /// How long to wait for the host to acknowledge a request.
    pub ack_timeout_ms: u64,
    /// Behaviour when a device is not Ready.
    pub submit_policy: SubmitPolicy,
    /// Re-dial the radio host after the link drops.
    pub auto_reconnect: bool,
    /// Device PIN sent after each session opens.
    pub pin: Option<u16>,
    /// Notifications buffered per observer before it starts missing items.
    pub observer_capacity: usize,
    /// Link events buffered per device.
    pub inbox_capacity: usize,
    pub backoff: BackoffConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            endpoint: "127.0.0.1:7843".to_string(),
            checksum: Checksum::default(),
            connect_timeout_ms: 10_000,
            connect_attempts: 1,
            connect_retry_delay_ms: 500,
            attempt_timeout_ms: 2_000,
            max_attempts: 3,
            request_timeout_ms: None,
            ack_timeout_ms: 2_000,
            submit_policy: SubmitPolicy::default(),
            auto_reconnect: true,
            pin: None,
            observer_capacity: 16,
            inbox_capacity: 64,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ControlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// How long a queued command may wait for the session to become Ready.
    ///
    /// Defaults to the worst case of opening the session (every connect
    /// attempt, the subscribe, the login when a PIN is set) and exhausting
    /// every attempt of the command, plus one second.
    pub fn request_timeout(&self) -> Duration {
        if let Some(ms) = self.request_timeout_ms {
            return Duration::from_millis(ms);
        }
        let connects = self.connect_attempts.max(1);
        let command = self.attempt_timeout() * self.max_attempts;
        let login = if self.pin.is_some() { command } else { Duration::ZERO };
        self.connect_timeout() * connects
            + self.connect_retry_delay() * (connects - 1)
            + self.ack_timeout()
            + login
            + command
            + Duration::from_secs(1)
    }

    /// The configured PIN, validated.
    pub fn pin(&self) -> Result<Option<Pin>, ConfigError> {
        match self.pin {
            Some(value) => Ok(Some(Pin::new(value)?)),
            None => Ok(None),
        }
    }

    /// Check the settings for values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        positive("connect_timeout_ms", self.connect_timeout_ms)?;
        positive("connect_attempts", u64::from(self.connect_attempts))?;
        positive("attempt_timeout_ms", self.attempt_timeout_ms)?;
        positive("max_attempts", u64::from(self.max_attempts))?;
        positive("ack_timeout_ms", self.ack_timeout_ms)?;
        positive("observer_capacity", self.observer_capacity as u64)?;
        positive("inbox_capacity", self.inbox_capacity as u64)?;
        positive("backoff.base_ms", self.backoff.base_ms)?;
        if self.backoff.cap_ms < self.backoff.base_ms {
            return Err(ConfigError::Invalid {
                field: "backoff.cap_ms",
                reason: format!("must be at least base_ms ({})", self.backoff.base_ms),
            });
        }
        if self.heartbeat.interval_ms > 0 {
            positive("heartbeat.timeout_ms", self.heartbeat.timeout_ms)?;
        }
        if let Some(ms) = self.request_timeout_ms {
            positive("request_timeout_ms", ms)?;
        }
        self.pin()?;
        Ok(())
    }
}
