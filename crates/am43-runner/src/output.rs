//! Human and JSON output.

use am43_control::{DeviceState, Notification, PositionReport};
use am43_protocol::PositionFlags;
use serde::Serialize;

use crate::error::RunnerError;

/// One line of command output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Done {
        device: String,
        command: String,
    },
    Battery {
        device: String,
        percent: u8,
    },
    Position {
        device: String,
        position: Option<u8>,
        speed: u8,
        flags: PositionFlags,
    },
    Light {
        device: String,
        level: u8,
    },
    Status {
        device: String,
        state: DeviceState,
    },
    Fault {
        device: String,
        code: u8,
    },
}

impl Report {
    pub fn position(device: &str, report: &PositionReport) -> Self {
        Report::Position {
            device: device.to_string(),
            position: report.position.map(|p| p.value()),
            speed: report.speed,
            flags: report.flags,
        }
    }

    /// Report for an unsolicited update.
    pub fn from_notification(device: &str, notification: &Notification) -> Self {
        let device = device.to_string();
        match notification {
            Notification::Battery(level) => Report::Battery {
                device,
                percent: level.percent(),
            },
            Notification::Position(report) => Report::position(&device, report),
            Notification::Light(level) => Report::Light {
                device,
                level: level.value(),
            },
            Notification::Fault(code) => Report::Fault { device, code: *code },
        }
    }

    /// Render as text, or as one JSON object when `json` is set.
    pub fn render(&self, json: bool) -> Result<String, RunnerError> {
        if json {
            return Ok(serde_json::to_string(self)?);
        }
        Ok(match self {
            Report::Done { device, command } => format!("{}: {} ok", device, command),
            Report::Battery { device, percent } => format!("{}: battery {}%", device, percent),
            Report::Position {
                device,
                position,
                speed,
                ..
            } => match position {
                Some(p) => format!("{}: position {}% (speed {} rpm)", device, p, speed),
                None => format!("{}: position unknown, limits not set", device),
            },
            Report::Light { device, level } => format!("{}: light {}/9", device, level),
            Report::Status { device, state } => format!("{}: {}", device, state),
            Report::Fault { device, code } => {
                format!("{}: motor fault on command 0x{:02X}", device, code)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am43_control::{BatteryLevel, Percentage};

    #[test]
    fn test_text_and_json() {
        let report = Report::Battery {
            device: "AA:BB".to_string(),
            percent: 77,
        };
        assert_eq!(report.render(false).unwrap(), "AA:BB: battery 77%");
        assert_eq!(
            report.render(true).unwrap(),
            r#"{"kind":"battery","device":"AA:BB","percent":77}"#
        );
    }

    #[test]
    fn test_unknown_position() {
        let report = PositionReport {
            flags: PositionFlags::default(),
            speed: 30,
            position: None,
        };
        assert_eq!(
            Report::position("AA:BB", &report).render(false).unwrap(),
            "AA:BB: position unknown, limits not set"
        );
    }

    #[test]
    fn test_notification_reports() {
        let report = PositionReport {
            flags: PositionFlags::default(),
            speed: 25,
            position: Some(Percentage::new(40).unwrap()),
        };
        assert_eq!(
            Report::from_notification("AA:BB", &Notification::Position(report)),
            Report::Position {
                device: "AA:BB".to_string(),
                position: Some(40),
                speed: 25,
                flags: PositionFlags::default(),
            }
        );
        assert_eq!(
            Report::from_notification("AA:BB", &Notification::Battery(BatteryLevel::from_raw(12)))
                .render(false)
                .unwrap(),
            "AA:BB: battery 12%"
        );
    }
}
