//! Responses and unsolicited notifications from AM43 motors.

use crate::commands::{Command, CommandCode};
use crate::constants::*;
use crate::error::*;
use crate::frame::Frame;
use crate::types::*;

/// A decoded reply to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The device accepted the command.
    Ack,
    /// Battery level.
    Battery(BatteryLevel),
    /// Position and motor configuration.
    Position(PositionReport),
    /// Light sensor level.
    Light(LightLevel),
}

/// Interpret `frame` as the reply to `expected`.
///
/// The frame must carry the expected command code; an ERROR status becomes
/// [`ProtocolError::Rejected`]. Field decoding is delegated per command.
pub fn interpret(frame: &Frame, expected: &Command) -> ProtocolResult<Response> {
    if frame.code() != expected.code() {
        return Err(ProtocolError::UnexpectedFrame {
            expected: expected.code(),
            actual: frame.code(),
        });
    }
    if frame.is_error() {
        return Err(ProtocolError::Rejected(frame.code()));
    }

    match expected {
        Command::MoveTo(_)
        | Command::Open
        | Command::Close
        | Command::Stop
        | Command::SetLightThreshold(_)
        | Command::Login(_) => decode_status(frame),
        Command::GetBattery => decode_battery(frame.payload()).map(Response::Battery),
        Command::GetPosition => decode_position(frame.payload()).map(Response::Position),
        Command::GetLight => decode_light(frame.payload()).map(Response::Light),
    }
}

fn decode_status(frame: &Frame) -> ProtocolResult<Response> {
    match frame.status_byte() {
        Some(STATUS_ACK) => Ok(Response::Ack),
        Some(other) => Err(ProtocolError::OutOfRange {
            field: "status",
            value: other,
        }),
        None => Err(MalformedFrame::Truncated {
            expected: 1,
            actual: frame.payload().len(),
        }
        .into()),
    }
}

fn require(payload: &[u8], len: usize) -> ProtocolResult<()> {
    if payload.len() < len {
        return Err(MalformedFrame::Truncated {
            expected: len,
            actual: payload.len(),
        }
        .into());
    }
    Ok(())
}

fn decode_battery(payload: &[u8]) -> ProtocolResult<BatteryLevel> {
    require(payload, BATTERY_OFFSET + 1)?;
    Ok(BatteryLevel::from_raw(payload[BATTERY_OFFSET]))
}

fn decode_light(payload: &[u8]) -> ProtocolResult<LightLevel> {
    require(payload, LIGHT_OFFSET + 1)?;
    Ok(LightLevel::from_raw(payload[LIGHT_OFFSET]))
}

fn decode_position(payload: &[u8]) -> ProtocolResult<PositionReport> {
    require(payload, POSITION_OFFSET + 1)?;
    let raw = payload[POSITION_OFFSET];
    let position = match raw {
        POSITION_UNKNOWN => None,
        value => Some(Percentage::new(value).map_err(|_| ProtocolError::OutOfRange {
            field: "position",
            value,
        })?),
    };
    Ok(PositionReport {
        flags: PositionFlags::from(payload[POSITION_FLAGS_OFFSET]),
        speed: payload[POSITION_SPEED_OFFSET],
        position,
    })
}

// ============================================================================
// Reply builders (device side)
// ============================================================================

/// ACK or ERROR status reply for `code`.
pub fn status_reply(code: u8, accepted: bool) -> Frame {
    Frame::status(code, if accepted { STATUS_ACK } else { STATUS_ERROR })
}

/// Battery reply or notification.
pub fn battery_reply(level: BatteryLevel) -> Frame {
    let mut payload = vec![0u8; BATTERY_OFFSET + 1];
    payload[BATTERY_OFFSET] = level.percent();
    Frame::from_parts(CMD_GET_BATTERY, payload)
}

/// Light sensor reply or notification.
pub fn light_reply(level: LightLevel) -> Frame {
    let mut payload = vec![0u8; LIGHT_OFFSET + 1];
    payload[LIGHT_OFFSET] = level.value();
    Frame::from_parts(CMD_GET_LIGHT, payload)
}

/// Position reply or notification.
///
/// The trailing shade length, roller diameter and roller type bytes are
/// reported as zero.
pub fn position_reply(report: &PositionReport) -> Frame {
    let mut payload = vec![0u8; POSITION_OFFSET + 5];
    payload[POSITION_FLAGS_OFFSET] = report.flags.into();
    payload[POSITION_SPEED_OFFSET] = report.speed;
    payload[POSITION_OFFSET] = report.position.map_or(POSITION_UNKNOWN, Percentage::value);
    Frame::from_parts(CMD_GET_POSITION, payload)
}

// ============================================================================
// Notifications
// ============================================================================

/// Category of unsolicited update, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NotificationKind {
    /// Battery updates.
    Battery,
    /// Position updates.
    Position,
    /// Light sensor updates.
    Light,
    /// Obstacle or stall reports.
    Fault,
    /// Every kind.
    Any,
}

/// An unsolicited update pushed by a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Battery level changed.
    Battery(BatteryLevel),
    /// Position changed.
    Position(PositionReport),
    /// Light level changed.
    Light(LightLevel),
    /// The motor stopped on an obstacle or stalled; carries the move code.
    Fault(u8),
}

impl Notification {
    /// Classify a frame that did not answer an outstanding command.
    ///
    /// Returns `Ok(None)` for known frames that carry no update (stray ACKs,
    /// replies to login) or whose fields are out of range, and
    /// [`ProtocolError::UnknownCommand`] for codes outside the table.
    pub fn from_frame(frame: &Frame) -> ProtocolResult<Option<Notification>> {
        let notification = match CommandCode::from(frame.code()) {
            CommandCode::GetBattery => decode_battery(frame.payload()).ok().map(Notification::Battery),
            CommandCode::GetPosition => decode_position(frame.payload()).ok().map(Notification::Position),
            CommandCode::GetLight => decode_light(frame.payload()).ok().map(Notification::Light),
            CommandCode::Move | CommandCode::MoveTo if frame.is_error() => {
                Some(Notification::Fault(frame.code()))
            }
            CommandCode::Unknown(code) => return Err(ProtocolError::UnknownCommand(code)),
            code => {
                log::trace!("{:?} frame carries no notification", code);
                None
            }
        };
        Ok(notification)
    }

    /// The kind of this notification.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Battery(_) => NotificationKind::Battery,
            Notification::Position(_) => NotificationKind::Position,
            Notification::Light(_) => NotificationKind::Light,
            Notification::Fault(_) => NotificationKind::Fault,
        }
    }

    /// Whether a subscriber for `kind` should receive this notification.
    pub fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Any || kind == self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Checksum;

    fn through_wire(frame: &Frame) -> Frame {
        Frame::decode(&frame.to_wire(Checksum::Sum8), Checksum::Sum8).unwrap()
    }

    #[test]
    fn test_position_round_trip() {
        for value in [0u8, 50, 100] {
            let report = PositionReport {
                flags: PositionFlags {
                    top_limit_set: true,
                    bottom_limit_set: true,
                    ..Default::default()
                },
                speed: 30,
                position: Some(Percentage::new(value).unwrap()),
            };
            let frame = through_wire(&position_reply(&report));
            assert_eq!(
                interpret(&frame, &Command::GetPosition).unwrap(),
                Response::Position(report)
            );
        }
    }

    #[test]
    fn test_battery_and_light_round_trip() {
        for value in [0u8, 50, 100] {
            let frame = through_wire(&battery_reply(BatteryLevel::from_raw(value)));
            assert_eq!(
                interpret(&frame, &Command::GetBattery).unwrap(),
                Response::Battery(BatteryLevel::from_raw(value))
            );
        }
        let frame = through_wire(&light_reply(LightLevel::from_raw(7)));
        assert_eq!(
            interpret(&frame, &Command::GetLight).unwrap(),
            Response::Light(LightLevel::from_raw(7))
        );
    }

    #[test]
    fn test_vendor_battery_reply() {
        // 9A A2 05 00 00 00 00 64 <xor>
        let mut raw = vec![0x9A, 0xA2, 0x05, 0x00, 0x00, 0x00, 0x00, 0x64];
        raw.push(Checksum::Xor.compute(&raw));
        let frame = Frame::decode(&raw, Checksum::Xor).unwrap();
        assert_eq!(
            interpret(&frame, &Command::GetBattery).unwrap(),
            Response::Battery(BatteryLevel::from_raw(100))
        );
    }

    #[test]
    fn test_unknown_position() {
        let report = PositionReport {
            flags: PositionFlags::default(),
            speed: 0,
            position: None,
        };
        let frame = position_reply(&report);
        assert_eq!(frame.payload()[POSITION_OFFSET], POSITION_UNKNOWN);
        match interpret(&frame, &Command::GetPosition).unwrap() {
            Response::Position(decoded) => assert_eq!(decoded.position, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_position_out_of_range_rejected() {
        let frame = Frame::new(CMD_GET_POSITION, vec![0, 0, 150]).unwrap();
        assert_eq!(
            interpret(&frame, &Command::GetPosition).unwrap_err(),
            ProtocolError::OutOfRange {
                field: "position",
                value: 150
            }
        );
    }

    #[test]
    fn test_status_replies() {
        let stop = Command::Stop;
        assert_eq!(interpret(&status_reply(CMD_MOVE, true), &stop).unwrap(), Response::Ack);
        assert_eq!(
            interpret(&status_reply(CMD_MOVE, false), &stop).unwrap_err(),
            ProtocolError::Rejected(CMD_MOVE)
        );
        assert_eq!(
            interpret(&status_reply(CMD_MOVE_TO, true), &stop).unwrap_err(),
            ProtocolError::UnexpectedFrame {
                expected: CMD_MOVE,
                actual: CMD_MOVE_TO
            }
        );
    }

    #[test]
    fn test_notification_classification() {
        let battery = Notification::from_frame(&battery_reply(BatteryLevel::from_raw(12)))
            .unwrap()
            .unwrap();
        assert_eq!(battery.kind(), NotificationKind::Battery);
        assert!(battery.matches(NotificationKind::Any));
        assert!(!battery.matches(NotificationKind::Position));

        let fault = Notification::from_frame(&status_reply(CMD_MOVE, false))
            .unwrap()
            .unwrap();
        assert_eq!(fault, Notification::Fault(CMD_MOVE));

        assert_eq!(Notification::from_frame(&status_reply(CMD_MOVE, true)), Ok(None));
        assert_eq!(Notification::from_frame(&status_reply(CMD_LOGIN, true)), Ok(None));
    }

    #[test]
    fn test_unknown_code_is_reported() {
        assert_eq!(
            Notification::from_frame(&Frame::status(0x42, 0)),
            Err(ProtocolError::UnknownCommand(0x42))
        );
        let err = Notification::from_frame(&Frame::new(0x55, vec![1, 2, 3]).unwrap()).unwrap_err();
        assert!(!err.is_corruption());
    }
}
