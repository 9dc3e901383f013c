//! Commands that can be sent to AM43 motors.

use crate::constants::*;
use crate::frame::Frame;
use crate::types::*;

/// Command code table.
///
/// Every code the crate knows is listed here; anything else decodes to
/// [`CommandCode::Unknown`] instead of being silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Open, close or stop.
    Move,
    /// Move to a percentage.
    MoveTo,
    /// PIN login.
    Login,
    /// Set light threshold.
    SetLightThreshold,
    /// Battery query.
    GetBattery,
    /// Position query.
    GetPosition,
    /// Light sensor query.
    GetLight,
    /// A code outside the table.
    Unknown(u8),
}

impl From<u8> for CommandCode {
    fn from(code: u8) -> Self {
        match code {
            CMD_MOVE => CommandCode::Move,
            CMD_MOVE_TO => CommandCode::MoveTo,
            CMD_LOGIN => CommandCode::Login,
            CMD_SET_LIGHT_THRESHOLD => CommandCode::SetLightThreshold,
            CMD_GET_BATTERY => CommandCode::GetBattery,
            CMD_GET_POSITION => CommandCode::GetPosition,
            CMD_GET_LIGHT => CommandCode::GetLight,
            _ => CommandCode::Unknown(code),
        }
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> Self {
        match code {
            CommandCode::Move => CMD_MOVE,
            CommandCode::MoveTo => CMD_MOVE_TO,
            CommandCode::Login => CMD_LOGIN,
            CommandCode::SetLightThreshold => CMD_SET_LIGHT_THRESHOLD,
            CommandCode::GetBattery => CMD_GET_BATTERY,
            CommandCode::GetPosition => CMD_GET_POSITION,
            CommandCode::GetLight => CMD_GET_LIGHT,
            CommandCode::Unknown(code) => code,
        }
    }
}

/// Shape of the reply a command waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// A single ACK or ERROR status byte.
    Status,
    /// A data payload of at least this many bytes.
    Data {
        /// Minimum payload length the decoder reads.
        min_len: usize,
    },
}

/// Commands that can be sent to a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move to an absolute position.
    MoveTo(Percentage),
    /// Open fully.
    Open,
    /// Close fully.
    Close,
    /// Stop moving.
    Stop,
    /// Read the battery level.
    GetBattery,
    /// Read position and motor configuration.
    GetPosition,
    /// Read the light sensor.
    GetLight,
    /// Set the light sensor threshold.
    SetLightThreshold(LightLevel),
    /// Authenticate with the device PIN.
    Login(Pin),
}

impl Command {
    /// Get the command code for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::MoveTo(_) => CMD_MOVE_TO,
            Command::Open | Command::Close | Command::Stop => CMD_MOVE,
            Command::GetBattery => CMD_GET_BATTERY,
            Command::GetPosition => CMD_GET_POSITION,
            Command::GetLight => CMD_GET_LIGHT,
            Command::SetLightThreshold(_) => CMD_SET_LIGHT_THRESHOLD,
            Command::Login(_) => CMD_LOGIN,
        }
    }

    /// Short name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Command::MoveTo(_) => "move_to",
            Command::Open => "open",
            Command::Close => "close",
            Command::Stop => "stop",
            Command::GetBattery => "get_battery",
            Command::GetPosition => "get_position",
            Command::GetLight => "get_light",
            Command::SetLightThreshold(_) => "set_light_threshold",
            Command::Login(_) => "login",
        }
    }

    /// Encode the command payload.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::MoveTo(position) => vec![position.value()],
            Command::Open => vec![MOVE_OPEN],
            Command::Close => vec![MOVE_CLOSE],
            Command::Stop => vec![MOVE_STOP],
            Command::GetBattery | Command::GetPosition | Command::GetLight => {
                vec![QUERY_PLACEHOLDER]
            }
            Command::SetLightThreshold(level) => vec![level.value()],
            Command::Login(pin) => pin.value().to_be_bytes().to_vec(),
        }
    }

    /// Encode the command into a frame.
    pub fn encode(&self) -> Frame {
        // Command payloads are at most two bytes
        Frame::from_parts(self.code(), self.payload())
    }

    /// The reply this command expects.
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            Command::MoveTo(_)
            | Command::Open
            | Command::Close
            | Command::Stop
            | Command::SetLightThreshold(_)
            | Command::Login(_) => ReplyShape::Status,
            Command::GetBattery => ReplyShape::Data {
                min_len: BATTERY_OFFSET + 1,
            },
            Command::GetPosition => ReplyShape::Data {
                min_len: POSITION_OFFSET + 1,
            },
            Command::GetLight => ReplyShape::Data {
                min_len: LIGHT_OFFSET + 1,
            },
        }
    }

    /// Whether `frame` answers this command.
    ///
    /// Frames carry no correlation id, so a reply is recognised by command
    /// code and payload shape. Anything else is an unsolicited notification.
    pub fn accepts(&self, frame: &Frame) -> bool {
        if frame.code() != self.code() {
            return false;
        }
        match self.reply_shape() {
            ReplyShape::Status => frame.status_byte().is_some(),
            // An ERROR status answers a query too
            ReplyShape::Data { min_len } => frame.payload().len() >= min_len || frame.is_error(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::MoveTo(position) => write!(f, "move_to({})", position),
            Command::SetLightThreshold(level) => write!(f, "set_light_threshold({})", level),
            other => f.write_str(other.name()),
        }
    }
}
