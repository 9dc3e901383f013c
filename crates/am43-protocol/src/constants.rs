//! Protocol constants
//!
//! Command codes, status bytes and framing values used by AM43 motor firmware.

// ============================================================================
// Framing
// ============================================================================

/// Marker byte that starts every frame.
pub const FRAME_HEADER: u8 = 0x9A;

/// Wake-up preamble written before every outbound frame.
///
/// The preamble is not part of the frame and is excluded from the checksum.
pub const WIRE_PREAMBLE: [u8; 4] = [0x00, 0xFF, 0x00, 0x00];

/// Header + code + length.
pub const FRAME_OVERHEAD_HEAD: usize = 3;

/// Header + code + length + checksum.
pub const FRAME_OVERHEAD: usize = FRAME_OVERHEAD_HEAD + 1;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Largest complete frame (without preamble).
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + FRAME_OVERHEAD;

// ============================================================================
// Command Codes
// ============================================================================

/// Open, close or stop; the payload selects the direction.
pub const CMD_MOVE: u8 = 0x0A;
/// Move to an absolute percentage.
pub const CMD_MOVE_TO: u8 = 0x0D;
/// Authenticate with the device PIN.
pub const CMD_LOGIN: u8 = 0x17;
/// Set the light sensor threshold.
pub const CMD_SET_LIGHT_THRESHOLD: u8 = 0x1A;
/// Query battery level.
pub const CMD_GET_BATTERY: u8 = 0xA2;
/// Query position and motor configuration.
pub const CMD_GET_POSITION: u8 = 0xA7;
/// Query the light sensor.
pub const CMD_GET_LIGHT: u8 = 0xAA;

// ============================================================================
// Payload Values
// ============================================================================

/// `CMD_MOVE` payload: open fully.
pub const MOVE_OPEN: u8 = 0xDD;
/// `CMD_MOVE` payload: close fully.
pub const MOVE_CLOSE: u8 = 0xEE;
/// `CMD_MOVE` payload: stop.
pub const MOVE_STOP: u8 = 0xCC;

/// Query commands carry a single placeholder byte.
pub const QUERY_PLACEHOLDER: u8 = 0x01;

/// Reply status: command accepted.
pub const STATUS_ACK: u8 = 0x5A;
/// Reply status: command refused.
pub const STATUS_ERROR: u8 = 0xA5;

/// Position byte reported when the travel limits have not been set.
pub const POSITION_UNKNOWN: u8 = 0xFF;

// ============================================================================
// Response Layout
// ============================================================================

/// Offset of the battery percentage in a `CMD_GET_BATTERY` reply payload.
pub const BATTERY_OFFSET: usize = 4;
/// Offset of the light level in a `CMD_GET_LIGHT` reply payload.
pub const LIGHT_OFFSET: usize = 1;
/// Offset of the configuration flags in a `CMD_GET_POSITION` reply payload.
pub const POSITION_FLAGS_OFFSET: usize = 0;
/// Offset of the speed setting in a `CMD_GET_POSITION` reply payload.
pub const POSITION_SPEED_OFFSET: usize = 1;
/// Offset of the current position in a `CMD_GET_POSITION` reply payload.
pub const POSITION_OFFSET: usize = 2;

/// Position flag: motor direction reversed.
pub const FLAG_REVERSED: u8 = 0x01;
/// Position flag: top travel limit set.
pub const FLAG_TOP_LIMIT: u8 = 0x04;
/// Position flag: bottom travel limit set.
pub const FLAG_BOTTOM_LIMIT: u8 = 0x08;
/// Position flag: light sensor attached.
pub const FLAG_LIGHT_SENSOR: u8 = 0x10;

// ============================================================================
// Value Ranges
// ============================================================================

/// Highest position/battery percentage.
pub const MAX_PERCENT: u8 = 100;
/// Highest light level on the device scale.
pub const MAX_LIGHT_LEVEL: u8 = 9;
/// Highest device PIN.
pub const MAX_PIN: u16 = 9999;

// ============================================================================
// GATT
// ============================================================================

/// Control service (16-bit UUID 0xFE50).
pub const CONTROL_SERVICE_UUID: u16 = 0xFE50;
/// Read/write/notify control characteristic (16-bit UUID 0xFE51).
pub const CONTROL_CHARACTERISTIC_UUID: u16 = 0xFE51;
