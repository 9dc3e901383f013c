//! Envelope layout and message types.
//!
//! All integers are big-endian.
//!
//! ```text
//! +---------+------+---------+----------+------------------+---------+
//! | len u32 | type | seq u16 | addr_len | addr[0..addr_len] | body    |
//! +---------+------+---------+----------+------------------+---------+
//! ```
//!
//! `len` counts every byte after the length field.

use bytes::{Buf, BufMut};

use crate::address::{DeviceAddress, MAX_ADDRESS_LEN};
use crate::error::{EnvelopeError, HostErrorCode};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Type + seq + addr_len.
pub const ENVELOPE_HEADER_SIZE: usize = 4;

/// Largest envelope (excluding the length prefix).
pub const MAX_ENVELOPE_SIZE: usize = 4096;

/// Message type: open a BLE connection.
pub const MSG_CONNECT: u8 = 0x01;
/// Message type: close a BLE connection.
pub const MSG_DISCONNECT: u8 = 0x02;
/// Message type: enable notifications on a characteristic.
pub const MSG_SUBSCRIBE: u8 = 0x03;
/// Message type: write a characteristic.
pub const MSG_WRITE: u8 = 0x04;
/// Message type: characteristic notification.
pub const MSG_NOTIFY: u8 = 0x05;
/// Message type: request succeeded.
pub const MSG_ACK: u8 = 0x06;
/// Message type: request failed.
pub const MSG_ERROR: u8 = 0x07;
/// Message type: the device dropped its BLE connection.
pub const MSG_DEVICE_DISCONNECTED: u8 = 0x08;
/// Message type: heartbeat request.
pub const MSG_PING: u8 = 0x09;
/// Message type: heartbeat reply.
pub const MSG_PONG: u8 = 0x0A;

/// A proxy message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Open a BLE connection to the device.
    Connect {
        /// How long the host may spend connecting.
        timeout_ms: u32,
    },
    /// Close the device's BLE connection.
    Disconnect,
    /// Enable notifications on a characteristic.
    Subscribe {
        /// 16-bit characteristic UUID.
        characteristic: u16,
    },
    /// Write a characteristic value.
    Write {
        /// 16-bit characteristic UUID.
        characteristic: u16,
        /// Use a write-with-response GATT operation.
        with_response: bool,
        /// Value to write.
        data: Vec<u8>,
    },
    /// A characteristic value notified by the device.
    Notify {
        /// 16-bit characteristic UUID.
        characteristic: u16,
        /// Notified value.
        data: Vec<u8>,
    },
    /// The request with the same sequence number succeeded.
    Ack,
    /// The request with the same sequence number failed.
    Error {
        /// Host error code.
        code: HostErrorCode,
        /// Human-readable detail.
        message: String,
    },
    /// The device's BLE connection dropped.
    DeviceDisconnected,
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
}

impl Message {
    /// Get the type byte for this message.
    pub fn type_code(&self) -> u8 {
        match self {
            Message::Connect { .. } => MSG_CONNECT,
            Message::Disconnect => MSG_DISCONNECT,
            Message::Subscribe { .. } => MSG_SUBSCRIBE,
            Message::Write { .. } => MSG_WRITE,
            Message::Notify { .. } => MSG_NOTIFY,
            Message::Ack => MSG_ACK,
            Message::Error { .. } => MSG_ERROR,
            Message::DeviceDisconnected => MSG_DEVICE_DISCONNECTED,
            Message::Ping => MSG_PING,
            Message::Pong => MSG_PONG,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::Disconnect => "disconnect",
            Message::Subscribe { .. } => "subscribe",
            Message::Write { .. } => "write",
            Message::Notify { .. } => "notify",
            Message::Ack => "ack",
            Message::Error { .. } => "error",
            Message::DeviceDisconnected => "device_disconnected",
            Message::Ping => "ping",
            Message::Pong => "pong",
        }
    }

    /// Whether this message answers a request.
    pub fn is_reply(&self) -> bool {
        matches!(self, Message::Ack | Message::Error { .. } | Message::Pong)
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            Message::Connect { timeout_ms } => buf.put_u32(*timeout_ms),
            Message::Subscribe { characteristic } => buf.put_u16(*characteristic),
            Message::Write {
                characteristic,
                with_response,
                data,
            } => {
                buf.put_u16(*characteristic);
                buf.put_u8(u8::from(*with_response));
                buf.extend_from_slice(data);
            }
            Message::Notify {
                characteristic,
                data,
            } => {
                buf.put_u16(*characteristic);
                buf.extend_from_slice(data);
            }
            Message::Error { code, message } => {
                buf.put_u8((*code).into());
                buf.extend_from_slice(message.as_bytes());
            }
            Message::Disconnect
            | Message::Ack
            | Message::DeviceDisconnected
            | Message::Ping
            | Message::Pong => {}
        }
    }

    fn decode_body(type_code: u8, mut body: &[u8]) -> Result<Self, EnvelopeError> {
        let need = |len: usize, body: &[u8]| {
            if body.len() < len {
                Err(EnvelopeError::TooShort {
                    expected: len,
                    actual: body.len(),
                })
            } else {
                Ok(())
            }
        };

        let message = match type_code {
            MSG_CONNECT => {
                need(4, body)?;
                Message::Connect {
                    timeout_ms: body.get_u32(),
                }
            }
            MSG_DISCONNECT => Message::Disconnect,
            MSG_SUBSCRIBE => {
                need(2, body)?;
                Message::Subscribe {
                    characteristic: body.get_u16(),
                }
            }
            MSG_WRITE => {
                need(3, body)?;
                let characteristic = body.get_u16();
                let with_response = body.get_u8() != 0;
                Message::Write {
                    characteristic,
                    with_response,
                    data: body.to_vec(),
                }
            }
            MSG_NOTIFY => {
                need(2, body)?;
                let characteristic = body.get_u16();
                Message::Notify {
                    characteristic,
                    data: body.to_vec(),
                }
            }
            MSG_ACK => Message::Ack,
            MSG_ERROR => {
                need(1, body)?;
                let code = HostErrorCode::from(body.get_u8());
                let message = std::str::from_utf8(body)
                    .map_err(|_| EnvelopeError::InvalidUtf8)?
                    .to_string();
                Message::Error { code, message }
            }
            MSG_DEVICE_DISCONNECTED => Message::DeviceDisconnected,
            MSG_PING => Message::Ping,
            MSG_PONG => Message::Pong,
            other => return Err(EnvelopeError::UnknownMessageType(other)),
        };
        Ok(message)
    }
}

/// One message addressed to (or from) a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Request sequence number; zero for host-initiated events.
    pub seq: u16,
    /// Device the message concerns.
    pub address: DeviceAddress,
    /// Message body.
    pub message: Message,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(seq: u16, address: DeviceAddress, message: Message) -> Self {
        Envelope {
            seq,
            address,
            message,
        }
    }

    /// Encode with the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let address = self.address.as_str().as_bytes();
        if address.len() > MAX_ADDRESS_LEN {
            return Err(EnvelopeError::InvalidAddress(self.address.to_string()));
        }

        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + ENVELOPE_HEADER_SIZE + address.len() + 16);
        buf.put_u32(0); // patched below
        buf.put_u8(self.message.type_code());
        buf.put_u16(self.seq);
        buf.put_u8(address.len() as u8);
        buf.extend_from_slice(address);
        self.message.encode_body(&mut buf);

        let len = buf.len() - LENGTH_PREFIX_SIZE;
        if len > MAX_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooLong {
                max: MAX_ENVELOPE_SIZE,
                actual: len,
            });
        }
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(buf)
    }

    /// Decode an envelope body (everything after the length prefix).
    pub fn decode(mut data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(EnvelopeError::TooShort {
                expected: ENVELOPE_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let type_code = data.get_u8();
        let seq = data.get_u16();
        let address_len = data.get_u8() as usize;
        if data.len() < address_len {
            return Err(EnvelopeError::TooShort {
                expected: address_len,
                actual: data.len(),
            });
        }
        let address = std::str::from_utf8(&data[..address_len])
            .map_err(|_| EnvelopeError::InvalidUtf8)?
            .parse::<DeviceAddress>()?;
        data.advance(address_len);

        let message = Message::decode_body(type_code, data)?;
        Ok(Envelope {
            seq,
            address,
            message,
        })
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} {}", self.message.name(), self.seq, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> DeviceAddress {
        "02:AB:CD:EF:01:23".parse().unwrap()
    }

    fn round_trip(message: Message) {
        let envelope = Envelope::new(42, addr(), message);
        let encoded = envelope.encode().unwrap();
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - LENGTH_PREFIX_SIZE);
        assert_eq!(Envelope::decode(&encoded[LENGTH_PREFIX_SIZE..]).unwrap(), envelope);
    }

    #[test]
    fn test_message_bodies() {
        round_trip(Message::Connect { timeout_ms: 10_000 });
        round_trip(Message::Write {
            characteristic: 0xFE51,
            with_response: false,
            data: vec![0x00, 0xFF, 0x00, 0x00, 0x9A, 0x0A, 0x01, 0xCC, 0x5D],
        });
        round_trip(Message::Notify {
            characteristic: 0xFE51,
            data: vec![],
        });
        round_trip(Message::Error {
            code: HostErrorCode::NotConnected,
            message: "no link".to_string(),
        });
        round_trip(Message::DeviceDisconnected);
    }

    #[test]
    fn test_header_layout() {
        let encoded = Envelope::new(0x0102, addr(), Message::Subscribe { characteristic: 0xFE51 })
            .encode()
            .unwrap();
        assert_eq!(encoded[4], MSG_SUBSCRIBE);
        assert_eq!(&encoded[5..7], &[0x01, 0x02]);
        assert_eq!(encoded[7] as usize, addr().as_str().len());
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFE, 0x51]);
    }

    #[test]
    fn test_unknown_type_and_short_body() {
        let mut body = vec![0x7F, 0, 1, 1, b'A'];
        assert_eq!(
            Envelope::decode(&body).unwrap_err(),
            EnvelopeError::UnknownMessageType(0x7F)
        );
        body[0] = MSG_CONNECT;
        body.push(0x00);
        assert!(matches!(
            Envelope::decode(&body).unwrap_err(),
            EnvelopeError::TooShort { expected: 4, .. }
        ));
    }

    #[test]
    fn test_oversized_write_rejected() {
        let envelope = Envelope::new(
            1,
            addr(),
            Message::Write {
                characteristic: 1,
                with_response: false,
                data: vec![0; MAX_ENVELOPE_SIZE],
            },
        );
        assert!(matches!(envelope.encode(), Err(EnvelopeError::TooLong { .. })));
    }

    #[test]
    fn test_error_code_mapping() {
        for code in 1..=6u8 {
            assert_eq!(u8::from(HostErrorCode::from(code)), code);
        }
        assert_eq!(HostErrorCode::from(0x99), HostErrorCode::Unknown(0x99));
    }
}
