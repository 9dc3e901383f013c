//! BLE Proxy Wire Protocol
//!
//! This crate defines the messages exchanged between a controller and a
//! radio host that owns the BLE adapter. One TCP connection carries GATT
//! operations for any number of devices; each message names the device it
//! concerns.
//!
//! # Protocol Overview
//!
//! - **Requests** (controller → host): `Connect`, `Disconnect`, `Subscribe`,
//!   `Write`, `Ping`. Each carries a sequence number.
//! - **Replies** (host → controller): `Ack`, `Error`, `Pong`, echoing the
//!   request's sequence number.
//! - **Events** (host → controller): `Notify` and `DeviceDisconnected`, with
//!   sequence number zero.
//!
//! # Example
//!
//! ```rust
//! use ble_proxy_protocol::{DeviceAddress, Envelope, EnvelopeCodec, Message};
//!
//! let address: DeviceAddress = "02:ab:cd:ef:01:23".parse().unwrap();
//! let envelope = Envelope::new(7, address.clone(), Message::Ping);
//! let bytes = envelope.encode().unwrap();
//!
//! let mut codec = EnvelopeCodec::new();
//! codec.push(&bytes);
//! let decoded = codec.decode().unwrap().unwrap();
//! assert_eq!(decoded.address, address);
//! ```

mod address;
mod codec;
mod envelope;
mod error;

pub use address::*;
pub use codec::*;
pub use envelope::*;
pub use error::*;
