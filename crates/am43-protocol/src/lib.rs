//! AM43 Blind Motor Protocol
//!
//! This crate provides types and utilities for talking to AM43-class roller
//! blind motors. The motors expose one GATT characteristic that accepts
//! command frames and notifies reply frames; this crate covers the bytes that
//! travel over it, not the BLE link itself.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → motor): a frame whose code selects the operation
//!   (move, move-to, queries, login), written after a wake-up preamble.
//! - **Replies** (motor → host): a frame with the same code, carrying either a
//!   single ACK/ERROR status byte or query data.
//! - **Notifications** (motor → host): the same frames, sent unprompted when
//!   the motor's state changes.
//!
//! The frame format has no sequence number, so a reply can only be matched to
//! a command by its code and payload shape ([`Command::accepts`]).
//!
//! # Example
//!
//! ```rust
//! use am43_protocol::{interpret, status_reply, Checksum, Command, Frame, Percentage, Response};
//!
//! let command = Command::MoveTo(Percentage::new(50).unwrap());
//! let wire = command.encode().to_wire(Checksum::Sum8);
//!
//! let reply = status_reply(command.code(), true).encode(Checksum::Sum8);
//! let frame = Frame::decode(&reply, Checksum::Sum8).unwrap();
//! assert!(command.accepts(&frame));
//! assert_eq!(interpret(&frame, &command).unwrap(), Response::Ack);
//! # let _ = wire;
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod responses;
mod types;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use types::*;
