//! AM43 Blind Control
//!
//! Drives AM43-class blind motors through a radio host that relays GATT
//! operations over one TCP link.
//!
//! # Architecture
//!
//! - [`ProxyTransport`]: the multiplexed link to the radio host, with
//!   heartbeats and reconnect backoff.
//! - [`DeviceSession`]: per-device connection state machine.
//! - [`CommandDispatcher`]: per-device FIFO with one command in flight,
//!   per-attempt timeouts and bounded retries.
//! - [`NotificationRouter`]: fan-out of unsolicited updates to bounded
//!   observer queues.
//! - [`Am43Controller`] / [`Am43Device`]: the command-level API.
//!
//! # Example
//!
//! ```rust,no_run
//! use am43_control::{Am43Controller, ControlConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Am43Controller::connect(ControlConfig::default()).await?;
//! let blind = controller.device("02:AB:CD:EF:01:23".parse()?);
//! blind.move_to(50).await?;
//! println!("battery {}", blind.battery().await?);
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod device;
mod dispatcher;
mod error;
mod registry;
mod router;
mod session;
mod transport;

pub use config::*;
pub use device::*;
pub use dispatcher::*;
pub use error::*;
pub use registry::*;
pub use router::*;
pub use session::*;
pub use transport::*;

pub use am43_protocol::{
    BatteryLevel, Checksum, Command, DeviceState, LightLevel, Notification, NotificationKind,
    Percentage, PositionReport, Response, ValidationError,
};
pub use ble_proxy_protocol::DeviceAddress;
