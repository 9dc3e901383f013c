//! Simulated radio host and AM43 motors.
//!
//! [`SimHost`] answers the proxy protocol the way a BLE radio host would,
//! relaying writes to in-process [`SimMotor`]s and their replies back as
//! notifications. Tests connect to it over `tokio::io::duplex`; the CLI
//! serves it over TCP with [`TcpHostServer`].
//!
//! ```rust
//! use am43_protocol::Checksum;
//! use am43_sim::{SimHost, SimMotor};
//!
//! let host = SimHost::new(Checksum::Sum8);
//! let address = "02:AB:CD:EF:01:23".parse().unwrap();
//! host.add_device(address, SimMotor::new());
//! ```

mod host;
mod motor;
mod server;

pub use host::*;
pub use motor::*;
pub use server::*;
