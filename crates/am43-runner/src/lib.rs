//! Command-line front end for AM43 blinds.
//!
//! The `am43` binary drives blinds through a BLE radio host:
//!
//! ```text
//! am43 --endpoint 192.168.1.20:7843 move 02:AB:CD:EF:01:23 40
//! am43 battery 02:AB:CD:EF:01:23 --json
//! am43 watch 02:AB:CD:EF:01:23 02:AB:CD:EF:01:24
//! am43 simulate --device 02:AB:CD:EF:01:23
//! ```
//!
//! Settings come from an optional YAML file (`--config`) with flags taking
//! precedence. `RUST_LOG` overrides the `-v` log level.

mod cli;
mod error;
mod logging;
mod output;
mod settings;

pub use cli::*;
pub use error::*;
pub use logging::*;
pub use output::*;
pub use settings::*;
