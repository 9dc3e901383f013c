//! Configuration loading.
//!
//! Settings come from an optional YAML file; command-line flags override it.

use std::path::Path;

use am43_control::{Checksum, ControlConfig};
use clap::ValueEnum;

use crate::error::RunnerError;

/// Checksum algorithm as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChecksumArg {
    Sum8,
    Xor,
}

impl From<ChecksumArg> for Checksum {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Sum8 => Checksum::Sum8,
            ChecksumArg::Xor => Checksum::Xor,
        }
    }
}

/// Flags that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub checksum: Option<ChecksumArg>,
    pub pin: Option<u16>,
    pub attempt_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut ControlConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(checksum) = self.checksum {
            config.checksum = checksum.into();
        }
        if let Some(pin) = self.pin {
            config.pin = Some(pin);
        }
        if let Some(ms) = self.attempt_timeout_ms {
            config.attempt_timeout_ms = ms;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts;
        }
    }
}

/// Parse a YAML config document.
pub fn parse_config(yaml: &str, origin: &str) -> Result<ControlConfig, RunnerError> {
    serde_yaml::from_str(yaml).map_err(|source| RunnerError::ConfigFile {
        path: origin.to_string(),
        source,
    })
}

/// Load the config file (defaults when `path` is `None`), apply the
/// overrides and validate the result.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ControlConfig, RunnerError> {
    let mut config = match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)?;
            parse_config(&yaml, &path.display().to_string())?
        }
        None => ControlConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}
