//! Device addresses.

use std::sync::Arc;

use crate::error::EnvelopeError;

/// Longest address the envelope can carry.
pub const MAX_ADDRESS_LEN: usize = u8::MAX as usize;

/// Stable identifier of a physical device, normally its BLE MAC address.
///
/// Addresses are compared case-insensitively by normalising to upper case on
/// construction. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct DeviceAddress(Arc<str>);

impl DeviceAddress {
    /// Address used by link-level messages that concern no device.
    pub fn link() -> Self {
        DeviceAddress(Arc::from("*"))
    }

    /// Whether this is the link-level placeholder.
    pub fn is_link(&self) -> bool {
        &*self.0 == "*"
    }

    /// Get the address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for DeviceAddress {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(EnvelopeError::InvalidAddress("empty".to_string()));
        }
        if trimmed.len() > MAX_ADDRESS_LEN {
            return Err(EnvelopeError::InvalidAddress(format!(
                "{} bytes exceeds {}",
                trimmed.len(),
                MAX_ADDRESS_LEN
            )));
        }
        Ok(DeviceAddress(Arc::from(trimmed.to_ascii_uppercase())))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0.to_string()
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalised() {
        let a: DeviceAddress = " 02:ab:cd:ef:01:23 ".parse().unwrap();
        let b: DeviceAddress = "02:AB:CD:EF:01:23".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "02:AB:CD:EF:01:23");
    }

    #[test]
    fn test_address_rejects_empty_and_long() {
        assert!("".parse::<DeviceAddress>().is_err());
        assert!("   ".parse::<DeviceAddress>().is_err());
        assert!("A".repeat(MAX_ADDRESS_LEN + 1).parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_link_placeholder() {
        assert!(DeviceAddress::link().is_link());
        assert!(!"AA".parse::<DeviceAddress>().unwrap().is_link());
    }
}
