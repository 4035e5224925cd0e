//! Core types for the XBee gateway protocol
//!
//! This module defines the fundamental types used throughout the gateway,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};
use crate::state::ConnectionState;

/// Display name substituted when a peripheral advertises without a local name
pub const NO_NAME: &str = "NO NAME";

// ----------------------------------------------------------------------------
// Peripheral Identifier
// ----------------------------------------------------------------------------

/// Stable address uniquely naming a peripheral (BLE MAC address form)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create a new identity from a device address
    pub fn new<S: Into<String>>(address: S) -> Result<Self> {
        let address = address.into();
        if address.is_empty() {
            return Err(GatewayError::invalid_argument("peripheral address is empty"));
        }
        Ok(Self(address))
    }

    /// Get the address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeripheralId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// Relay Interfaces
// ----------------------------------------------------------------------------

/// Logical channel multiplexed over a single physical link
///
/// The wire tags match the XBee local-interface numbering so a receiver can
/// demultiplex frames without a parallel channel registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayInterface {
    /// The radio's serial/UART interface
    Serial,
    /// The radio's own local BLE interface
    RadioLocal,
    /// The on-module script runtime (MicroPython)
    ScriptRuntime,
}

impl RelayInterface {
    /// Integer tag identifying this interface on the wire
    pub fn wire_tag(self) -> u8 {
        match self {
            RelayInterface::Serial => 0,
            RelayInterface::RadioLocal => 1,
            RelayInterface::ScriptRuntime => 2,
        }
    }

    /// Resolve a wire tag back to an interface
    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RelayInterface::Serial),
            1 => Some(RelayInterface::RadioLocal),
            2 => Some(RelayInterface::ScriptRuntime),
            _ => None,
        }
    }
}

impl fmt::Display for RelayInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayInterface::Serial => write!(f, "Serial"),
            RelayInterface::RadioLocal => write!(f, "RadioLocal"),
            RelayInterface::ScriptRuntime => write!(f, "ScriptRuntime"),
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Priority
// ----------------------------------------------------------------------------

/// Link priority hint forwarded to the transport
///
/// The numeric values follow the Android BLE connection priority constants the
/// radio stack understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityLevel {
    /// Default trade-off between throughput and power
    Balanced,
    /// Low-latency, high-throughput link parameters
    High,
    /// Reduced duty cycle for battery-bound peripherals
    LowPower,
}

impl PriorityLevel {
    /// Integer value understood by the transport
    pub fn wire_value(self) -> u8 {
        match self {
            PriorityLevel::Balanced => 0,
            PriorityLevel::High => 1,
            PriorityLevel::LowPower => 2,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLevel::Balanced => write!(f, "Balanced"),
            PriorityLevel::High => write!(f, "High"),
            PriorityLevel::LowPower => write!(f, "LowPower"),
        }
    }
}

// ----------------------------------------------------------------------------
// Advertising Data
// ----------------------------------------------------------------------------

/// Advertising payload captured at discovery time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingData {
    /// Local name from the advertisement, if present
    pub local_name: Option<String>,
    /// Raw manufacturer-specific data
    pub manufacturer_data: Vec<u8>,
    /// Whether the peripheral advertised as connectable
    pub connectable: bool,
}

impl AdvertisingData {
    /// Manufacturer data rendered as hex for logs and diagnostics
    pub fn manufacturer_data_hex(&self) -> String {
        hex::encode(&self.manufacturer_data)
    }
}

// ----------------------------------------------------------------------------
// Peripheral Record
// ----------------------------------------------------------------------------

/// Catalog entry for a discovered peripheral
///
/// Identity-bearing fields are fixed after first insertion; only
/// `signal_strength` refreshes on rediscovery and only the connection manager
/// replaces `connection_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralRecord {
    /// Stable device address
    pub identity: PeripheralId,
    /// Received signal strength in dBm (more negative = weaker)
    pub signal_strength: i16,
    /// Display name, defaulted to [`NO_NAME`] when the transport omits one
    pub display_name: String,
    /// Advertising payload from the first sighting
    pub advertising: AdvertisingData,
    /// Current lifecycle state
    pub connection_state: ConnectionState,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peripheral_id_rejects_empty_address() {
        assert!(PeripheralId::new("").is_err());
        assert!(PeripheralId::new("A1:B2:C3:D4:E5:F6").is_ok());
    }

    #[test]
    fn peripheral_id_display_roundtrip() {
        let id: PeripheralId = "A1:B2".parse().unwrap();
        assert_eq!(id.to_string(), "A1:B2");
        assert_eq!(id.as_str(), "A1:B2");
    }

    #[test]
    fn relay_interface_wire_tags() {
        for iface in [
            RelayInterface::Serial,
            RelayInterface::RadioLocal,
            RelayInterface::ScriptRuntime,
        ] {
            assert_eq!(RelayInterface::from_wire_tag(iface.wire_tag()), Some(iface));
        }
        assert_eq!(RelayInterface::from_wire_tag(3), None);
        assert_eq!(RelayInterface::from_wire_tag(0xFF), None);
    }

    #[test]
    fn priority_level_wire_values() {
        assert_eq!(PriorityLevel::Balanced.wire_value(), 0);
        assert_eq!(PriorityLevel::High.wire_value(), 1);
        assert_eq!(PriorityLevel::LowPower.wire_value(), 2);
    }

    #[test]
    fn advertising_data_hex_rendering() {
        let adv = AdvertisingData {
            local_name: Some("XBee-04".to_string()),
            manufacturer_data: vec![0xDE, 0xAD],
            connectable: true,
        };
        assert_eq!(adv.manufacturer_data_hex(), "dead");
    }
}
