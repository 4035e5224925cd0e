//! User-data relay framing
//!
//! A relay frame carries exactly one logical interface tag plus an opaque
//! payload. The one encoding rule this core owns is the leading tag byte,
//! which lets a receiver demultiplex without a parallel channel registry.
//! Everything past the tag is opaque to the gateway.

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};
use crate::types::RelayInterface;

// ----------------------------------------------------------------------------
// Relay Frame
// ----------------------------------------------------------------------------

/// One multiplexed payload tagged with its logical interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Logical interface this payload belongs to
    pub interface: RelayInterface,
    /// Opaque application bytes
    pub payload: Vec<u8>,
}

impl RelayFrame {
    /// Create a frame, rejecting empty payloads
    pub fn new(interface: RelayInterface, payload: Vec<u8>) -> Result<Self> {
        if payload.is_empty() {
            return Err(GatewayError::invalid_argument("relay payload is empty"));
        }
        Ok(Self { interface, payload })
    }

    /// Encode as wire bytes: interface tag followed by the payload
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.interface.wire_tag());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode wire bytes back into a frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (tag, payload) = match bytes {
            [] => return Err(GatewayError::invalid_argument("relay frame is empty")),
            [tag, payload @ ..] => (*tag, payload),
        };
        let interface = RelayInterface::from_wire_tag(tag).ok_or_else(|| {
            GatewayError::invalid_argument(format!("unknown relay interface tag {tag}"))
        })?;
        if payload.is_empty() {
            return Err(GatewayError::invalid_argument("relay frame has no payload"));
        }
        Ok(Self {
            interface,
            payload: payload.to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
