//! Gateway configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};
use crate::transfer::DEFAULT_CHUNK_SIZE;
use crate::types::PriorityLevel;

/// Default case-sensitive substring accepted by the discovery name filter
pub const DEFAULT_NAME_FILTER: &str = "XBee";

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the gateway's internal channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Transport event queue (radio → gateway)
    pub transport_event_buffer_size: usize,
    /// Per-subscriber gateway event queue (gateway → consumers)
    pub gateway_event_buffer_size: usize,
    /// Per-link actor mailbox
    pub link_mailbox_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport_event_buffer_size: 64,
            gateway_event_buffer_size: 128,
            link_mailbox_size: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Gateway Configuration
// ----------------------------------------------------------------------------

/// Configuration for the gateway core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Case-sensitive substring a peripheral name must contain to enter the catalog
    pub name_filter: String,
    /// Default file-transfer chunk size in bytes
    pub chunk_size: usize,
    /// How long to wait for a chunk acknowledgement before retrying or failing
    pub chunk_ack_timeout: Duration,
    /// How long to wait for the transport to open a link
    pub connect_timeout: Duration,
    /// Extra transmissions allowed per chunk after an ack timeout (0 = fail fast)
    pub chunk_retry_limit: u32,
    /// Priority hint fired after every successful connect, if set
    pub auto_priority: Option<PriorityLevel>,
    /// Internal channel buffer sizes
    pub channels: ChannelConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            chunk_retry_limit: 0,
            auto_priority: None,
            channels: ChannelConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovery name filter token
    pub fn with_name_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.name_filter = filter.into();
        self
    }

    /// Set the default file-transfer chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the chunk acknowledgement timeout
    pub fn with_chunk_ack_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_ack_timeout = timeout;
        self
    }

    /// Set the link open timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-chunk retry budget
    pub fn with_chunk_retry_limit(mut self, limit: u32) -> Self {
        self.chunk_retry_limit = limit;
        self
    }

    /// Request a priority hint after every successful connect
    pub fn with_auto_priority(mut self, level: PriorityLevel) -> Self {
        self.auto_priority = Some(level);
        self
    }

    /// Set internal channel buffer sizes
    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Reject configurations the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GatewayError::config_error("chunk_size must be positive"));
        }
        if self.chunk_ack_timeout.is_zero() {
            return Err(GatewayError::config_error(
                "chunk_ack_timeout must be positive",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(GatewayError::config_error("connect_timeout must be positive"));
        }
        if self.channels.transport_event_buffer_size == 0
            || self.channels.gateway_event_buffer_size == 0
            || self.channels.link_mailbox_size == 0
        {
            return Err(GatewayError::config_error(
                "channel buffer sizes must be positive",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.name_filter, "XBee");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.chunk_retry_limit, 0);
        assert!(config.auto_priority.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = GatewayConfig::new()
            .with_name_filter("Sensor")
            .with_chunk_size(1000)
            .with_chunk_retry_limit(2)
            .with_auto_priority(PriorityLevel::High);
        assert_eq!(config.name_filter, "Sensor");
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_retry_limit, 2);
        assert_eq!(config.auto_priority, Some(PriorityLevel::High));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = GatewayConfig::new().with_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(GatewayError::Configuration { .. })
        ));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = GatewayConfig::new().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
        let config = GatewayConfig::new().with_chunk_ack_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
