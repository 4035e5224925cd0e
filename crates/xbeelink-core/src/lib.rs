//! Core protocol implementation for the XBee BLE gateway
//!
//! This crate holds the stable types and pure state machines of the gateway:
//!
//! - [`types`] - Peripheral identities, relay interfaces, catalog records
//! - [`errors`] - Error taxonomy and the `Result` alias
//! - [`config`] - Gateway and channel configuration
//! - [`state`] - The per-link connection lifecycle state machine
//! - [`catalog`] - Deduplicating, name-filtered discovery catalog
//! - [`relay`] - Interface-tagged relay framing
//! - [`transfer`] - Chunk planning and file-transfer session accounting
//! - [`transport`] - The radio transport seam and its scripted mock
//! - [`events`] - Consumer-visible gateway events
//!
//! The orchestration engine that drives radios through these state machines
//! lives in `xbeelink-runtime`.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod relay;
pub mod state;
pub mod transfer;
pub mod transport;
pub mod types;

// Public API exports
pub use catalog::{DeviceCatalog, Discovery};
pub use config::{ChannelConfig, GatewayConfig, DEFAULT_NAME_FILTER};
pub use errors::{GatewayError, Result, StateTransitionError, TransportError};
pub use events::GatewayEvent;
pub use relay::RelayFrame;
pub use state::{ConnectionState, LinkEvent};
pub use transfer::{
    ChunkFrame, ChunkPlan, FileSource, FileTransfer, TransferId, TransferProgress,
    TransferStatus, DEFAULT_CHUNK_SIZE,
};
pub use transport::{
    create_transport_event_channel, RadioTransport, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
pub use types::{
    AdvertisingData, PeripheralId, PeripheralRecord, PriorityLevel, RelayInterface, NO_NAME,
};
