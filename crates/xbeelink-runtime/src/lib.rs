//! XBee Gateway Runtime Engine
//!
//! This crate contains the orchestration engine for the XBee BLE gateway:
//!
//! - [`GatewayRuntime`]: wires a radio transport to the protocol core and
//!   pumps its events
//! - [`GatewayHandle`]: the cloneable command surface (discovery, connect,
//!   relay, file transfer)
//! - Per-link actors, the relay multiplexer, and the transfer driver under
//!   [`managers`]
//!
//! This is the "engine" of the gateway; `xbeelink-core` provides the stable
//! type and state machine definitions it drives.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use xbeelink_core::{GatewayConfig, FileSource, PeripheralId, RelayInterface};
//! use xbeelink_runtime::GatewayRuntime;
//!
//! # async fn example(radio: Box<dyn xbeelink_core::RadioTransport>) -> xbeelink_core::Result<()> {
//! let mut runtime = GatewayRuntime::new(radio, GatewayConfig::default())?;
//! runtime.start()?;
//! let gateway = runtime.handle();
//!
//! gateway.start_discovery().await?;
//! // ... pick a peripheral from gateway.snapshot() ...
//! let identity: PeripheralId = "A1:B2:C3:D4:E5:F6".parse()?;
//! gateway.connect(&identity, Some("1234")).await?;
//! gateway
//!     .send_data(&identity, RelayInterface::Serial, vec![0x50, 0x50])
//!     .await?;
//! let ticket = gateway
//!     .send_file(&identity, FileSource::Bytes(vec![0; 10_000]), Some(1000))
//!     .await?;
//! let outcome = ticket.outcome().await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

mod bus;
pub mod managers;
mod runtime;
mod shared;

pub use managers::{ConnectionManager, RelayChannel, TransferManager, TransferTicket};
pub use runtime::{GatewayHandle, GatewayRuntime};

// Re-export core types for convenience
pub use xbeelink_core::{
    ChannelConfig, ConnectionState, DeviceCatalog, Discovery, FileSource, GatewayConfig,
    GatewayError, GatewayEvent, PeripheralId, PeripheralRecord, PriorityLevel, RadioTransport,
    RelayInterface, Result, TransferId, TransferStatus,
};
