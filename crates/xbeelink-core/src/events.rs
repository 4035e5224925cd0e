//! Consumer-visible gateway events

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;
use crate::types::{PeripheralId, PeripheralRecord, RelayInterface};

// ----------------------------------------------------------------------------
// Gateway Events
// ----------------------------------------------------------------------------

/// Events emitted by the gateway core to its subscribers
///
/// Dispatch preserves transport order: every subscriber sees each event
/// before the next one is processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// A peripheral passed the name filter and entered the catalog
    PeripheralDiscovered { record: PeripheralRecord },
    /// Discovery stopped
    DiscoveryStopped,
    /// A link moved along its lifecycle
    ConnectionStateChanged {
        identity: PeripheralId,
        old_state: ConnectionState,
        new_state: ConnectionState,
    },
    /// An inbound relay payload was demultiplexed
    DataRelayReceived {
        identity: PeripheralId,
        interface: RelayInterface,
        bytes: Vec<u8>,
    },
    /// One file-transfer chunk was acknowledged
    FileTransferProgress {
        identity: PeripheralId,
        bytes_sent: u64,
        file_length: u64,
        chunks_sent: u32,
        /// `bytes_sent / file_length` in `0.0..=1.0`
        progress: f64,
        /// Instantaneous transfer rate in bytes per second
        speed_bps: f64,
        /// Set on exactly the final event of a completed transfer
        done: bool,
    },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
