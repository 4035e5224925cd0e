//! Gateway runtime
//!
//! Wires a radio transport to the protocol core and pumps its events. The
//! runtime owns the single dispatch queue: every transport event is fully
//! processed (catalog update, actor notification, ack routing, subscriber
//! fan-out) before the next one is read, so consumers observe transport
//! order.

use std::sync::Arc;

use smallvec::SmallVec;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use xbeelink_core::{
    create_transport_event_channel, DeviceCatalog, FileSource, GatewayConfig, GatewayError,
    GatewayEvent, PeripheralId, PeripheralRecord, PriorityLevel, RadioTransport, RelayInterface,
    Result, TransportEvent, TransportEventReceiver,
};

use crate::bus::EventBus;
use crate::managers::{ConnectionManager, RelayChannel, TransferManager, TransferTicket};
use crate::shared::GatewayShared;

// ----------------------------------------------------------------------------
// Gateway Runtime
// ----------------------------------------------------------------------------

/// Owns the event pump and the shared gateway state
pub struct GatewayRuntime {
    shared: Arc<GatewayShared>,
    event_rx: Option<TransportEventReceiver>,
    pump: Option<JoinHandle<()>>,
}

impl GatewayRuntime {
    /// Build a runtime over a radio transport
    ///
    /// Validates the configuration and attaches the transport's event
    /// channel; call [`start`](Self::start) to begin pumping.
    pub fn new(mut transport: Box<dyn RadioTransport>, config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, event_rx) = create_transport_event_channel(&config.channels);
        transport.attach_events(event_tx)?;

        let shared = Arc::new(GatewayShared {
            catalog: DeviceCatalog::new(config.name_filter.clone()),
            bus: EventBus::new(config.channels.gateway_event_buffer_size),
            transport: Arc::from(transport),
            links: Default::default(),
            transfers: Default::default(),
            config,
        });

        Ok(Self {
            shared,
            event_rx: Some(event_rx),
            pump: None,
        })
    }

    /// Cloneable handle exposing the command surface
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the event pump
    pub fn start(&mut self) -> Result<()> {
        let event_rx = self
            .event_rx
            .take()
            .ok_or_else(|| GatewayError::channel_error("runtime already started"))?;
        self.pump = Some(tokio::spawn(run_pump(self.shared.clone(), event_rx)));
        info!("gateway runtime started");
        Ok(())
    }

    /// Stop the event pump
    pub async fn shutdown(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        info!("gateway runtime stopped");
    }
}

async fn run_pump(shared: Arc<GatewayShared>, mut event_rx: TransportEventReceiver) {
    while let Some(event) = event_rx.recv().await {
        match event {
            TransportEvent::DeviceDiscovered(discovery) => {
                if let Some(record) = shared.catalog.on_discovered(discovery) {
                    shared
                        .bus
                        .dispatch(GatewayEvent::PeripheralDiscovered { record })
                        .await;
                }
            }
            TransportEvent::ScanStopped => {
                shared.bus.dispatch(GatewayEvent::DiscoveryStopped).await;
            }
            TransportEvent::LinkClosed { identity, reason } => {
                ConnectionManager::new(shared.clone())
                    .notify_link_closed(&identity, reason)
                    .await;
            }
            TransportEvent::DataReceived { identity, frame } => {
                RelayChannel::new(shared.clone())
                    .dispatch_inbound(identity, frame)
                    .await;
            }
            TransportEvent::FileChunkAck {
                identity,
                chunk_index,
            } => {
                TransferManager::new(shared.clone()).note_ack(&identity, chunk_index);
            }
        }
    }
    debug!("transport event channel closed; pump exiting");
}

// ----------------------------------------------------------------------------
// Gateway Handle
// ----------------------------------------------------------------------------

/// Command surface of the gateway, cloneable across tasks
#[derive(Clone)]
pub struct GatewayHandle {
    shared: Arc<GatewayShared>,
}

impl GatewayHandle {
    /// Begin scanning for peripherals
    pub async fn start_discovery(&self) -> Result<()> {
        self.shared.transport.start_scan().await
    }

    /// Stop scanning; `DiscoveryStopped` follows from the transport
    pub async fn stop_discovery(&self) -> Result<()> {
        self.shared.transport.stop_scan().await
    }

    /// Connect to a cataloged peripheral, authenticating when a credential
    /// is supplied
    pub async fn connect(
        &self,
        identity: &PeripheralId,
        credential: Option<&str>,
    ) -> Result<()> {
        ConnectionManager::new(self.shared.clone())
            .connect(identity, credential.map(str::to_string))
            .await
    }

    /// Disconnect a peripheral, cancelling its transfer and revoking writes
    pub async fn disconnect(&self, identity: &PeripheralId) -> Result<()> {
        ConnectionManager::new(self.shared.clone())
            .disconnect(identity)
            .await
    }

    /// Best-effort link priority hint; valid only while connected
    pub async fn request_priority(
        &self,
        identity: &PeripheralId,
        level: PriorityLevel,
    ) -> Result<()> {
        ConnectionManager::new(self.shared.clone())
            .request_priority(identity, level)
            .await
    }

    /// Send one payload on a logical relay interface
    pub async fn send_data(
        &self,
        identity: &PeripheralId,
        interface: RelayInterface,
        bytes: Vec<u8>,
    ) -> Result<()> {
        RelayChannel::new(self.shared.clone())
            .send(identity, interface, bytes)
            .await
    }

    /// Start a chunked file transfer to a connected peripheral
    pub async fn send_file(
        &self,
        identity: &PeripheralId,
        source: FileSource,
        chunk_size: Option<usize>,
    ) -> Result<TransferTicket> {
        TransferManager::new(self.shared.clone())
            .send_file(identity, source, chunk_size)
            .await
    }

    /// Cancel the peripheral's active transfer
    pub async fn cancel_file_transfer(&self, identity: &PeripheralId) -> Result<()> {
        TransferManager::new(self.shared.clone()).cancel(identity).await
    }

    /// Catalog contents in insertion order
    pub fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.shared.catalog.snapshot()
    }

    /// Observe full catalog snapshots as they change
    pub fn watch_catalog(&self) -> watch::Receiver<Vec<PeripheralRecord>> {
        self.shared.catalog.watch()
    }

    /// Subscribe to the gateway event stream
    pub async fn subscribe(&self) -> mpsc::Receiver<GatewayEvent> {
        self.shared.bus.subscribe().await
    }

    /// Identities currently connected
    pub fn connected_peripherals(&self) -> SmallVec<[PeripheralId; 8]> {
        self.shared
            .catalog
            .snapshot()
            .into_iter()
            .filter(|record| record.connection_state.is_connected())
            .map(|record| record.identity)
            .collect()
    }
}
