//! Shared runtime state
//!
//! One [`GatewayShared`] is allocated per runtime and handed around as an
//! `Arc`. It owns the data every component operates on; the manager types in
//! [`crate::managers`] are cheap views over it, which keeps the ownership
//! graph acyclic.

use std::sync::Arc;

use dashmap::DashMap;

use xbeelink_core::{DeviceCatalog, GatewayConfig, PeripheralId, RadioTransport};

use crate::bus::EventBus;
use crate::managers::connection::LinkEntry;
use crate::managers::transfer::SessionSlot;

pub(crate) struct GatewayShared {
    /// Runtime configuration, fixed at construction
    pub config: GatewayConfig,
    /// The external radio collaborator
    pub transport: Arc<dyn RadioTransport>,
    /// Discovery catalog and connection-state mirror
    pub catalog: DeviceCatalog,
    /// Ordered fan-out of consumer-visible events
    pub bus: EventBus,
    /// Per-identity link actors and their gates
    pub links: DashMap<PeripheralId, LinkEntry>,
    /// Per-identity file-transfer sessions
    pub transfers: DashMap<PeripheralId, SessionSlot>,
}
