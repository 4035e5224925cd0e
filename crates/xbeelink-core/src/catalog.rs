//! Peripheral discovery catalog
//!
//! Deduplicates discovered peripherals by identity, applies the configured
//! name filter, and yields a stable insertion-ordered view. The record store
//! is the one structure shared between discovery and the connection manager,
//! so every mutation is a whole-record replacement published atomically to
//! snapshot readers and watch subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use smallvec::SmallVec;
use tokio::sync::watch;
use tracing::debug;

use crate::state::ConnectionState;
use crate::types::{AdvertisingData, PeripheralId, PeripheralRecord, NO_NAME};

// ----------------------------------------------------------------------------
// Discovery Input
// ----------------------------------------------------------------------------

/// Raw sighting reported by the radio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Stable device address
    pub identity: PeripheralId,
    /// Advertised name, if the transport captured one
    pub name: Option<String>,
    /// Received signal strength in dBm
    pub signal_strength: i16,
    /// Advertising payload
    pub advertising: AdvertisingData,
}

// ----------------------------------------------------------------------------
// Device Catalog
// ----------------------------------------------------------------------------

struct CatalogInner {
    /// Insertion order of accepted identities
    order: Vec<PeripheralId>,
    /// Accepted records keyed by identity
    records: HashMap<PeripheralId, PeripheralRecord>,
    /// Identities turned away by the name filter; never admitted later
    rejected: HashSet<PeripheralId>,
}

/// Insertion-ordered, deduplicated view of discovered peripherals
pub struct DeviceCatalog {
    inner: RwLock<CatalogInner>,
    snapshot_tx: watch::Sender<Vec<PeripheralRecord>>,
    name_filter: String,
}

impl DeviceCatalog {
    /// Create a catalog with the given name-filter token
    pub fn new<S: Into<String>>(name_filter: S) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        Self {
            inner: RwLock::new(CatalogInner {
                order: Vec::new(),
                records: HashMap::new(),
                rejected: HashSet::new(),
            }),
            snapshot_tx,
            name_filter: name_filter.into(),
        }
    }

    /// Process a sighting from the transport
    ///
    /// Returns the newly inserted record on first acceptance. Rediscovery of
    /// a present identity refreshes `signal_strength` only and returns
    /// `None`; identities rejected by the name filter are never admitted, on
    /// this sighting or any later one.
    pub fn on_discovered(&self, discovery: Discovery) -> Option<PeripheralRecord> {
        let display_name = discovery
            .name
            .clone()
            .unwrap_or_else(|| NO_NAME.to_string());

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = inner.records.get_mut(&discovery.identity) {
            if existing.signal_strength != discovery.signal_strength {
                let mut refreshed = existing.clone();
                refreshed.signal_strength = discovery.signal_strength;
                *existing = refreshed;
                // Published under the lock so watchers never see snapshots
                // out of order.
                self.snapshot_tx.send_replace(inner.snapshot());
            }
            return None;
        }

        if inner.rejected.contains(&discovery.identity) {
            return None;
        }

        if !display_name.contains(&self.name_filter) {
            debug!(
                identity = %discovery.identity,
                name = %display_name,
                "peripheral rejected by name filter"
            );
            inner.rejected.insert(discovery.identity);
            return None;
        }

        let record = PeripheralRecord {
            identity: discovery.identity.clone(),
            signal_strength: discovery.signal_strength,
            display_name,
            advertising: discovery.advertising,
            connection_state: ConnectionState::Disconnected,
        };

        debug!(identity = %record.identity, name = %record.display_name, "peripheral accepted");
        inner.order.push(discovery.identity);
        inner.records.insert(record.identity.clone(), record.clone());
        self.snapshot_tx.send_replace(inner.snapshot());
        Some(record)
    }

    /// Replace a record's connection state
    ///
    /// Returns `false` when the identity is not in the catalog. The whole
    /// record is swapped so readers never observe a partial update.
    pub fn set_connection_state(&self, identity: &PeripheralId, state: ConnectionState) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(existing) = inner.records.get_mut(identity) else {
            return false;
        };
        let mut replaced = existing.clone();
        replaced.connection_state = state;
        *existing = replaced;
        self.snapshot_tx.send_replace(inner.snapshot());
        true
    }

    /// Look up one record by identity
    pub fn get(&self, identity: &PeripheralId) -> Option<PeripheralRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.records.get(identity).cloned()
    }

    /// Current connection state for an identity, if cataloged
    pub fn connection_state(&self, identity: &PeripheralId) -> Option<ConnectionState> {
        self.get(identity).map(|r| r.connection_state)
    }

    /// Full catalog contents in insertion order
    pub fn snapshot(&self) -> Vec<PeripheralRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.snapshot()
    }

    /// Accepted identities in insertion order
    pub fn identities(&self) -> SmallVec<[PeripheralId; 8]> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.order.iter().cloned().collect()
    }

    /// Observe the full snapshot after every accepted insertion or
    /// connection-state replacement
    pub fn watch(&self) -> watch::Receiver<Vec<PeripheralRecord>> {
        self.snapshot_tx.subscribe()
    }
}

impl CatalogInner {
    fn snapshot(&self) -> Vec<PeripheralRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
