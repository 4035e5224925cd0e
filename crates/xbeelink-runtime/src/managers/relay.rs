//! User-data relay channel
//!
//! Multiplexes small payloads across logical interfaces over an established
//! link. Outbound sends are gated on the link being exactly `Connected` and
//! on the per-link write gate; inbound frames are demultiplexed and fanned
//! out in transport order.

use std::sync::Arc;

use tracing::{debug, warn};

use xbeelink_core::{
    GatewayError, GatewayEvent, PeripheralId, RelayFrame, RelayInterface, Result,
};

use crate::managers::connection::ConnectionManager;
use crate::shared::GatewayShared;

// ----------------------------------------------------------------------------
// Relay Channel
// ----------------------------------------------------------------------------

/// View over the shared state implementing the relay multiplexer
pub struct RelayChannel {
    shared: Arc<GatewayShared>,
}

impl RelayChannel {
    pub(crate) fn new(shared: Arc<GatewayShared>) -> Self {
        Self { shared }
    }

    /// Send one payload on a logical interface
    ///
    /// Fails with `NotConnected` before touching the transport unless the
    /// link is exactly `Connected`. A disconnect racing the write wins: the
    /// stale completion is discarded and the caller sees `NotConnected`.
    pub async fn send(
        &self,
        identity: &PeripheralId,
        interface: RelayInterface,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let access = ConnectionManager::new(self.shared.clone()).write_access(identity)?;
        let frame = RelayFrame::new(interface, bytes)?;
        let encoded = frame.encode();

        let gate = access.write_gate.clone();
        let _in_flight = gate.lock().await;
        if access.is_stale() {
            return Err(GatewayError::NotConnected {
                identity: identity.clone(),
            });
        }

        let written = self.shared.transport.write_frame(identity, encoded).await;

        if access.is_stale() {
            debug!(identity = %identity, "discarding relay completion that lost to a disconnect");
            return Err(GatewayError::NotConnected {
                identity: identity.clone(),
            });
        }
        written?;
        debug!(identity = %identity, interface = %interface, "relay payload sent");
        Ok(())
    }

    /// Demultiplex one inbound frame and fan it out to subscribers
    pub(crate) async fn dispatch_inbound(&self, identity: PeripheralId, frame: Vec<u8>) {
        match RelayFrame::decode(&frame) {
            Ok(decoded) => {
                self.shared
                    .bus
                    .dispatch(GatewayEvent::DataRelayReceived {
                        identity,
                        interface: decoded.interface,
                        bytes: decoded.payload,
                    })
                    .await;
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "dropping undecodable relay frame");
            }
        }
    }
}
