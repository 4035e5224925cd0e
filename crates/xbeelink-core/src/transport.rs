//! Radio transport abstraction
//!
//! The gateway treats the radio as an opaque capability behind the
//! [`RadioTransport`] trait: primitive scan/link/write operations plus an
//! event channel for everything the radio originates (sightings, link
//! closures, inbound frames, chunk acknowledgements). Real adapters live
//! outside this crate; a scripted [`mock::MockRadio`] ships behind the
//! `testing` feature for driving the runtime deterministically.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::catalog::Discovery;
use crate::config::ChannelConfig;
use crate::errors::Result;
use crate::types::{PeripheralId, PriorityLevel};

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Events originated by the radio transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peripheral advertisement was sighted
    DeviceDiscovered(Discovery),
    /// Scanning stopped (requested or radio-initiated)
    ScanStopped,
    /// A link closed outside a confirmed disconnect exchange
    LinkClosed {
        identity: PeripheralId,
        reason: Option<String>,
    },
    /// An inbound relay frame arrived
    DataReceived {
        identity: PeripheralId,
        frame: Vec<u8>,
    },
    /// The radio acknowledged one transmitted file chunk
    FileChunkAck {
        identity: PeripheralId,
        chunk_index: u32,
    },
}

pub type TransportEventSender = mpsc::Sender<TransportEvent>;
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

/// Create the bounded transport event channel (radio → gateway)
pub fn create_transport_event_channel(
    config: &ChannelConfig,
) -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(config.transport_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Primitive operations the radio must expose
///
/// Every call suspends the caller until the radio responds; ordering and
/// delivery guarantees beyond that are the radio's business.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Hand the transport the sender it must emit [`TransportEvent`]s on
    fn attach_events(&mut self, events: TransportEventSender) -> Result<()>;

    /// Begin scanning for advertisements
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning; the transport reports `ScanStopped` when done
    async fn stop_scan(&self) -> Result<()>;

    /// Open (and, when a credential is supplied, authenticate) a link
    async fn open_link(&self, identity: &PeripheralId, credential: Option<&str>) -> Result<()>;

    /// Close an open link
    async fn close_link(&self, identity: &PeripheralId) -> Result<()>;

    /// Write one opaque frame to an open link
    async fn write_frame(&self, identity: &PeripheralId, frame: Vec<u8>) -> Result<()>;

    /// Best-effort link priority hint
    async fn request_priority(&self, identity: &PeripheralId, level: PriorityLevel) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Mock Transport (for testing)
// ----------------------------------------------------------------------------

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    //! Scripted radio for exercising the gateway without hardware

    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{RadioTransport, TransportEvent, TransportEventSender};
    use crate::catalog::Discovery;
    use crate::errors::{GatewayError, Result, TransportError};
    use crate::relay::RelayFrame;
    use crate::transfer::ChunkFrame;
    use crate::types::{AdvertisingData, PeripheralId, PriorityLevel, RelayInterface};

    /// Scripted outcome for `open_link` against one identity
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum LinkScript {
        /// Open succeeds (default)
        Open,
        /// Open fails with an authentication error
        AuthFailure,
        /// Open fails with a generic transport reason
        OpenFailure(String),
        /// Open never completes (exercises the connect timeout)
        Hang,
    }

    /// A recorded call into the mock radio
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        StartScan,
        StopScan,
        OpenLink {
            identity: PeripheralId,
            credential: Option<String>,
        },
        CloseLink {
            identity: PeripheralId,
        },
        WriteFrame {
            identity: PeripheralId,
            frame: Vec<u8>,
        },
        RequestPriority {
            identity: PeripheralId,
            level: PriorityLevel,
        },
    }

    #[derive(Default)]
    struct MockShared {
        events: Option<TransportEventSender>,
        scripts: HashMap<PeripheralId, LinkScript>,
        open_links: HashSet<PeripheralId>,
        calls: Vec<MockCall>,
        /// When set, every written frame that parses as a chunk frame is
        /// acknowledged immediately (unless its index is withheld)
        auto_ack: bool,
        withheld_acks: HashSet<(PeripheralId, u32)>,
        failing_writes: HashSet<PeripheralId>,
    }

    /// Scripted [`RadioTransport`] that records calls and injects events
    ///
    /// Clones share state, so tests can keep a handle after moving the mock
    /// into the runtime.
    #[derive(Clone, Default)]
    pub struct MockRadio {
        inner: Arc<Mutex<MockShared>>,
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockShared> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn sender(&self) -> Result<TransportEventSender> {
            self.lock()
                .events
                .clone()
                .ok_or_else(|| GatewayError::channel_error("mock radio has no event channel"))
        }

        async fn emit(&self, event: TransportEvent) -> Result<()> {
            self.sender()?
                .send(event)
                .await
                .map_err(|e| GatewayError::channel_error(e.to_string()))
        }

        /// Script the outcome of `open_link` for one identity
        pub fn script_link(&self, identity: PeripheralId, script: LinkScript) {
            self.lock().scripts.insert(identity, script);
        }

        /// Acknowledge every written chunk frame automatically
        pub fn set_auto_ack(&self, enabled: bool) {
            self.lock().auto_ack = enabled;
        }

        /// Withhold the auto-ack for one chunk index (first transmission only)
        pub fn withhold_ack(&self, identity: PeripheralId, chunk_index: u32) {
            self.lock().withheld_acks.insert((identity, chunk_index));
        }

        /// Make every write to the identity fail
        pub fn fail_writes(&self, identity: PeripheralId, failing: bool) {
            let mut inner = self.lock();
            if failing {
                inner.failing_writes.insert(identity);
            } else {
                inner.failing_writes.remove(&identity);
            }
        }

        /// All calls recorded so far
        pub fn calls(&self) -> Vec<MockCall> {
            self.lock().calls.clone()
        }

        /// Frames written to one identity
        pub fn written_frames(&self, identity: &PeripheralId) -> Vec<Vec<u8>> {
            self.lock()
                .calls
                .iter()
                .filter_map(|c| match c {
                    MockCall::WriteFrame { identity: id, frame } if id == identity => {
                        Some(frame.clone())
                    }
                    _ => None,
                })
                .collect()
        }

        /// Identities with an open link
        pub fn open_links(&self) -> HashSet<PeripheralId> {
            self.lock().open_links.clone()
        }

        /// Inject an advertisement sighting
        pub async fn discover(
            &self,
            identity: &str,
            name: Option<&str>,
            signal_strength: i16,
        ) -> Result<()> {
            let identity = PeripheralId::new(identity)?;
            self.emit(TransportEvent::DeviceDiscovered(Discovery {
                identity,
                name: name.map(str::to_string),
                signal_strength,
                advertising: AdvertisingData {
                    local_name: name.map(str::to_string),
                    manufacturer_data: Vec::new(),
                    connectable: true,
                },
            }))
            .await
        }

        /// Report an unsolicited link closure
        pub async fn close_unsolicited(
            &self,
            identity: PeripheralId,
            reason: Option<&str>,
        ) -> Result<()> {
            self.lock().open_links.remove(&identity);
            self.emit(TransportEvent::LinkClosed {
                identity,
                reason: reason.map(str::to_string),
            })
            .await
        }

        /// Deliver an inbound relay payload on the given interface
        pub async fn receive_relay(
            &self,
            identity: PeripheralId,
            interface: RelayInterface,
            payload: Vec<u8>,
        ) -> Result<()> {
            let frame = RelayFrame::new(interface, payload)?;
            self.emit(TransportEvent::DataReceived {
                identity,
                frame: frame.encode(),
            })
            .await
        }

        /// Deliver a raw (possibly malformed) inbound frame
        pub async fn receive_raw(&self, identity: PeripheralId, frame: Vec<u8>) -> Result<()> {
            self.emit(TransportEvent::DataReceived { identity, frame })
                .await
        }

        /// Acknowledge one chunk explicitly
        pub async fn ack_chunk(&self, identity: PeripheralId, chunk_index: u32) -> Result<()> {
            self.emit(TransportEvent::FileChunkAck {
                identity,
                chunk_index,
            })
            .await
        }
    }

    #[async_trait]
    impl RadioTransport for MockRadio {
        fn attach_events(&mut self, events: TransportEventSender) -> Result<()> {
            self.lock().events = Some(events);
            Ok(())
        }

        async fn start_scan(&self) -> Result<()> {
            self.lock().calls.push(MockCall::StartScan);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            self.lock().calls.push(MockCall::StopScan);
            self.emit(TransportEvent::ScanStopped).await
        }

        async fn open_link(
            &self,
            identity: &PeripheralId,
            credential: Option<&str>,
        ) -> Result<()> {
            let script = {
                let mut inner = self.lock();
                inner.calls.push(MockCall::OpenLink {
                    identity: identity.clone(),
                    credential: credential.map(str::to_string),
                });
                inner
                    .scripts
                    .get(identity)
                    .cloned()
                    .unwrap_or(LinkScript::Open)
            };

            match script {
                LinkScript::Open => {
                    self.lock().open_links.insert(identity.clone());
                    Ok(())
                }
                LinkScript::AuthFailure => Err(TransportError::AuthenticationFailed {
                    identity: identity.clone(),
                }
                .into()),
                LinkScript::OpenFailure(reason) => Err(TransportError::OpenFailed {
                    identity: identity.clone(),
                    reason,
                }
                .into()),
                LinkScript::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!("pending future resolved")
                }
            }
        }

        async fn close_link(&self, identity: &PeripheralId) -> Result<()> {
            let mut inner = self.lock();
            inner.calls.push(MockCall::CloseLink {
                identity: identity.clone(),
            });
            inner.open_links.remove(identity);
            Ok(())
        }

        async fn write_frame(&self, identity: &PeripheralId, frame: Vec<u8>) -> Result<()> {
            let ack = {
                let mut inner = self.lock();
                inner.calls.push(MockCall::WriteFrame {
                    identity: identity.clone(),
                    frame: frame.clone(),
                });
                if inner.failing_writes.contains(identity) {
                    return Err(TransportError::WriteFailed {
                        identity: identity.clone(),
                        reason: "scripted write failure".to_string(),
                    }
                    .into());
                }
                if inner.auto_ack {
                    match ChunkFrame::decode(&frame) {
                        Ok(chunk) => {
                            if inner.withheld_acks.remove(&(identity.clone(), chunk.index)) {
                                None
                            } else {
                                Some(chunk.index)
                            }
                        }
                        Err(_) => None,
                    }
                } else {
                    None
                }
            };

            if let Some(chunk_index) = ack {
                self.emit(TransportEvent::FileChunkAck {
                    identity: identity.clone(),
                    chunk_index,
                })
                .await?;
            }
            Ok(())
        }

        async fn request_priority(
            &self,
            identity: &PeripheralId,
            level: PriorityLevel,
        ) -> Result<()> {
            self.lock().calls.push(MockCall::RequestPriority {
                identity: identity.clone(),
                level,
            });
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
