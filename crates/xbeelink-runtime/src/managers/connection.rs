//! Per-link connection management
//!
//! Each peripheral gets its own actor task reached only through a
//! single-writer mailbox, so same-identity operations are strictly
//! serialized while different identities proceed independently. A
//! one-permit mutation gate rejects (never queues) a second connect or
//! disconnect observed before the first settles, and a link epoch counter
//! lets in-flight writes detect that a disconnect won the race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use xbeelink_core::{
    ConnectionState, GatewayError, GatewayEvent, LinkEvent, PeripheralId, PriorityLevel, Result,
};

use crate::managers::transfer::TransferManager;
use crate::shared::GatewayShared;

// ----------------------------------------------------------------------------
// Link Registry
// ----------------------------------------------------------------------------

/// Mailbox messages understood by a link actor
pub(crate) enum LinkOp {
    Connect {
        credential: Option<String>,
        permit: OwnedSemaphorePermit,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        permit: OwnedSemaphorePermit,
        reply: oneshot::Sender<Result<()>>,
    },
    RequestPriority {
        level: PriorityLevel,
    },
    LinkClosed {
        reason: Option<String>,
    },
}

/// Registry entry for one peripheral's link
#[derive(Clone)]
pub(crate) struct LinkEntry {
    /// Single-writer mailbox into the link actor
    pub mailbox: mpsc::Sender<LinkOp>,
    /// One permit: holds exactly one mutation in flight
    pub mutation_gate: Arc<Semaphore>,
    /// At most one in-flight outbound write per link
    pub write_gate: Arc<Mutex<()>>,
    /// Bumped on every departure from `Connected`
    pub epoch: Arc<AtomicU64>,
}

/// Proof that a link was `Connected` when a write began
///
/// Writers re-check staleness under the write gate and after the transport
/// settles; a bumped epoch means a disconnect won and the completion must be
/// discarded.
pub(crate) struct WriteAccess {
    pub write_gate: Arc<Mutex<()>>,
    epoch: Arc<AtomicU64>,
    epoch_at: u64,
}

impl WriteAccess {
    /// Whether the link left `Connected` since this access was granted
    pub fn is_stale(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.epoch_at
    }
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// View over the shared state implementing the connection lifecycle
pub struct ConnectionManager {
    shared: Arc<GatewayShared>,
}

impl ConnectionManager {
    pub(crate) fn new(shared: Arc<GatewayShared>) -> Self {
        Self { shared }
    }

    /// Open (and authenticate, when a credential is given) the link
    ///
    /// Valid only from `Disconnected`; a `Failed` link is reset first. A
    /// second mutation observed before the first settles is rejected with
    /// `InvalidStateTransition`.
    pub async fn connect(
        &self,
        identity: &PeripheralId,
        credential: Option<String>,
    ) -> Result<()> {
        self.require_cataloged(identity)?;
        let entry = self.ensure_link(identity);
        let permit = self.acquire_mutation(&entry, identity, "connect")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.deliver(
            &entry,
            LinkOp::Connect {
                credential,
                permit,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| GatewayError::channel_error("link actor dropped connect reply"))?
    }

    /// Tear the link down, cancelling any transfer and revoking writes first
    pub async fn disconnect(&self, identity: &PeripheralId) -> Result<()> {
        self.require_cataloged(identity)?;
        let entry = self.ensure_link(identity);
        let permit = self.acquire_mutation(&entry, identity, "disconnect")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.deliver(
            &entry,
            LinkOp::Disconnect {
                permit,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| GatewayError::channel_error("link actor dropped disconnect reply"))?
    }

    /// Fire-and-forget priority hint; valid only while `Connected`
    pub async fn request_priority(
        &self,
        identity: &PeripheralId,
        level: PriorityLevel,
    ) -> Result<()> {
        let state = self
            .shared
            .catalog
            .connection_state(identity)
            .ok_or_else(|| {
                GatewayError::invalid_argument(format!("peripheral {identity} not in catalog"))
            })?;
        if !state.is_connected() {
            return Err(GatewayError::invalid_transition(
                identity.clone(),
                "request_priority",
                state.name(),
            ));
        }
        let entry = self.ensure_link(identity);
        self.deliver(&entry, LinkOp::RequestPriority { level }).await
    }

    /// Route an unsolicited link closure to the identity's actor, if any
    pub(crate) async fn notify_link_closed(
        &self,
        identity: &PeripheralId,
        reason: Option<String>,
    ) {
        let Some(entry) = self.shared.links.get(identity).map(|e| e.value().clone()) else {
            debug!(identity = %identity, "link closure for untouched peripheral ignored");
            return;
        };
        if entry
            .mailbox
            .send(LinkOp::LinkClosed { reason })
            .await
            .is_err()
        {
            warn!(identity = %identity, "link actor gone; closure dropped");
        }
    }

    /// Grant write access iff the link is currently `Connected`
    pub(crate) fn write_access(&self, identity: &PeripheralId) -> Result<WriteAccess> {
        let connected = self
            .shared
            .catalog
            .connection_state(identity)
            .map(|s| s.is_connected())
            .unwrap_or(false);
        if !connected {
            return Err(GatewayError::NotConnected {
                identity: identity.clone(),
            });
        }
        let entry = self
            .shared
            .links
            .get(identity)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::NotConnected {
                identity: identity.clone(),
            })?;
        Ok(WriteAccess {
            write_gate: entry.write_gate.clone(),
            epoch_at: entry.epoch.load(Ordering::SeqCst),
            epoch: entry.epoch,
        })
    }

    fn require_cataloged(&self, identity: &PeripheralId) -> Result<()> {
        if self.shared.catalog.get(identity).is_none() {
            return Err(GatewayError::invalid_argument(format!(
                "peripheral {identity} not in catalog"
            )));
        }
        Ok(())
    }

    fn acquire_mutation(
        &self,
        entry: &LinkEntry,
        identity: &PeripheralId,
        operation: &'static str,
    ) -> Result<OwnedSemaphorePermit> {
        entry.mutation_gate.clone().try_acquire_owned().map_err(|_| {
            let state = self
                .shared
                .catalog
                .connection_state(identity)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            GatewayError::invalid_transition(
                identity.clone(),
                operation,
                format!("{state} (operation in flight)"),
            )
        })
    }

    async fn deliver(&self, entry: &LinkEntry, op: LinkOp) -> Result<()> {
        entry
            .mailbox
            .send(op)
            .await
            .map_err(|_| GatewayError::channel_error("link actor mailbox closed"))
    }

    /// Get or lazily spawn the actor for an identity
    fn ensure_link(&self, identity: &PeripheralId) -> LinkEntry {
        self.shared
            .links
            .entry(identity.clone())
            .or_insert_with(|| {
                let (mailbox_tx, mailbox_rx) =
                    mpsc::channel(self.shared.config.channels.link_mailbox_size);
                let entry = LinkEntry {
                    mailbox: mailbox_tx,
                    mutation_gate: Arc::new(Semaphore::new(1)),
                    write_gate: Arc::new(Mutex::new(())),
                    epoch: Arc::new(AtomicU64::new(0)),
                };
                let actor = LinkActor {
                    identity: identity.clone(),
                    shared: self.shared.clone(),
                    state: ConnectionState::Disconnected,
                    epoch: entry.epoch.clone(),
                };
                tokio::spawn(actor.run(mailbox_rx));
                entry
            })
            .value()
            .clone()
    }
}

// ----------------------------------------------------------------------------
// Link Actor
// ----------------------------------------------------------------------------

/// Owns one peripheral's authoritative lifecycle state
struct LinkActor {
    identity: PeripheralId,
    shared: Arc<GatewayShared>,
    state: ConnectionState,
    epoch: Arc<AtomicU64>,
}

impl LinkActor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<LinkOp>) {
        while let Some(op) = mailbox.recv().await {
            match op {
                LinkOp::Connect {
                    credential,
                    permit,
                    reply,
                } => {
                    let result = self.handle_connect(credential).await;
                    // Release the mutation gate before replying, so the next
                    // operation the caller issues is never spuriously busy.
                    drop(permit);
                    let _ = reply.send(result);
                }
                LinkOp::Disconnect { permit, reply } => {
                    let result = self.handle_disconnect().await;
                    drop(permit);
                    let _ = reply.send(result);
                }
                LinkOp::RequestPriority { level } => self.handle_priority(level).await,
                LinkOp::LinkClosed { reason } => self.handle_link_closed(reason).await,
            }
        }
        debug!(identity = %self.identity, "link actor mailbox closed");
    }

    /// Apply one lifecycle event: transition, mirror to the catalog, emit
    async fn apply(&mut self, event: LinkEvent, operation: &'static str) -> Result<()> {
        let old_state = self.state.clone();
        let new_state = old_state.clone().transition(event).map_err(|e| {
            GatewayError::invalid_transition(self.identity.clone(), operation, e.from)
        })?;

        if old_state.is_connected() && !new_state.is_connected() {
            // Revoke in-flight and future writes before anything else sees
            // the new state.
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        self.state = new_state.clone();
        self.shared
            .catalog
            .set_connection_state(&self.identity, new_state.clone());
        self.shared
            .bus
            .dispatch(GatewayEvent::ConnectionStateChanged {
                identity: self.identity.clone(),
                old_state,
                new_state,
            })
            .await;
        Ok(())
    }

    async fn handle_connect(&mut self, credential: Option<String>) -> Result<()> {
        if matches!(self.state, ConnectionState::Failed { .. }) {
            // A failed link is eligible for reset on the next attempt.
            self.apply(LinkEvent::Reset, "connect").await?;
        }
        self.apply(LinkEvent::ConnectRequested, "connect").await?;

        let credential_supplied = credential.is_some();
        let open = timeout(
            self.shared.config.connect_timeout,
            self.shared
                .transport
                .open_link(&self.identity, credential.as_deref()),
        )
        .await;

        match open {
            Ok(Ok(())) => {
                if credential_supplied {
                    self.apply(
                        LinkEvent::LinkOpened {
                            credential_supplied: true,
                        },
                        "connect",
                    )
                    .await?;
                    self.apply(LinkEvent::Authenticated, "connect").await?;
                } else {
                    self.apply(
                        LinkEvent::LinkOpened {
                            credential_supplied: false,
                        },
                        "connect",
                    )
                    .await?;
                }
                info!(identity = %self.identity, "link connected");

                if let Some(level) = self.shared.config.auto_priority {
                    if let Err(e) = self
                        .shared
                        .transport
                        .request_priority(&self.identity, level)
                        .await
                    {
                        debug!(identity = %self.identity, error = %e, "auto priority hint ignored");
                    }
                }
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(identity = %self.identity, error = %e, "connect failed");
                self.apply(
                    LinkEvent::ConnectFailed {
                        reason: e.to_string(),
                    },
                    "connect",
                )
                .await?;
                Err(e)
            }
            Err(_) => {
                let err = GatewayError::timeout(self.shared.config.connect_timeout);
                warn!(identity = %self.identity, "connect timed out");
                self.apply(
                    LinkEvent::ConnectFailed {
                        reason: err.to_string(),
                    },
                    "connect",
                )
                .await?;
                Err(err)
            }
        }
    }

    async fn handle_disconnect(&mut self) -> Result<()> {
        self.apply(LinkEvent::DisconnectRequested, "disconnect")
            .await?;

        // Cascade before the link goes away: the transfer must settle as
        // Cancelled and writes must already be revoked (epoch bumped in
        // apply) by the time the caller sees this disconnect complete.
        TransferManager::new(self.shared.clone())
            .force_cancel(&self.identity)
            .await;

        let close_result = self.shared.transport.close_link(&self.identity).await;
        self.apply(LinkEvent::LinkClosed, "disconnect").await?;
        info!(identity = %self.identity, "link disconnected");
        close_result
    }

    async fn handle_priority(&mut self, level: PriorityLevel) {
        if !self.state.is_connected() {
            debug!(identity = %self.identity, state = %self.state, "priority hint dropped");
            return;
        }
        if let Err(e) = self
            .shared
            .transport
            .request_priority(&self.identity, level)
            .await
        {
            // Deliberately best-effort: the hint is not part of the state
            // machine and its failure is not surfaced.
            debug!(identity = %self.identity, error = %e, "priority hint ignored by transport");
        }
    }

    async fn handle_link_closed(&mut self, reason: Option<String>) {
        if !self.state.is_active() {
            debug!(identity = %self.identity, state = %self.state, "stale link closure ignored");
            return;
        }
        info!(
            identity = %self.identity,
            reason = reason.as_deref().unwrap_or("unsolicited"),
            "link closed by transport"
        );
        TransferManager::new(self.shared.clone())
            .force_cancel(&self.identity)
            .await;
        if let Err(e) = self.apply(LinkEvent::LinkClosed, "link_closed").await {
            warn!(identity = %self.identity, error = %e, "link closure not applicable");
        }
    }
}
