//! File-transfer session driver
//!
//! Drives one chunked transfer per peripheral: frame a chunk, write it under
//! the link's write gate, await the radio's acknowledgement (or time out,
//! with an optional bounded retry), account progress, repeat. Cancellation,
//! whether caller-requested or forced by link loss, is acknowledged by the
//! driver before the cancelling party proceeds, so no progress event can
//! trail it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use xbeelink_core::{
    ChunkFrame, ChunkPlan, FileSource, FileTransfer, GatewayError, GatewayEvent, PeripheralId,
    Result, TransferId, TransferProgress, TransferStatus,
};

use crate::managers::connection::ConnectionManager;
use crate::shared::GatewayShared;

// ----------------------------------------------------------------------------
// Session Registry
// ----------------------------------------------------------------------------

/// Registry entry for one peripheral's active transfer
pub(crate) struct SessionSlot {
    pub id: TransferId,
    pub cancel_tx: mpsc::Sender<()>,
    pub ack_tx: mpsc::Sender<u32>,
    pub status_rx: watch::Receiver<TransferStatus>,
}

/// Caller's handle onto a running transfer
#[derive(Debug)]
pub struct TransferTicket {
    /// Session identifier
    pub id: TransferId,
    status_rx: watch::Receiver<TransferStatus>,
}

impl TransferTicket {
    /// Current session status
    pub fn status(&self) -> TransferStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait for the session's terminal status
    pub async fn outcome(mut self) -> TransferStatus {
        loop {
            let current = self.status_rx.borrow().clone();
            if current.is_terminal() {
                return current;
            }
            if self.status_rx.changed().await.is_err() {
                return self.status_rx.borrow().clone();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Transfer Manager
// ----------------------------------------------------------------------------

/// View over the shared state implementing the transfer protocol
pub struct TransferManager {
    shared: Arc<GatewayShared>,
}

impl TransferManager {
    pub(crate) fn new(shared: Arc<GatewayShared>) -> Self {
        Self { shared }
    }

    /// Start a chunked transfer to a connected peripheral
    pub async fn send_file(
        &self,
        identity: &PeripheralId,
        source: FileSource,
        chunk_size: Option<usize>,
    ) -> Result<TransferTicket> {
        // Guards first: no transport interaction on rejection.
        ConnectionManager::new(self.shared.clone()).write_access(identity)?;
        if let Some(slot) = self.shared.transfers.get(identity) {
            if !slot.status_rx.borrow().is_terminal() {
                return Err(GatewayError::SessionAlreadyActive {
                    identity: identity.clone(),
                });
            }
        }

        let data = match source {
            FileSource::Bytes(bytes) => bytes,
            FileSource::Path(path) => tokio::fs::read(&path).await.map_err(|e| {
                GatewayError::invalid_argument(format!("cannot read {}: {e}", path.display()))
            })?,
        };
        let chunk_size = chunk_size.unwrap_or(self.shared.config.chunk_size);
        let plan = ChunkPlan::new(data.len() as u64, chunk_size)?;

        let id = TransferId::generate();
        let session = FileTransfer::begin(id.clone(), identity.clone(), plan, Instant::now());

        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(TransferStatus::Sending);
        let slot = SessionSlot {
            id: id.clone(),
            cancel_tx,
            ack_tx,
            status_rx: status_rx.clone(),
        };

        // The slot insertion is the exclusivity point: a racing send_file
        // observes the live slot here and is turned away.
        {
            use dashmap::mapref::entry::Entry;
            match self.shared.transfers.entry(identity.clone()) {
                Entry::Occupied(mut occupied) => {
                    if !occupied.get().status_rx.borrow().is_terminal() {
                        return Err(GatewayError::SessionAlreadyActive {
                            identity: identity.clone(),
                        });
                    }
                    occupied.insert(slot);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(slot);
                }
            }
        }

        info!(
            identity = %identity,
            transfer = %id,
            bytes = plan.file_length(),
            chunks = plan.total_chunks(),
            "file transfer started"
        );

        let driver = SessionDriver {
            shared: self.shared.clone(),
            identity: identity.clone(),
            data,
            session,
            cancel_rx,
            ack_rx,
            status_tx,
        };
        tokio::spawn(driver.run());

        Ok(TransferTicket { id, status_rx })
    }

    /// Cancel the peripheral's active transfer; valid only while `Sending`
    pub async fn cancel(&self, identity: &PeripheralId) -> Result<()> {
        let parts = self
            .shared
            .transfers
            .get(identity)
            .map(|slot| (slot.cancel_tx.clone(), slot.status_rx.clone()));
        let Some((cancel_tx, status_rx)) = parts else {
            return Err(GatewayError::invalid_transition(
                identity.clone(),
                "cancel_file_transfer",
                "no active session",
            ));
        };
        {
            let status = status_rx.borrow().clone();
            if status.is_terminal() {
                return Err(GatewayError::invalid_transition(
                    identity.clone(),
                    "cancel_file_transfer",
                    format!("{status:?}"),
                ));
            }
        }
        let _ = cancel_tx.try_send(());
        wait_terminal(status_rx).await;
        Ok(())
    }

    /// Force-cancel on behalf of a disconnect or link loss
    ///
    /// Waits for the driver to acknowledge so no progress event can be
    /// emitted after the cascade completes. A missing or already-terminal
    /// session is a no-op.
    pub(crate) async fn force_cancel(&self, identity: &PeripheralId) {
        let parts = self
            .shared
            .transfers
            .get(identity)
            .map(|slot| (slot.cancel_tx.clone(), slot.status_rx.clone()));
        let Some((cancel_tx, status_rx)) = parts else {
            return;
        };
        if status_rx.borrow().is_terminal() {
            return;
        }
        debug!(identity = %identity, "cancelling transfer for link teardown");
        let _ = cancel_tx.try_send(());
        wait_terminal(status_rx).await;
    }

    /// Route one chunk acknowledgement to the identity's driver
    pub(crate) fn note_ack(&self, identity: &PeripheralId, chunk_index: u32) {
        if let Some(slot) = self.shared.transfers.get(identity) {
            // A full or closed queue means the driver is already settling;
            // the ack timeout owns that case.
            let _ = slot.ack_tx.try_send(chunk_index);
        }
    }
}

async fn wait_terminal(mut status_rx: watch::Receiver<TransferStatus>) {
    loop {
        if status_rx.borrow().is_terminal() {
            return;
        }
        if status_rx.changed().await.is_err() {
            return;
        }
    }
}

// ----------------------------------------------------------------------------
// Session Driver
// ----------------------------------------------------------------------------

enum ChunkOutcome {
    Acked,
    Cancelled,
    /// The link left `Connected`; resolved in favor of the disconnect
    Revoked,
    TimedOut,
    TransportError(GatewayError),
}

struct SessionDriver {
    shared: Arc<GatewayShared>,
    identity: PeripheralId,
    data: Vec<u8>,
    session: FileTransfer,
    cancel_rx: mpsc::Receiver<()>,
    ack_rx: mpsc::Receiver<u32>,
    status_tx: watch::Sender<TransferStatus>,
}

impl SessionDriver {
    async fn run(mut self) {
        self.drive().await;

        let status = self.session.status().clone();
        match &status {
            TransferStatus::Completed => {
                info!(identity = %self.identity, transfer = %self.session.id(), "file transfer completed")
            }
            TransferStatus::Cancelled => {
                info!(identity = %self.identity, transfer = %self.session.id(), "file transfer cancelled")
            }
            TransferStatus::Failed { reason } => {
                warn!(identity = %self.identity, transfer = %self.session.id(), reason = %reason, "file transfer failed")
            }
            TransferStatus::Sending => {
                warn!(identity = %self.identity, "transfer driver exited while sending")
            }
        }

        // Publish the terminal status, then drop the slot: the session only
        // exists while live.
        self.status_tx.send_replace(status);
        self.shared
            .transfers
            .remove_if(&self.identity, |_, slot| slot.id == *self.session.id());
    }

    async fn drive(&mut self) {
        let plan = *self.session.plan();
        for index in 0..plan.total_chunks() {
            let Some(range) = plan.chunk_range(index) else {
                self.session.fail("chunk index out of plan");
                return;
            };
            let chunk_len = range.len();
            let frame = ChunkFrame {
                index,
                payload: self.data[range].to_vec(),
            }
            .encode();

            let mut attempts: u32 = 0;
            loop {
                match self.transmit_and_await(index, frame.clone()).await {
                    ChunkOutcome::Acked => {
                        let progress = self.session.record_ack(chunk_len, Instant::now());
                        self.emit_progress(progress).await;
                        break;
                    }
                    ChunkOutcome::Cancelled | ChunkOutcome::Revoked => {
                        self.session.cancel();
                        return;
                    }
                    ChunkOutcome::TimedOut => {
                        attempts += 1;
                        if attempts > self.shared.config.chunk_retry_limit {
                            self.session.fail(format!(
                                "chunk {index} unacknowledged after {}ms",
                                self.shared.config.chunk_ack_timeout.as_millis()
                            ));
                            return;
                        }
                        debug!(
                            identity = %self.identity,
                            chunk = index,
                            attempt = attempts,
                            "retransmitting unacknowledged chunk"
                        );
                    }
                    ChunkOutcome::TransportError(e) => {
                        attempts += 1;
                        if attempts > self.shared.config.chunk_retry_limit {
                            self.session.fail(e.to_string());
                            return;
                        }
                        debug!(
                            identity = %self.identity,
                            chunk = index,
                            attempt = attempts,
                            error = %e,
                            "retransmitting failed chunk"
                        );
                    }
                }
            }
        }
    }

    /// Write one chunk under the link gate and wait for its acknowledgement
    async fn transmit_and_await(&mut self, index: u32, frame: Vec<u8>) -> ChunkOutcome {
        // A cancellation that raced ahead of the write wins immediately.
        if self.cancel_rx.try_recv().is_ok() {
            return ChunkOutcome::Cancelled;
        }

        let access = match ConnectionManager::new(self.shared.clone()).write_access(&self.identity)
        {
            Ok(access) => access,
            Err(_) => return ChunkOutcome::Revoked,
        };
        {
            let gate = access.write_gate.clone();
            let _in_flight = gate.lock().await;
            if access.is_stale() {
                return ChunkOutcome::Revoked;
            }
            if let Err(e) = self
                .shared
                .transport
                .write_frame(&self.identity, frame)
                .await
            {
                if access.is_stale() {
                    return ChunkOutcome::Revoked;
                }
                return ChunkOutcome::TransportError(e);
            }
            if access.is_stale() {
                return ChunkOutcome::Revoked;
            }
        }

        let ack_timeout = tokio::time::sleep(self.shared.config.chunk_ack_timeout);
        tokio::pin!(ack_timeout);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel_rx.recv() => return ChunkOutcome::Cancelled,
                ack = self.ack_rx.recv() => match ack {
                    Some(i) if i == index => return ChunkOutcome::Acked,
                    // Stale or duplicate acknowledgement; keep waiting.
                    Some(_) => continue,
                    None => return ChunkOutcome::Cancelled,
                },
                _ = &mut ack_timeout => return ChunkOutcome::TimedOut,
            }
        }
    }

    async fn emit_progress(&self, progress: TransferProgress) {
        self.shared
            .bus
            .dispatch(GatewayEvent::FileTransferProgress {
                identity: self.identity.clone(),
                bytes_sent: progress.bytes_sent,
                file_length: progress.file_length,
                chunks_sent: progress.chunks_sent,
                progress: progress.progress,
                speed_bps: progress.speed_bps,
                done: progress.done,
            })
            .await;
    }
}
