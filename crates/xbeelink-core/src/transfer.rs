//! File-transfer session logic
//!
//! Pure state for the chunked transfer protocol: chunk boundary planning,
//! sequence-tagged chunk framing, and per-session progress accounting. The
//! async driver that moves chunks over the radio lives in the runtime crate;
//! everything here is synchronous and directly testable.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{GatewayError, Result};
use crate::types::PeripheralId;

/// Default chunk size in bytes, sized to a conservative BLE write budget
pub const DEFAULT_CHUNK_SIZE: usize = 244;

// ----------------------------------------------------------------------------
// Transfer Identity
// ----------------------------------------------------------------------------

/// Unique identifier for a file-transfer session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    /// Generate a new random transfer ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// File Source
// ----------------------------------------------------------------------------

/// Where the transfer payload comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// In-memory payload
    Bytes(Vec<u8>),
    /// Payload read from the filesystem when the transfer starts
    Path(PathBuf),
}

// ----------------------------------------------------------------------------
// Transfer Status
// ----------------------------------------------------------------------------

/// Status of a file-transfer session
///
/// A session is born `Sending`; every other status is terminal and destroys
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Chunks are being transmitted
    Sending,
    /// Every chunk was acknowledged
    Completed,
    /// A chunk timed out or the transport failed
    Failed { reason: String },
    /// Cancelled by the caller or by link loss
    Cancelled,
}

impl TransferStatus {
    /// Whether the session has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Sending)
    }
}

// ----------------------------------------------------------------------------
// Chunk Plan
// ----------------------------------------------------------------------------

/// Precomputed chunk boundaries over a source payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    file_length: u64,
    chunk_size: usize,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plan chunk boundaries, rejecting empty sources and zero chunk sizes
    pub fn new(file_length: u64, chunk_size: usize) -> Result<Self> {
        if file_length == 0 {
            return Err(GatewayError::invalid_argument("source payload is empty"));
        }
        if chunk_size == 0 {
            return Err(GatewayError::invalid_argument("chunk size must be positive"));
        }
        let total_chunks = file_length.div_ceil(chunk_size as u64) as u32;
        Ok(Self {
            file_length,
            chunk_size,
            total_chunks,
        })
    }

    /// Total payload length in bytes
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Planned chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks the payload splits into
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `index`
    pub fn chunk_range(&self, index: u32) -> Option<core::ops::Range<usize>> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index as usize * self.chunk_size;
        let end = core::cmp::min(start + self.chunk_size, self.file_length as usize);
        Some(start..end)
    }
}

// ----------------------------------------------------------------------------
// Chunk Frame
// ----------------------------------------------------------------------------

/// One sequence-tagged chunk as written to the transport
///
/// The leading big-endian sequence index keeps retransmissions idempotent
/// from the receiver's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Zero-based sequence index
    pub index: u32,
    /// Chunk bytes
    pub payload: Vec<u8>,
}

impl ChunkFrame {
    /// Encode as wire bytes: 4-byte sequence index followed by the payload
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.payload.len());
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode wire bytes back into a chunk frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(GatewayError::invalid_argument("chunk frame too short"));
        }
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[..4]);
        Ok(Self {
            index: u32::from_be_bytes(index),
            payload: bytes[4..].to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Progress Accounting
// ----------------------------------------------------------------------------

/// Snapshot emitted after each acknowledged chunk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes acknowledged so far
    pub bytes_sent: u64,
    /// Total payload length
    pub file_length: u64,
    /// Chunks acknowledged so far
    pub chunks_sent: u32,
    /// `bytes_sent / file_length` in `0.0..=1.0`
    pub progress: f64,
    /// Instantaneous rate: bytes since the previous progress event over
    /// elapsed wall time
    pub speed_bps: f64,
    /// Set on exactly the final event of a completed transfer
    pub done: bool,
}

/// One outbound file-transfer session
#[derive(Debug, Clone)]
pub struct FileTransfer {
    id: TransferId,
    identity: PeripheralId,
    plan: ChunkPlan,
    bytes_sent: u64,
    chunks_sent: u32,
    started_at: Instant,
    last_progress_at: Instant,
    status: TransferStatus,
}

impl FileTransfer {
    /// Open a session in `Sending` over a validated chunk plan
    pub fn begin(
        id: TransferId,
        identity: PeripheralId,
        plan: ChunkPlan,
        now: Instant,
    ) -> Self {
        Self {
            id,
            identity,
            plan,
            bytes_sent: 0,
            chunks_sent: 0,
            started_at: now,
            last_progress_at: now,
            status: TransferStatus::Sending,
        }
    }

    /// Session identifier
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    /// Target peripheral
    pub fn identity(&self) -> &PeripheralId {
        &self.identity
    }

    /// Chunk boundaries for this session
    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Bytes acknowledged so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Chunks acknowledged so far
    pub fn chunks_sent(&self) -> u32 {
        self.chunks_sent
    }

    /// When the session entered `Sending`
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Current status
    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    /// Account one acknowledged chunk and produce the progress snapshot
    ///
    /// The final chunk's acknowledgement moves the session to `Completed` and
    /// the returned snapshot carries `done = true`.
    pub fn record_ack(&mut self, chunk_len: usize, now: Instant) -> TransferProgress {
        self.bytes_sent += chunk_len as u64;
        self.chunks_sent += 1;

        let elapsed = now
            .saturating_duration_since(self.last_progress_at)
            .max(Duration::from_micros(1));
        let speed_bps = chunk_len as f64 / elapsed.as_secs_f64();
        self.last_progress_at = now;

        let done = self.chunks_sent == self.plan.total_chunks();
        if done {
            self.status = TransferStatus::Completed;
        }

        TransferProgress {
            bytes_sent: self.bytes_sent,
            file_length: self.plan.file_length(),
            chunks_sent: self.chunks_sent,
            progress: self.bytes_sent as f64 / self.plan.file_length() as f64,
            speed_bps,
            done,
        }
    }

    /// Terminate the session with a failure reason
    pub fn fail<S: Into<String>>(&mut self, reason: S) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// Terminate the session as cancelled
    pub fn cancel(&mut self) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Cancelled;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> PeripheralId {
        PeripheralId::new("A1:B2").unwrap()
    }

    #[test]
    fn plan_rejects_degenerate_inputs() {
        assert!(ChunkPlan::new(0, 100).is_err());
        assert!(ChunkPlan::new(100, 0).is_err());
    }

    #[test]
    fn plan_covers_the_payload_exactly() {
        let plan = ChunkPlan::new(10_000, 1000).unwrap();
        assert_eq!(plan.total_chunks(), 10);
        assert_eq!(plan.chunk_range(0), Some(0..1000));
        assert_eq!(plan.chunk_range(9), Some(9000..10_000));
        assert_eq!(plan.chunk_range(10), None);
    }

    #[test]
    fn final_chunk_may_be_short() {
        let plan = ChunkPlan::new(1001, 500).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.chunk_range(2), Some(1000..1001));
    }

    #[test]
    fn chunk_frame_roundtrip() {
        let frame = ChunkFrame {
            index: 7,
            payload: vec![1, 2, 3],
        };
        let decoded = ChunkFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert!(ChunkFrame::decode(&[0, 0, 0, 1]).is_err());
    }

    #[test]
    fn accounting_reaches_done_on_final_ack() {
        let plan = ChunkPlan::new(2500, 1000).unwrap();
        let now = Instant::now();
        let mut session =
            FileTransfer::begin(TransferId::generate(), test_identity(), plan, now);

        let p1 = session.record_ack(1000, now + Duration::from_millis(100));
        assert_eq!(p1.chunks_sent, 1);
        assert_eq!(p1.bytes_sent, 1000);
        assert!(!p1.done);
        assert!(p1.speed_bps > 0.0);

        let p2 = session.record_ack(1000, now + Duration::from_millis(200));
        assert!(!p2.done);
        assert!((p2.progress - 0.8).abs() < 1e-9);

        let p3 = session.record_ack(500, now + Duration::from_millis(300));
        assert!(p3.done);
        assert_eq!(p3.bytes_sent, 2500);
        assert_eq!(p3.chunks_sent, 3);
        assert!((p3.progress - 1.0).abs() < 1e-9);
        assert_eq!(*session.status(), TransferStatus::Completed);
    }

    #[test]
    fn speed_reflects_bytes_over_elapsed_time() {
        let plan = ChunkPlan::new(2000, 1000).unwrap();
        let now = Instant::now();
        let mut session =
            FileTransfer::begin(TransferId::generate(), test_identity(), plan, now);

        let progress = session.record_ack(1000, now + Duration::from_secs(2));
        assert!((progress.speed_bps - 500.0).abs() < 1.0);
    }

    #[test]
    fn terminal_statuses_do_not_regress() {
        let plan = ChunkPlan::new(100, 100).unwrap();
        let now = Instant::now();
        let mut session =
            FileTransfer::begin(TransferId::generate(), test_identity(), plan, now);

        session.cancel();
        assert_eq!(*session.status(), TransferStatus::Cancelled);
        session.fail("late transport error");
        assert_eq!(*session.status(), TransferStatus::Cancelled);
    }
}
