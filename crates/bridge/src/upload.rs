//! Upload coordination
//!
//! Maps file slots onto chunked transfer requests and tracks per-slot
//! progress. A submission splits the slot payload into ascending-offset
//! write chunks (plus optional read-back verification chunks), hands them
//! to the transfer queue in one batch, and moves the slot to
//! `Transferring`. Completion and failure are recorded as the queue
//! reports each chunk.

use crate::queue::{Endpoints, TransferQueue};
use crate::session::SharedSession;
use common::UsbBridge;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use types::{
    ChunkIo, SlotId, SlotProgress, SlotState, TransferError, TransferRequest, compute_checksum,
};

/// One logical file queued for transfer
#[derive(Debug)]
struct FileSlot {
    label: String,
    payload: Vec<u8>,
    transferred: u64,
    state: SlotState,
    error: Option<TransferError>,
    /// Queued requests of the current submission not yet accounted for
    outstanding: usize,
}

impl FileSlot {
    fn new(label: String, payload: Vec<u8>) -> Self {
        Self {
            label,
            payload,
            transferred: 0,
            state: SlotState::Pending,
            error: None,
            outstanding: 0,
        }
    }

    fn total(&self) -> u64 {
        self.payload.len() as u64
    }

    fn snapshot(&self, id: SlotId) -> SlotProgress {
        SlotProgress {
            slot: id,
            label: self.label.clone(),
            state: self.state,
            bytes_transferred: self.transferred,
            total_size: self.total(),
            error: self.error.clone(),
        }
    }
}

/// Shared registry of file slots
///
/// Mutated by the coordinator (submission, cancellation) and by the
/// transfer queue (chunk results). Terminal states are sticky: once a slot
/// is `Complete` or `Failed`, late chunk results are ignored until the
/// next submission resets it.
#[derive(Clone, Default)]
pub(crate) struct SlotTable {
    inner: Arc<RwLock<HashMap<SlotId, FileSlot>>>,
}

impl SlotTable {
    pub(crate) async fn is_transferring(&self, id: SlotId) -> bool {
        self.inner
            .read()
            .await
            .get(&id)
            .is_some_and(|slot| slot.state == SlotState::Transferring)
    }

    /// Account a successfully written chunk
    pub(crate) async fn record_write(&self, id: SlotId, len: u64) {
        let mut slots = self.inner.write().await;
        let Some(slot) = slots.get_mut(&id) else {
            return;
        };
        if slot.state != SlotState::Transferring {
            return;
        }
        let total = slot.total();
        slot.transferred = (slot.transferred + len).min(total);
        slot.outstanding = slot.outstanding.saturating_sub(1);
        if slot.outstanding == 0 {
            slot.state = SlotState::Complete;
            info!("slot {:?} complete ({} bytes)", id, slot.transferred);
        }
    }

    /// Account a successfully verified read-back chunk
    pub(crate) async fn record_read(&self, id: SlotId) {
        let mut slots = self.inner.write().await;
        let Some(slot) = slots.get_mut(&id) else {
            return;
        };
        if slot.state != SlotState::Transferring {
            return;
        }
        slot.outstanding = slot.outstanding.saturating_sub(1);
        if slot.outstanding == 0 {
            slot.state = SlotState::Complete;
            info!("slot {:?} complete and verified", id);
        }
    }

    /// Mark a slot failed; keeps the first failure, never downgrades a
    /// terminal state
    pub(crate) async fn fail(&self, id: SlotId, error: TransferError) {
        let mut slots = self.inner.write().await;
        let Some(slot) = slots.get_mut(&id) else {
            return;
        };
        if slot.state.is_terminal() {
            return;
        }
        slot.state = SlotState::Failed;
        slot.error = Some(error);
    }

    async fn insert(&self, id: SlotId, slot: FileSlot) {
        self.inner.write().await.insert(id, slot);
    }

    async fn remove(&self, id: SlotId) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    async fn contains(&self, id: SlotId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    async fn begin_submission(
        &self,
        id: SlotId,
        chunk_size: usize,
        verify: bool,
    ) -> Result<Vec<TransferRequest>, TransferError> {
        let mut slots = self.inner.write().await;
        let slot = slots.get_mut(&id).ok_or(TransferError::UnknownSlot(id))?;
        if slot.state == SlotState::Transferring {
            return Err(TransferError::SlotBusy(id));
        }

        // Re-enter Pending: a resubmission starts the slot over
        slot.state = SlotState::Pending;
        slot.transferred = 0;
        slot.error = None;

        let requests = chunk_requests(id, &slot.payload, chunk_size, verify);
        slot.outstanding = requests.len();
        slot.state = if requests.is_empty() {
            SlotState::Complete
        } else {
            SlotState::Transferring
        };
        Ok(requests)
    }

    async fn snapshot(&self, id: SlotId) -> Option<SlotProgress> {
        self.inner.read().await.get(&id).map(|slot| slot.snapshot(id))
    }

    async fn snapshot_all(&self) -> Vec<SlotProgress> {
        let slots = self.inner.read().await;
        let mut all: Vec<SlotProgress> = slots.iter().map(|(id, slot)| slot.snapshot(*id)).collect();
        all.sort_by_key(|progress| progress.slot.0);
        all
    }
}

/// Split a payload into ascending-offset chunk requests
///
/// One write request per chunk of at most `chunk_size` bytes; with
/// `verify`, one read-back request per chunk follows the writes, carrying
/// the expected CRC32C.
fn chunk_requests(
    slot: SlotId,
    payload: &[u8],
    chunk_size: usize,
    verify: bool,
) -> Vec<TransferRequest> {
    let chunks = payload.chunks(chunk_size);
    let mut requests = Vec::with_capacity(if verify {
        chunks.len() * 2
    } else {
        chunks.len()
    });

    for (index, chunk) in payload.chunks(chunk_size).enumerate() {
        requests.push(TransferRequest {
            slot,
            offset: (index * chunk_size) as u64,
            io: ChunkIo::Write {
                data: chunk.to_vec(),
            },
        });
    }
    if verify {
        for (index, chunk) in payload.chunks(chunk_size).enumerate() {
            requests.push(TransferRequest {
                slot,
                offset: (index * chunk_size) as u64,
                io: ChunkIo::Read {
                    len: chunk.len(),
                    checksum: Some(compute_checksum(chunk)),
                },
            });
        }
    }
    requests
}

/// Translates file-upload intents into queued chunk transfers
///
/// Owns the set of file slots for the lifetime of the session. Multiple
/// slots may be submitted while a drain is in progress; their chunks stay
/// serialized in submission order.
pub struct UploadCoordinator {
    slots: SlotTable,
    queue: TransferQueue,
    session: SharedSession,
    verify: bool,
    next_slot: AtomicU32,
}

impl UploadCoordinator {
    /// Create a coordinator for one acquired session
    pub fn new(
        bridge: UsbBridge,
        session: SharedSession,
        endpoints: Endpoints,
        verify: bool,
    ) -> Self {
        let slots = SlotTable::default();
        let queue = TransferQueue::new(bridge, session.clone(), slots.clone(), endpoints);
        Self {
            slots,
            queue,
            session,
            verify,
            next_slot: AtomicU32::new(1),
        }
    }

    /// Register a payload as a new file slot
    pub async fn create_slot(&self, label: impl Into<String>, payload: Vec<u8>) -> SlotId {
        let id = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        debug!("created slot {:?} ({}, {} bytes)", id, label, payload.len());
        self.slots.insert(id, FileSlot::new(label, payload)).await;
        id
    }

    /// Queue a slot for upload
    ///
    /// Splits the payload into chunks of at most `chunk_size` bytes and
    /// enqueues them as one batch. A terminal slot is reset and starts
    /// over from offset zero; there is no partial resume.
    pub async fn submit(&self, slot: SlotId, chunk_size: usize) -> Result<(), TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        if !self.session.read().await.is_ready() {
            return Err(TransferError::NotReady);
        }

        let requests = self
            .slots
            .begin_submission(slot, chunk_size, self.verify)
            .await?;
        let count = requests.len();
        if count > 0 {
            self.queue.enqueue_all(requests);
        }
        debug!("slot {:?} submitted as {} chunk requests", slot, count);
        Ok(())
    }

    /// Cancel a pending or in-flight slot
    ///
    /// Takes effect at the next chunk boundary: an in-flight chunk finishes
    /// or fails on its own, queued requests are removed. Idempotent on
    /// terminal slots.
    pub async fn cancel(&self, slot: SlotId) -> Result<(), TransferError> {
        if !self.slots.contains(slot).await {
            return Err(TransferError::UnknownSlot(slot));
        }
        self.slots.fail(slot, TransferError::SlotCancelled).await;
        self.queue.purge_slot(slot);
        debug!("slot {:?} cancelled", slot);
        Ok(())
    }

    /// Discard a slot entirely, dropping any queued requests
    pub async fn remove_slot(&self, slot: SlotId) {
        self.queue.purge_slot(slot);
        if self.slots.remove(slot).await {
            debug!("slot {:?} removed", slot);
        }
    }

    /// Progress snapshot for one slot
    pub async fn progress(&self, slot: SlotId) -> Option<SlotProgress> {
        self.slots.snapshot(slot).await
    }

    /// Progress snapshots for every slot, ordered by slot id
    pub async fn progress_all(&self) -> Vec<SlotProgress> {
        self.slots.snapshot_all().await
    }

    /// Drive the transfer queue until it is empty
    pub async fn drain(&self) {
        self.queue.drain().await;
    }

    /// The underlying transfer queue
    pub fn queue(&self) -> &TransferQueue {
        &self.queue
    }
}
