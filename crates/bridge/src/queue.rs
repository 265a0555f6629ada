//! Serialized transfer queue
//!
//! Total ordering of device I/O against a single claimed device: USB bulk
//! endpoints do not tolerate concurrent access, so every chunk transfer
//! goes through this queue and exactly one is in flight at any time.
//! Failures are isolated per slot: a failed chunk discards the rest of its
//! slot's requests while other slots keep draining.

use crate::session::SharedSession;
use crate::upload::SlotTable;
use common::UsbBridge;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use types::{ChunkIo, SessionState, SlotId, TransferError, TransferRequest, UsbError};

/// Bulk endpoint addresses used for chunk transfers
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    /// IN endpoint (device to host), direction bit set
    pub bulk_in: u8,
    /// OUT endpoint (host to device)
    pub bulk_out: u8,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            bulk_in: 0x81,
            bulk_out: 0x02,
        }
    }
}

/// FIFO queue of chunk transfers against one session
///
/// The queue never outlives the session it was created for and only ever
/// reads session state; open/close transitions stay with the session
/// manager, except that a vanished device closes the session here.
pub struct TransferQueue {
    pending: StdMutex<VecDeque<TransferRequest>>,
    drain_lock: Mutex<()>,
    bridge: UsbBridge,
    session: SharedSession,
    slots: SlotTable,
    endpoints: Endpoints,
}

impl TransferQueue {
    pub(crate) fn new(
        bridge: UsbBridge,
        session: SharedSession,
        slots: SlotTable,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            pending: StdMutex::new(VecDeque::new()),
            drain_lock: Mutex::new(()),
            bridge,
            session,
            slots,
            endpoints,
        }
    }

    /// Append a request; never reorders
    pub fn enqueue(&self, request: TransferRequest) {
        self.pending.lock().unwrap().push_back(request);
    }

    /// Append a batch atomically, so a racing submission cannot interleave
    pub fn enqueue_all(&self, batch: Vec<TransferRequest>) {
        self.pending.lock().unwrap().extend(batch);
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued request belonging to `slot`
    pub(crate) fn purge_slot(&self, slot: SlotId) {
        self.pending
            .lock()
            .unwrap()
            .retain(|request| request.slot != slot);
    }

    /// Process queued requests strictly in FIFO order
    ///
    /// Each request's I/O is awaited to completion before the next begins.
    /// Requests whose owning slot is no longer transferring are discarded.
    /// Reentrant calls serialize behind the same lock, so two drains can
    /// never interleave device I/O.
    pub async fn drain(&self) {
        let _guard = self.drain_lock.lock().await;
        loop {
            let request = self.pending.lock().unwrap().pop_front();
            let Some(request) = request else {
                break;
            };
            self.execute(request).await;
        }
    }

    async fn execute(&self, request: TransferRequest) {
        if !self.slots.is_transferring(request.slot).await {
            debug!("discarding request for inactive slot {:?}", request.slot);
            return;
        }

        let (device, ready) = {
            let session = self.session.read().await;
            (session.handle().device, session.is_ready())
        };
        if !ready {
            self.slots.fail(request.slot, TransferError::NotReady).await;
            self.purge_slot(request.slot);
            return;
        }

        match request.io {
            ChunkIo::Write { data } => {
                let expected = data.len();
                match self
                    .bridge
                    .transfer_out(device, self.endpoints.bulk_out, data)
                    .await
                {
                    Ok(written) if written == expected => {
                        debug!(
                            "wrote chunk of {} bytes at offset {} for slot {:?}",
                            written, request.offset, request.slot
                        );
                        self.slots.record_write(request.slot, written as u64).await;
                    }
                    Ok(written) => {
                        warn!(
                            "short write for slot {:?} at offset {}: {} of {} bytes",
                            request.slot, request.offset, written, expected
                        );
                        self.fail_slot(request.slot, UsbError::Io).await;
                    }
                    Err(err) => self.fail_slot_on(request.slot, request.offset, err).await,
                }
            }
            ChunkIo::Read { len, checksum } => {
                match self
                    .bridge
                    .transfer_in(device, self.endpoints.bulk_in, len)
                    .await
                {
                    Ok(data) => {
                        let intact = data.len() == len
                            && checksum
                                .is_none_or(|expected| types::verify_checksum(&data, expected));
                        if intact {
                            self.slots.record_read(request.slot).await;
                        } else {
                            warn!(
                                "read-back mismatch for slot {:?} at offset {}",
                                request.slot, request.offset
                            );
                            self.slots
                                .fail(
                                    request.slot,
                                    TransferError::VerifyFailed {
                                        offset: request.offset,
                                    },
                                )
                                .await;
                            self.purge_slot(request.slot);
                        }
                    }
                    Err(err) => self.fail_slot_on(request.slot, request.offset, err).await,
                }
            }
        }
    }

    async fn fail_slot_on(&self, slot: SlotId, offset: u64, err: UsbError) {
        warn!(
            "transfer failed for slot {:?} at offset {}: {}",
            slot, offset, err
        );
        let unplugged = err == UsbError::NoDevice;
        self.fail_slot(slot, err).await;
        if unplugged {
            let mut session = self.session.write().await;
            if session.state() != SessionState::Closed {
                warn!("device gone mid-transfer, closing session");
                session.mark_closed();
            }
        }
    }

    async fn fail_slot(&self, slot: SlotId, err: UsbError) {
        self.slots
            .fail(slot, TransferError::TransferFailed(err))
            .await;
        // No auto-retry: the slot's remaining requests are dropped
        self.purge_slot(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::SlotId;

    fn write_request(slot: u32, offset: u64) -> TransferRequest {
        TransferRequest {
            slot: SlotId(slot),
            offset,
            io: ChunkIo::Write {
                data: vec![0; 16],
            },
        }
    }

    fn test_queue() -> TransferQueue {
        let (bridge, _worker) = common::create_usb_bridge();
        let session = std::sync::Arc::new(tokio::sync::RwLock::new(
            crate::session::Session::test_ready(types::DeviceId(1)),
        ));
        TransferQueue::new(bridge, session, SlotTable::default(), Endpoints::default())
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let queue = test_queue();
        queue.enqueue(write_request(1, 0));
        queue.enqueue_all(vec![write_request(1, 16), write_request(2, 0)]);

        assert_eq!(queue.len(), 3);
        let pending = queue.pending.lock().unwrap();
        let offsets: Vec<(SlotId, u64)> = pending.iter().map(|r| (r.slot, r.offset)).collect();
        assert_eq!(
            offsets,
            vec![(SlotId(1), 0), (SlotId(1), 16), (SlotId(2), 0)]
        );
    }

    #[tokio::test]
    async fn test_purge_slot_keeps_other_slots() {
        let queue = test_queue();
        queue.enqueue_all(vec![
            write_request(1, 0),
            write_request(2, 0),
            write_request(1, 16),
        ]);

        queue.purge_slot(SlotId(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending.lock().unwrap()[0].slot, SlotId(2));
    }

    #[test]
    fn test_default_endpoints() {
        let endpoints = Endpoints::default();
        assert_ne!(endpoints.bulk_in & 0x80, 0);
        assert_eq!(endpoints.bulk_out & 0x80, 0);
    }
}
