//! Session, slot, and transfer type definitions
//!
//! This module defines the data model for one USB mass-storage session:
//! device identifiers and descriptors, the session and slot state machines,
//! and the chunk-level transfer requests the queue executes.

use serde::{Deserialize, Serialize};

/// Unique device identifier (backend-assigned)
///
/// Identifies a USB device discovered during enumeration. The ID is stable
/// for as long as the device stays connected and is the reference handed
/// back by the device picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Unique file-slot identifier (coordinator-assigned)
///
/// Identifies one logical file queued for transfer. Slot IDs are never
/// reused within a coordinator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

/// Device information returned by enumeration
///
/// Contains the descriptor fields needed to identify and select a device
/// for session acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend-assigned device identifier
    pub id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Bus number
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// Manufacturer string (if available)
    pub manufacturer: Option<String>,
    /// Product string (if available)
    pub product: Option<String>,
    /// Serial number string (if available)
    pub serial_number: Option<String>,
}

/// A claimed USB device and its negotiated configuration/interface
///
/// Created by the session manager on a successful acquire. The handle is
/// usable for transfers only while `open` is true; the manager alone flips
/// the open/closed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// The underlying device
    pub device: DeviceId,
    /// Configuration index selected during acquisition
    pub configuration: u8,
    /// Interface index claimed during acquisition
    pub interface: u8,
    /// Whether the device is currently open with the interface claimed
    pub open: bool,
}

/// Session lifecycle states
///
/// A session moves `Idle -> Connecting -> Ready` during acquisition and
/// `Ready -> Closing -> Closed` on release. Unplug jumps straight to
/// `Closed`. At most one session is `Ready` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No device bound
    Idle,
    /// Acquisition in progress (open/configure/claim)
    Connecting,
    /// Handle claimed, transfers may run
    Ready,
    /// Release in progress
    Closing,
    /// Handle released or device gone
    Closed,
}

/// File-slot lifecycle states
///
/// `Failed` and `Complete` are terminal until the slot is explicitly
/// resubmitted, which resets it through `Pending` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// Created, nothing queued yet
    Pending,
    /// Chunks queued, transfers in progress
    Transferring,
    /// Every queued chunk succeeded
    Complete,
    /// A chunk failed or the slot was cancelled
    Failed,
}

impl SlotState {
    /// Whether the state accepts no further transfer results
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Complete | SlotState::Failed)
    }
}

/// Transfer direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host (transfer-in)
    Read,
    /// Host to device (transfer-out)
    Write,
}

/// The I/O half of a queued chunk transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkIo {
    /// Write the chunk payload to the device
    Write {
        /// Chunk data to send
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Read a chunk back from the device
    Read {
        /// Number of bytes to request
        len: usize,
        /// Expected CRC32C of the data, when verifying a prior write
        checksum: Option<u32>,
    },
}

/// One queued chunk-level I/O operation
///
/// Many requests belong to one file slot; the transfer queue holds them in
/// submission order and executes them one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Owning file slot
    pub slot: SlotId,
    /// Byte offset of this chunk within the slot payload
    pub offset: u64,
    /// Direction and payload
    pub io: ChunkIo,
}

impl TransferRequest {
    /// Transfer direction of this request
    pub fn direction(&self) -> Direction {
        match self.io {
            ChunkIo::Write { .. } => Direction::Write,
            ChunkIo::Read { .. } => Direction::Read,
        }
    }

    /// Number of payload bytes moved by this request
    pub fn len(&self) -> usize {
        match &self.io {
            ChunkIo::Write { data } => data.len(),
            ChunkIo::Read { len, .. } => *len,
        }
    }

    /// Whether the request moves no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// UI-facing snapshot of one file slot
///
/// Exposed for rendering per-slot progress; `error` is set once the slot
/// has failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotProgress {
    /// Slot identifier
    pub slot: SlotId,
    /// Human-readable label (typically the file name)
    pub label: String,
    /// Current slot state
    pub state: SlotState,
    /// Bytes confirmed written so far
    pub bytes_transferred: u64,
    /// Total payload size
    pub total_size: u64,
    /// Failure cause, when state is `Failed`
    pub error: Option<crate::error::TransferError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_equality() {
        let a = SlotId(7);
        let b = SlotId(7);
        let c = SlotId(8);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SlotState::Pending.is_terminal());
        assert!(!SlotState::Transferring.is_terminal());
        assert!(SlotState::Complete.is_terminal());
        assert!(SlotState::Failed.is_terminal());
    }

    #[test]
    fn test_request_direction_and_len() {
        let write = TransferRequest {
            slot: SlotId(1),
            offset: 0,
            io: ChunkIo::Write {
                data: vec![1, 2, 3],
            },
        };
        assert_eq!(write.direction(), Direction::Write);
        assert_eq!(write.len(), 3);

        let read = TransferRequest {
            slot: SlotId(1),
            offset: 3,
            io: ChunkIo::Read {
                len: 64,
                checksum: None,
            },
        };
        assert_eq!(read.direction(), Direction::Read);
        assert_eq!(read.len(), 64);
        assert!(!read.is_empty());
    }

    #[test]
    fn test_handle_starts_closed_after_release_flag_cleared() {
        let mut handle = DeviceHandle {
            device: DeviceId(1),
            configuration: 1,
            interface: 0,
            open: true,
        };
        handle.open = false;
        assert!(!handle.open);
    }
}
