//! Core types for sdbridge
//!
//! This crate defines the data model shared by the session manager, transfer
//! queue, and upload coordinator: device and slot identifiers, session and
//! slot state machines, chunk-level transfer requests, progress snapshots,
//! and the error taxonomy.
//!
//! # Example
//!
//! ```
//! use types::{SlotId, SlotState, TransferRequest, ChunkIo, Direction};
//!
//! let request = TransferRequest {
//!     slot: SlotId(1),
//!     offset: 0,
//!     io: ChunkIo::Write { data: vec![0xAA; 512] },
//! };
//! assert_eq!(request.direction(), Direction::Write);
//! assert_eq!(request.len(), 512);
//! assert!(!SlotState::Transferring.is_terminal());
//! ```

pub mod error;
pub mod integrity;
pub mod types;

pub use error::{AcquireError, TransferError, UsbError};
pub use integrity::{compute_checksum, verify_checksum};
pub use types::{
    ChunkIo, DeviceHandle, DeviceId, DeviceInfo, Direction, SessionState, SlotId, SlotProgress,
    SlotState, TransferRequest,
};
