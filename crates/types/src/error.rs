//! Error taxonomy for session acquisition and chunk transfers
//!
//! Acquisition and transfer failures are reported with distinct kinds so
//! callers can tell which step of the lifecycle went wrong. Low-level
//! device failures are carried as [`UsbError`] payloads.

use crate::types::SlotId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Low-level USB operation errors
///
/// Maps libusb error codes one-to-one; the rusb backend performs the
/// mapping so everything above it stays transport-agnostic.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Operation timed out
    #[error("operation timed out")]
    Timeout,
    /// Endpoint stalled
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

/// Session acquisition errors
///
/// Each acquisition step reports its own kind. Whenever a step after open
/// fails, the device has already been closed again before the error is
/// returned.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum AcquireError {
    /// The device picker was cancelled or matched nothing
    #[error("no device selected")]
    NoDeviceSelected,
    /// Opening the device failed
    #[error("failed to open device: {0}")]
    OpenFailed(UsbError),
    /// Selecting the configuration failed; the device was closed again
    #[error("failed to select configuration: {0}")]
    ConfigurationFailed(UsbError),
    /// Claiming the interface failed; the device was closed again
    #[error("failed to claim interface: {0}")]
    InterfaceClaimFailed(UsbError),
    /// Another session is already active
    #[error("a session is already active")]
    SessionAlreadyActive,
    /// Enumeration or worker communication failed before the open step
    #[error("backend unavailable: {0}")]
    Backend(UsbError),
}

/// Chunk transfer and slot lifecycle errors
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferError {
    /// Transfer attempted without a ready session
    #[error("device session is not ready")]
    NotReady,
    /// A chunk-level device I/O failed
    #[error("chunk transfer failed: {0}")]
    TransferFailed(UsbError),
    /// The slot was cancelled before completing
    #[error("slot cancelled")]
    SlotCancelled,
    /// Read-back verification found a mismatch
    #[error("read-back verification failed at offset {offset}")]
    VerifyFailed {
        /// Offset of the chunk that failed verification
        offset: u64,
    },
    /// The slot identifier is unknown to the coordinator
    #[error("unknown slot {0:?}")]
    UnknownSlot(SlotId),
    /// The slot is already transferring; cancel or wait before resubmitting
    #[error("slot {0:?} is already transferring")]
    SlotBusy(SlotId),
    /// Chunk size must be non-zero
    #[error("chunk size must be non-zero")]
    InvalidChunkSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_error_display() {
        let err = AcquireError::ConfigurationFailed(UsbError::Pipe);
        let msg = format!("{}", err);
        assert!(msg.contains("select configuration"));
        assert!(msg.contains("stalled"));
    }

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::VerifyFailed { offset: 4096 };
        assert!(format!("{}", err).contains("4096"));

        let err = TransferError::TransferFailed(UsbError::NoDevice);
        assert!(format!("{}", err).contains("disconnected"));
    }

    #[test]
    fn test_usb_error_equality() {
        assert_eq!(UsbError::Timeout, UsbError::Timeout);
        assert_ne!(UsbError::Timeout, UsbError::NoDevice);
        assert_eq!(
            UsbError::Other {
                message: "x".into()
            },
            UsbError::Other {
                message: "x".into()
            }
        );
    }
}
