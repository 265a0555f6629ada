//! Common runtime plumbing for sdbridge
//!
//! This crate provides the pieces shared between the async engine and the
//! blocking USB side: the backend trait over the platform USB primitives,
//! the channel bridge connecting the Tokio runtime to the USB worker
//! thread, error handling, logging setup, and test utilities.

pub mod backend;
pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use backend::UsbBackend;
pub use channel::{DeviceCommand, DeviceEvent, UsbBridge, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
