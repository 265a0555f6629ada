//! USB subsystem
//!
//! The rusb-backed implementation of the device primitives and the
//! dedicated worker thread that executes them.

pub mod device;
pub mod worker;

pub use device::RusbBackend;
pub use worker::{UsbWorkerThread, spawn_usb_worker};
