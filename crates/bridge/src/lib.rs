//! sdbridge engine
//!
//! Session management, transfer sequencing, and upload coordination for one
//! USB mass-storage device. The [`session::SessionManager`] acquires and
//! releases the device handle, the [`queue::TransferQueue`] executes chunk
//! transfers strictly in order against it, and the
//! [`upload::UploadCoordinator`] maps file slots onto queued chunks and
//! tracks per-slot progress.

pub mod config;
pub mod queue;
pub mod session;
pub mod upload;
pub mod usb;

pub use config::BridgeConfig;
pub use session::{DevicePicker, FilterPicker, Session, SessionManager, SharedSession};
pub use upload::UploadCoordinator;
pub use usb::{RusbBackend, spawn_usb_worker};
