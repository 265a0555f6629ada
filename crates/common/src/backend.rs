//! USB backend abstraction
//!
//! The platform USB primitives the session core consumes, as one blocking
//! trait. The real implementation wraps rusb; tests substitute a scripted
//! mock. Backend methods are only ever called from the dedicated USB worker
//! thread, so they may block.

use types::{DeviceId, DeviceInfo, UsbError};

/// Blocking USB device primitives
///
/// Every failure is reported as a typed [`UsbError`]; the layers above map
/// it to the acquisition or transfer error for the step that was running.
pub trait UsbBackend: Send {
    /// Enumerate currently connected devices
    fn list_devices(&mut self) -> Result<Vec<DeviceInfo>, UsbError>;

    /// Open the device for subsequent configuration and transfers
    fn open(&mut self, device: DeviceId) -> Result<(), UsbError>;

    /// Select the active configuration on an open device
    fn select_configuration(&mut self, device: DeviceId, configuration: u8)
    -> Result<(), UsbError>;

    /// Claim an interface on an open device
    fn claim_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError>;

    /// Release a previously claimed interface
    fn release_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError>;

    /// Close the device, releasing the handle
    ///
    /// Closing is best-effort and must succeed even if the device is gone.
    fn close(&mut self, device: DeviceId);

    /// Bulk-write `data` to an OUT endpoint, returning the bytes written
    fn transfer_out(&mut self, device: DeviceId, endpoint: u8, data: &[u8])
    -> Result<usize, UsbError>;

    /// Bulk-read up to `len` bytes from an IN endpoint
    fn transfer_in(
        &mut self,
        device: DeviceId,
        endpoint: u8,
        len: usize,
    ) -> Result<Vec<u8>, UsbError>;
}
