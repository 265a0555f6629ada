//! rusb-backed device primitives
//!
//! Implements the [`UsbBackend`] trait over rusb: enumeration with cached
//! descriptors, open/configure/claim with kernel-driver detach, and bulk
//! transfers with a fixed timeout. Runs only on the USB worker thread.

use common::UsbBackend;
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use types::{DeviceId, DeviceInfo, UsbError};

struct OpenDevice {
    handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
}

/// The real USB backend
pub struct RusbBackend {
    context: Context,
    devices: HashMap<DeviceId, Device<Context>>,
    ids: HashMap<(u8, u8), DeviceId>,
    open: HashMap<DeviceId, OpenDevice>,
    next_id: u32,
    timeout: Duration,
}

impl RusbBackend {
    /// Create a backend with the given bulk-transfer timeout
    pub fn new(timeout: Duration) -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            devices: HashMap::new(),
            ids: HashMap::new(),
            open: HashMap::new(),
            next_id: 1,
            timeout,
        })
    }

    fn device_id_for(&mut self, bus: u8, address: u8) -> DeviceId {
        *self.ids.entry((bus, address)).or_insert_with(|| {
            let id = DeviceId(self.next_id);
            self.next_id += 1;
            id
        })
    }

    fn describe(&self, id: DeviceId, device: &Device<Context>) -> Option<DeviceInfo> {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("failed to read device descriptor: {}", e);
                return None;
            }
        };

        // Strings need an open handle; skip them if the device refuses us
        let strings = device.open().ok().map(|handle| {
            let manufacturer = descriptor
                .manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            let product = descriptor
                .product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            let serial_number = descriptor
                .serial_number_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            (manufacturer, product, serial_number)
        });
        let (manufacturer, product, serial_number) = strings.unwrap_or((None, None, None));

        Some(DeviceInfo {
            id,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            device_address: device.address(),
            manufacturer,
            product,
            serial_number,
        })
    }
}

impl UsbBackend for RusbBackend {
    fn list_devices(&mut self) -> Result<Vec<DeviceInfo>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let mut infos = Vec::new();
        for device in devices.iter() {
            let id = self.device_id_for(device.bus_number(), device.address());
            if let Some(info) = self.describe(id, &device) {
                self.devices.insert(id, device);
                infos.push(info);
            }
        }

        debug!("enumerated {} devices", infos.len());
        Ok(infos)
    }

    fn open(&mut self, device: DeviceId) -> Result<(), UsbError> {
        if self.open.contains_key(&device) {
            return Ok(());
        }
        let target = self.devices.get(&device).ok_or(UsbError::NotFound)?;
        let handle = target.open().map_err(map_rusb_error)?;

        debug!("opened device {:?}", device);
        self.open.insert(
            device,
            OpenDevice {
                handle,
                claimed: Vec::new(),
            },
        );
        Ok(())
    }

    fn select_configuration(
        &mut self,
        device: DeviceId,
        configuration: u8,
    ) -> Result<(), UsbError> {
        let open = self.open.get_mut(&device).ok_or(UsbError::NotFound)?;
        open.handle
            .set_active_configuration(configuration)
            .map_err(map_rusb_error)?;
        debug!(
            "selected configuration {} on device {:?}",
            configuration, device
        );
        Ok(())
    }

    fn claim_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        let open = self.open.get_mut(&device).ok_or(UsbError::NotFound)?;

        // Detach any kernel driver first, or the claim will fail
        match open.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "detaching kernel driver from interface {} on device {:?}",
                    interface, device
                );
                if let Err(e) = open.handle.detach_kernel_driver(interface) {
                    warn!(
                        "failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "could not check kernel driver on interface {}: {}",
                    interface, e
                );
            }
        }

        open.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        open.claimed.push(interface);
        debug!("claimed interface {} on device {:?}", interface, device);
        Ok(())
    }

    fn release_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        let open = self.open.get_mut(&device).ok_or(UsbError::NotFound)?;
        open.handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        open.claimed.retain(|claimed| *claimed != interface);

        // Hand the interface back to the kernel
        if let Err(e) = open.handle.attach_kernel_driver(interface) {
            debug!(
                "could not reattach kernel driver to interface {}: {}",
                interface, e
            );
        }
        debug!("released interface {} on device {:?}", interface, device);
        Ok(())
    }

    fn close(&mut self, device: DeviceId) {
        if let Some(open) = self.open.remove(&device) {
            for interface in &open.claimed {
                if let Err(e) = open.handle.release_interface(*interface) {
                    warn!("failed to release interface {}: {}", interface, e);
                }
                if let Err(e) = open.handle.attach_kernel_driver(*interface) {
                    debug!(
                        "could not reattach kernel driver to interface {}: {}",
                        interface, e
                    );
                }
            }
            debug!("closed device {:?}", device);
        }
    }

    fn transfer_out(
        &mut self,
        device: DeviceId,
        endpoint: u8,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        let open = self.open.get_mut(&device).ok_or(UsbError::NotFound)?;
        open.handle
            .write_bulk(endpoint, data, self.timeout)
            .map_err(map_rusb_error)
    }

    fn transfer_in(
        &mut self,
        device: DeviceId,
        endpoint: u8,
        len: usize,
    ) -> Result<Vec<u8>, UsbError> {
        let open = self.open.get_mut(&device).ok_or(UsbError::NotFound)?;
        let mut buffer = vec![0u8; len];
        let read = open
            .handle
            .read_bulk(endpoint, &mut buffer, self.timeout)
            .map_err(map_rusb_error)?;
        buffer.truncate(read);
        Ok(buffer)
    }
}

/// Map rusb errors to the transport-agnostic taxonomy
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
