//! USB worker thread
//!
//! Dedicated thread for executing blocking USB primitives. Receives
//! commands from the Tokio runtime over the channel bridge, runs them
//! against the backend one at a time, and replies through the per-command
//! oneshot channel. Because this thread is the only consumer, device I/O
//! is naturally serialized.

use common::{DeviceCommand, DeviceEvent, UsbBackend, UsbWorker};
use tracing::{debug, error, info};
use types::UsbError;

/// The worker loop around a USB backend
pub struct UsbWorkerThread<B: UsbBackend> {
    backend: B,
    worker: UsbWorker,
}

impl<B: UsbBackend> UsbWorkerThread<B> {
    /// Create a worker around `backend`
    pub fn new(backend: B, worker: UsbWorker) -> Self {
        Self { backend, worker }
    }

    /// Run the command loop until shutdown or channel closure
    pub fn run(mut self) {
        info!("USB worker thread started");

        while let Ok(cmd) = self.worker.recv_command() {
            if matches!(cmd, DeviceCommand::Shutdown) {
                info!("USB worker shutting down");
                break;
            }
            self.handle_command(cmd);
        }

        info!("USB worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: DeviceCommand) {
        // A panicking backend must not take the whole worker down
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::ListDevices { response } => {
                let result = self.backend.list_devices();
                let _ = response.send(result);
            }

            DeviceCommand::Open { device, response } => {
                debug!("opening device {:?}", device);
                let result = self.backend.open(device);
                self.notify_if_gone(device, result.as_ref().err());
                let _ = response.send(result);
            }

            DeviceCommand::SelectConfiguration {
                device,
                configuration,
                response,
            } => {
                let result = self.backend.select_configuration(device, configuration);
                self.notify_if_gone(device, result.as_ref().err());
                let _ = response.send(result);
            }

            DeviceCommand::ClaimInterface {
                device,
                interface,
                response,
            } => {
                let result = self.backend.claim_interface(device, interface);
                self.notify_if_gone(device, result.as_ref().err());
                let _ = response.send(result);
            }

            DeviceCommand::ReleaseInterface {
                device,
                interface,
                response,
            } => {
                let result = self.backend.release_interface(device, interface);
                let _ = response.send(result);
            }

            DeviceCommand::Close { device, response } => {
                debug!("closing device {:?}", device);
                self.backend.close(device);
                let _ = response.send(());
            }

            DeviceCommand::TransferOut {
                device,
                endpoint,
                data,
                response,
            } => {
                let result = self.backend.transfer_out(device, endpoint, &data);
                self.notify_if_gone(device, result.as_ref().err());
                let _ = response.send(result);
            }

            DeviceCommand::TransferIn {
                device,
                endpoint,
                len,
                response,
            } => {
                let result = self.backend.transfer_in(device, endpoint, len);
                self.notify_if_gone(device, result.as_ref().err());
                let _ = response.send(result);
            }

            DeviceCommand::Shutdown => {
                // Handled in the main loop
                unreachable!()
            }
        }
    }

    /// Surface an unplug to the async side
    fn notify_if_gone(&self, device: types::DeviceId, err: Option<&UsbError>) {
        if matches!(err, Some(UsbError::NoDevice)) {
            let _ = self
                .worker
                .send_event(DeviceEvent::Unplugged { device });
        }
    }
}

/// Spawn the USB worker thread
///
/// Creates a dedicated OS thread for USB operations and returns its join
/// handle. The thread runs until a Shutdown command arrives or the command
/// channel closes.
pub fn spawn_usb_worker<B: UsbBackend + 'static>(
    backend: B,
    worker: UsbWorker,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            UsbWorkerThread::new(backend, worker).run();
        })
        .expect("Failed to spawn USB worker thread")
}
