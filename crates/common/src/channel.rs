//! Async channel bridge between the Tokio runtime and the USB thread
//!
//! USB primitives block, so they run on one dedicated worker thread. The
//! async side submits [`DeviceCommand`]s over a bounded channel and awaits
//! the per-command oneshot reply; the worker pushes [`DeviceEvent`]s back
//! the other way. Because a single thread consumes the command channel, no
//! two device operations are ever in flight concurrently.

use async_channel::{Receiver, Sender, bounded};
use tokio::sync::oneshot;
use types::{DeviceId, DeviceInfo, UsbError};

/// Commands from the Tokio runtime to the USB thread
#[derive(Debug)]
pub enum DeviceCommand {
    /// Enumerate connected devices
    ListDevices {
        /// Channel to send response back
        response: oneshot::Sender<Result<Vec<DeviceInfo>, UsbError>>,
    },

    /// Open a device
    Open {
        /// Device to open
        device: DeviceId,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Select the active configuration on an open device
    SelectConfiguration {
        /// Device to configure
        device: DeviceId,
        /// Configuration index
        configuration: u8,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Claim an interface on an open device
    ClaimInterface {
        /// Device to claim on
        device: DeviceId,
        /// Interface index
        interface: u8,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Release a claimed interface
    ReleaseInterface {
        /// Device to release on
        device: DeviceId,
        /// Interface index
        interface: u8,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Close a device
    Close {
        /// Device to close
        device: DeviceId,
        /// Channel to send completion back
        response: oneshot::Sender<()>,
    },

    /// Bulk-write to an OUT endpoint
    TransferOut {
        /// Device to write to
        device: DeviceId,
        /// Endpoint address
        endpoint: u8,
        /// Payload to send
        data: Vec<u8>,
        /// Channel to send response back
        response: oneshot::Sender<Result<usize, UsbError>>,
    },

    /// Bulk-read from an IN endpoint
    TransferIn {
        /// Device to read from
        device: DeviceId,
        /// Endpoint address
        endpoint: u8,
        /// Number of bytes to request
        len: usize,
        /// Channel to send response back
        response: oneshot::Sender<Result<Vec<u8>, UsbError>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Events from the USB thread
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device disappeared mid-operation
    Unplugged {
        /// Device that went away
        device: DeviceId,
    },
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<DeviceCommand>,
    event_rx: Receiver<DeviceEvent>,
}

fn worker_gone() -> UsbError {
    UsbError::Other {
        message: "usb worker unavailable".to_string(),
    }
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<DeviceEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> Result<T, UsbError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())
    }

    /// Enumerate connected devices
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, UsbError> {
        self.request(|response| DeviceCommand::ListDevices { response })
            .await?
    }

    /// Open a device
    pub async fn open(&self, device: DeviceId) -> Result<(), UsbError> {
        self.request(|response| DeviceCommand::Open { device, response })
            .await?
    }

    /// Select the active configuration
    pub async fn select_configuration(
        &self,
        device: DeviceId,
        configuration: u8,
    ) -> Result<(), UsbError> {
        self.request(|response| DeviceCommand::SelectConfiguration {
            device,
            configuration,
            response,
        })
        .await?
    }

    /// Claim an interface
    pub async fn claim_interface(&self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        self.request(|response| DeviceCommand::ClaimInterface {
            device,
            interface,
            response,
        })
        .await?
    }

    /// Release a claimed interface
    pub async fn release_interface(&self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        self.request(|response| DeviceCommand::ReleaseInterface {
            device,
            interface,
            response,
        })
        .await?
    }

    /// Close a device
    pub async fn close(&self, device: DeviceId) -> Result<(), UsbError> {
        self.request(|response| DeviceCommand::Close { device, response })
            .await
    }

    /// Bulk-write to an OUT endpoint
    pub async fn transfer_out(
        &self,
        device: DeviceId,
        endpoint: u8,
        data: Vec<u8>,
    ) -> Result<usize, UsbError> {
        self.request(|response| DeviceCommand::TransferOut {
            device,
            endpoint,
            data,
            response,
        })
        .await?
    }

    /// Bulk-read from an IN endpoint
    pub async fn transfer_in(
        &self,
        device: DeviceId,
        endpoint: u8,
        len: usize,
    ) -> Result<Vec<u8>, UsbError> {
        self.request(|response| DeviceCommand::TransferIn {
            device,
            endpoint,
            len,
            response,
        })
        .await?
    }

    /// Ask the USB thread to shut down
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(DeviceCommand::Shutdown).await
    }
}

/// Handle for the USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<DeviceCommand>,
    /// Event sender (public for the worker thread to access)
    pub event_tx: Sender<DeviceEvent>,
}

impl UsbWorker {
    /// Receive a command from the Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<DeviceCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event to the Tokio runtime (blocking)
    pub fn send_event(&self, event: DeviceEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for the USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate the USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, DeviceCommand::Open { .. })
        });

        let (tx, _rx) = oneshot::channel();
        bridge
            .send_command(DeviceCommand::Open {
                device: DeviceId(1),
                response: tx,
            })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_typed_request_roundtrip() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || {
            while let Ok(cmd) = worker.recv_command() {
                match cmd {
                    DeviceCommand::Open { response, .. } => {
                        let _ = response.send(Ok(()));
                    }
                    DeviceCommand::Shutdown => break,
                    _ => {}
                }
            }
        });

        bridge.open(DeviceId(3)).await.unwrap();
        bridge.shutdown().await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_request_fails_when_worker_gone() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);

        let err = bridge.open(DeviceId(1)).await.unwrap_err();
        assert!(matches!(err, UsbError::Other { .. }));
    }
}
