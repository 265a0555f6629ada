//! Test utilities for sdbridge
//!
//! Provides a scriptable mock USB backend and helper functions for testing
//! across crates. The mock records every primitive call so tests can assert
//! acquisition ordering, cleanup on failure, and transfer FIFO behavior.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, mock_device_info};
//! use common::UsbBackend;
//!
//! let mock = MockBackend::with_devices(vec![mock_device_info(1, 0x0781, 0x5581)]);
//! let mut backend = mock.clone();
//! assert_eq!(backend.list_devices().unwrap().len(), 1);
//! ```

use crate::backend::UsbBackend;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use types::{DeviceId, DeviceInfo, UsbError};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceInfo for testing
pub fn mock_device_info(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId(id),
        vendor_id,
        product_id,
        bus_number: 1,
        device_address: (id % 128) as u8,
        manufacturer: Some(format!("Test Manufacturer {}", id)),
        product: Some(format!("Test Product {}", id)),
        serial_number: Some(format!("SN{:06}", id)),
    }
}

/// Create a mock SD-card reader DeviceInfo (mass storage VID/PID)
pub fn mock_card_reader(id: u32) -> DeviceInfo {
    mock_device_info(id, 0x0781, 0x5581)
}

/// Create a deterministic payload of `size` pattern bytes
pub fn mock_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// One recorded backend primitive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    ListDevices,
    Open(DeviceId),
    SelectConfiguration(DeviceId, u8),
    ClaimInterface(DeviceId, u8),
    ReleaseInterface(DeviceId, u8),
    Close(DeviceId),
    TransferOut { endpoint: u8, data: Vec<u8> },
    TransferIn { endpoint: u8, len: usize },
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceInfo>,
    ops: Vec<MockOp>,
    open: HashSet<DeviceId>,
    fail_open: Option<UsbError>,
    fail_configuration: Option<UsbError>,
    fail_claim: Option<UsbError>,
    fail_out_at: Option<(usize, UsbError)>,
    out_calls: usize,
    echo_reads: bool,
    corrupt_reads: bool,
    written: VecDeque<Vec<u8>>,
}

/// Scriptable in-memory USB backend
///
/// Clones share state, so a test can hand one clone to the worker thread
/// and keep another for scripting failures and inspecting the op log.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create a mock with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock exposing the given devices to enumeration
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().devices = devices;
        mock
    }

    /// Make the next `open` call fail with `err`
    pub fn fail_open(&self, err: UsbError) {
        self.state.lock().unwrap().fail_open = Some(err);
    }

    /// Make the next `select_configuration` call fail with `err`
    pub fn fail_configuration(&self, err: UsbError) {
        self.state.lock().unwrap().fail_configuration = Some(err);
    }

    /// Make the next `claim_interface` call fail with `err`
    pub fn fail_claim(&self, err: UsbError) {
        self.state.lock().unwrap().fail_claim = Some(err);
    }

    /// Make the `nth` (1-based) `transfer_out` call fail with `err`
    pub fn fail_transfer_out_at(&self, nth: usize, err: UsbError) {
        self.state.lock().unwrap().fail_out_at = Some((nth, err));
    }

    /// Replay written chunks on `transfer_in`, optionally corrupting them
    pub fn echo_reads(&self, corrupt: bool) {
        let mut state = self.state.lock().unwrap();
        state.echo_reads = true;
        state.corrupt_reads = corrupt;
    }

    /// Snapshot of every primitive call made so far
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Number of `transfer_out` calls made so far
    pub fn transfer_out_count(&self) -> usize {
        self.state.lock().unwrap().out_calls
    }

    /// Whether the device is currently open
    pub fn is_open(&self, device: DeviceId) -> bool {
        self.state.lock().unwrap().open.contains(&device)
    }

    /// Concatenation of all written chunk payloads, in write order
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .written
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect()
    }
}

impl UsbBackend for MockBackend {
    fn list_devices(&mut self) -> Result<Vec<DeviceInfo>, UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::ListDevices);
        Ok(state.devices.clone())
    }

    fn open(&mut self, device: DeviceId) -> Result<(), UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::Open(device));
        if let Some(err) = state.fail_open.take() {
            return Err(err);
        }
        state.open.insert(device);
        Ok(())
    }

    fn select_configuration(
        &mut self,
        device: DeviceId,
        configuration: u8,
    ) -> Result<(), UsbError> {
        let mut state = self.state.lock().unwrap();
        state
            .ops
            .push(MockOp::SelectConfiguration(device, configuration));
        if let Some(err) = state.fail_configuration.take() {
            return Err(err);
        }
        Ok(())
    }

    fn claim_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::ClaimInterface(device, interface));
        if let Some(err) = state.fail_claim.take() {
            return Err(err);
        }
        Ok(())
    }

    fn release_interface(&mut self, device: DeviceId, interface: u8) -> Result<(), UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::ReleaseInterface(device, interface));
        Ok(())
    }

    fn close(&mut self, device: DeviceId) {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::Close(device));
        state.open.remove(&device);
    }

    fn transfer_out(
        &mut self,
        device: DeviceId,
        endpoint: u8,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::TransferOut {
            endpoint,
            data: data.to_vec(),
        });
        if !state.open.contains(&device) {
            return Err(UsbError::NotFound);
        }
        state.out_calls += 1;
        if let Some((nth, err)) = state.fail_out_at.clone()
            && state.out_calls == nth
        {
            return Err(err);
        }
        state.written.push_back(data.to_vec());
        Ok(data.len())
    }

    fn transfer_in(
        &mut self,
        device: DeviceId,
        endpoint: u8,
        len: usize,
    ) -> Result<Vec<u8>, UsbError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(MockOp::TransferIn { endpoint, len });
        if !state.open.contains(&device) {
            return Err(UsbError::NotFound);
        }
        if state.echo_reads {
            let mut chunk = state.written.pop_front().unwrap_or_else(|| vec![0; len]);
            if state.corrupt_reads && !chunk.is_empty() {
                chunk[0] ^= 0xFF;
            }
            Ok(chunk)
        } else {
            Ok(vec![0; len])
        }
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_acquisition_sequence() {
        let mock = MockBackend::with_devices(vec![mock_card_reader(1)]);
        let mut backend = mock.clone();
        let device = DeviceId(1);

        backend.open(device).unwrap();
        backend.select_configuration(device, 1).unwrap();
        backend.claim_interface(device, 0).unwrap();
        backend.close(device);

        assert_eq!(
            mock.ops(),
            vec![
                MockOp::Open(device),
                MockOp::SelectConfiguration(device, 1),
                MockOp::ClaimInterface(device, 0),
                MockOp::Close(device),
            ]
        );
        assert!(!mock.is_open(device));
    }

    #[test]
    fn test_mock_scripted_claim_failure() {
        let mock = MockBackend::with_devices(vec![mock_card_reader(1)]);
        let mut backend = mock.clone();
        mock.fail_claim(UsbError::Busy);

        backend.open(DeviceId(1)).unwrap();
        assert_eq!(
            backend.claim_interface(DeviceId(1), 0),
            Err(UsbError::Busy)
        );
        // Only the scripted call fails
        backend.claim_interface(DeviceId(1), 0).unwrap();
    }

    #[test]
    fn test_mock_nth_transfer_failure() {
        let mock = MockBackend::new();
        let mut backend = mock.clone();
        let device = DeviceId(1);
        backend.open(device).unwrap();

        mock.fail_transfer_out_at(2, UsbError::Pipe);
        assert!(backend.transfer_out(device, 0x02, &[1, 2, 3]).is_ok());
        assert_eq!(
            backend.transfer_out(device, 0x02, &[4, 5, 6]),
            Err(UsbError::Pipe)
        );
        assert!(backend.transfer_out(device, 0x02, &[7, 8, 9]).is_ok());
    }

    #[test]
    fn test_mock_echo_reads() {
        let mock = MockBackend::new();
        let mut backend = mock.clone();
        let device = DeviceId(1);
        backend.open(device).unwrap();
        mock.echo_reads(false);

        backend.transfer_out(device, 0x02, &[9, 8, 7]).unwrap();
        let read = backend.transfer_in(device, 0x81, 3).unwrap();
        assert_eq!(read, vec![9, 8, 7]);
    }

    #[test]
    fn test_mock_transfer_on_closed_device_fails() {
        let mock = MockBackend::new();
        let mut backend = mock.clone();
        assert_eq!(
            backend.transfer_out(DeviceId(1), 0x02, &[0]),
            Err(UsbError::NotFound)
        );
    }

    #[test]
    fn test_mock_payload_pattern() {
        let data = mock_payload(300);
        assert_eq!(data.len(), 300);
        assert_eq!(data[0], 0);
        assert_eq!(data[255], 255);
        assert_eq!(data[256], 0);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
