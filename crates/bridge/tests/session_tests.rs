//! Integration tests for session acquisition and release
//!
//! Runs the real SessionManager against the worker thread and a scripted
//! mock backend, covering the strict open/configure/claim order, cleanup
//! on every failure path, single-session enforcement, idempotent release,
//! and unplug handling.

use bridge::session::{DevicePicker, FilterPicker, SessionManager, SessionSettings};
use bridge::usb::spawn_usb_worker;
use common::create_usb_bridge;
use common::test_utils::{MockBackend, MockOp, mock_card_reader};
use types::{AcquireError, DeviceId, DeviceInfo, SessionState, UsbError};

fn start_stack() -> (MockBackend, SessionManager) {
    let mock = MockBackend::with_devices(vec![mock_card_reader(1)]);
    let (bridge, worker) = create_usb_bridge();
    spawn_usb_worker(mock.clone(), worker);
    let manager = SessionManager::new(bridge, SessionSettings::default());
    (mock, manager)
}

fn any_device() -> FilterPicker {
    FilterPicker::new(vec![])
}

#[tokio::test]
async fn test_acquire_opens_configures_claims_in_order() {
    let (mock, manager) = start_stack();

    let session = manager.acquire(&any_device()).await.unwrap();

    let guard = session.read().await;
    assert_eq!(guard.state(), SessionState::Ready);
    assert!(guard.handle().open);
    assert_eq!(guard.handle().configuration, 1);
    assert_eq!(guard.handle().interface, 0);
    drop(guard);

    let device = DeviceId(1);
    assert_eq!(
        mock.ops(),
        vec![
            MockOp::ListDevices,
            MockOp::Open(device),
            MockOp::SelectConfiguration(device, 1),
            MockOp::ClaimInterface(device, 0),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_picker_leaves_session_idle() {
    let (mock, manager) = start_stack();

    // A picker that matches nothing models the user cancelling the dialog
    let picker = FilterPicker::new(vec!["0xFFFF:0xFFFF".to_string()]);
    let err = manager.acquire(&picker).await.unwrap_err();

    assert_eq!(err, AcquireError::NoDeviceSelected);
    assert_eq!(manager.session_state().await, SessionState::Idle);
    // Nothing was touched beyond enumeration
    assert_eq!(mock.ops(), vec![MockOp::ListDevices]);
}

#[tokio::test]
async fn test_open_failure_is_reported_distinctly() {
    let (mock, manager) = start_stack();
    mock.fail_open(UsbError::Access);

    let err = manager.acquire(&any_device()).await.unwrap_err();

    assert_eq!(err, AcquireError::OpenFailed(UsbError::Access));
    assert_eq!(manager.session_state().await, SessionState::Idle);
    // The device never opened, so no close is issued
    assert!(!mock.ops().contains(&MockOp::Close(DeviceId(1))));
}

#[tokio::test]
async fn test_configuration_failure_closes_device() {
    let (mock, manager) = start_stack();
    mock.fail_configuration(UsbError::Pipe);

    let err = manager.acquire(&any_device()).await.unwrap_err();

    assert_eq!(err, AcquireError::ConfigurationFailed(UsbError::Pipe));
    assert!(!mock.is_open(DeviceId(1)));
    assert_eq!(mock.ops().last(), Some(&MockOp::Close(DeviceId(1))));
    assert_eq!(manager.session_state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_claim_failure_closes_device() {
    let (mock, manager) = start_stack();
    mock.fail_claim(UsbError::Busy);

    let err = manager.acquire(&any_device()).await.unwrap_err();

    assert_eq!(err, AcquireError::InterfaceClaimFailed(UsbError::Busy));
    // No resource leak: the opened device is closed again
    assert!(!mock.is_open(DeviceId(1)));
    assert_eq!(mock.ops().last(), Some(&MockOp::Close(DeviceId(1))));
    assert_eq!(manager.session_state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_at_most_one_ready_session() {
    let (_mock, manager) = start_stack();

    let _session = manager.acquire(&any_device()).await.unwrap();
    assert_eq!(manager.session_state().await, SessionState::Ready);

    let err = manager.acquire(&any_device()).await.unwrap_err();
    assert_eq!(err, AcquireError::SessionAlreadyActive);
    assert_eq!(manager.session_state().await, SessionState::Ready);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (mock, manager) = start_stack();

    let session = manager.acquire(&any_device()).await.unwrap();
    manager.release(&session).await;
    manager.release(&session).await;

    assert_eq!(session.read().await.state(), SessionState::Closed);
    assert!(!session.read().await.handle().open);
    assert_eq!(manager.session_state().await, SessionState::Idle);

    let ops = mock.ops();
    let releases = ops
        .iter()
        .filter(|op| matches!(op, MockOp::ReleaseInterface(_, _)))
        .count();
    let closes = ops
        .iter()
        .filter(|op| matches!(op, MockOp::Close(_)))
        .count();
    assert_eq!(releases, 1);
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_acquire_again_after_release() {
    let (_mock, manager) = start_stack();

    let session = manager.acquire(&any_device()).await.unwrap();
    manager.release(&session).await;

    let second = manager.acquire(&any_device()).await.unwrap();
    assert_eq!(second.read().await.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_unplug_closes_session_without_device_io() {
    let (mock, manager) = start_stack();

    let session = manager.acquire(&any_device()).await.unwrap();
    let ops_before = mock.ops().len();

    manager.handle_unplug(DeviceId(1)).await;

    assert_eq!(session.read().await.state(), SessionState::Closed);
    assert_eq!(manager.session_state().await, SessionState::Idle);
    // The handle is gone; no release or close is attempted
    assert_eq!(mock.ops().len(), ops_before);

    // The slot is free for a fresh acquire
    let second = manager.acquire(&any_device()).await.unwrap();
    assert_eq!(second.read().await.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_unplug_of_other_device_is_ignored() {
    let (_mock, manager) = start_stack();

    let session = manager.acquire(&any_device()).await.unwrap();
    manager.handle_unplug(DeviceId(42)).await;

    assert_eq!(session.read().await.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_backend_error_during_enumeration() {
    // A dead worker surfaces as a Backend error, not a panic or hang
    let mock = MockBackend::with_devices(vec![mock_card_reader(1)]);
    let (bridge, worker) = create_usb_bridge();
    drop(worker);
    drop(mock);
    let manager = SessionManager::new(bridge, SessionSettings::default());

    let err = manager.acquire(&any_device()).await.unwrap_err();
    assert!(matches!(err, AcquireError::Backend(_)));
}

#[tokio::test]
async fn test_picker_sees_enumerated_devices() {
    struct Second;
    impl DevicePicker for Second {
        fn pick(&self, devices: &[DeviceInfo]) -> Option<DeviceId> {
            devices.get(1).map(|device| device.id)
        }
    }

    let mock = MockBackend::with_devices(vec![mock_card_reader(1), mock_card_reader(2)]);
    let (bridge, worker) = create_usb_bridge();
    spawn_usb_worker(mock.clone(), worker);
    let manager = SessionManager::new(bridge, SessionSettings::default());

    let session = manager.acquire(&Second).await.unwrap();
    assert_eq!(session.read().await.handle().device, DeviceId(2));
}
