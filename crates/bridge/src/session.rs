//! Session lifecycle management
//!
//! Owns the acquire/validate/release lifecycle of one claimed USB device.
//! Acquisition performs open, select-configuration, and claim-interface in
//! strict order and guarantees cleanup of partially-acquired resources on
//! every failure path. At most one session is active at a time.

use common::UsbBridge;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use types::{AcquireError, DeviceHandle, DeviceId, DeviceInfo, SessionState};

/// Negotiation parameters for session acquisition
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Configuration index to select after opening
    pub configuration: u8,
    /// Interface index to claim
    pub interface: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            configuration: 1,
            interface: 0,
        }
    }
}

/// The bound relationship between this program and one USB device
///
/// Wraps exactly one [`DeviceHandle`]. State transitions are performed only
/// by the [`SessionManager`]; other components read the state to decide
/// whether transfers may run.
#[derive(Debug)]
pub struct Session {
    handle: DeviceHandle,
    state: SessionState,
}

impl Session {
    fn connecting(handle: DeviceHandle) -> Self {
        Self {
            handle,
            state: SessionState::Connecting,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The wrapped device handle
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Whether transfers may run against this session
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && self.handle.open
    }

    fn mark_ready(&mut self) {
        self.handle.open = true;
        self.state = SessionState::Ready;
    }

    fn mark_closing(&mut self) {
        self.state = SessionState::Closing;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.handle.open = false;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
impl Session {
    pub(crate) fn test_ready(device: DeviceId) -> Self {
        let mut session = Session::connecting(DeviceHandle {
            device,
            configuration: 1,
            interface: 0,
            open: false,
        });
        session.mark_ready();
        session
    }
}

/// A session shared between the manager, the transfer queue, and observers
pub type SharedSession = Arc<RwLock<Session>>;

/// Device selection, delegated to the host environment
///
/// Stands in for the platform device-picker primitive. Returning `None`
/// means the selection was cancelled.
pub trait DevicePicker: Send + Sync {
    /// Pick one of the enumerated devices, or `None` to cancel
    fn pick(&self, devices: &[DeviceInfo]) -> Option<DeviceId>;
}

/// Picker matching enumerated devices against VID:PID patterns
///
/// Patterns use the form `VID:PID` with optional `0x` prefixes and `*`
/// wildcards, e.g. `0x0781:*`. An empty pattern list matches any device.
/// The first enumerated device matching any pattern wins.
pub struct FilterPicker {
    filters: Vec<String>,
}

impl FilterPicker {
    /// Create a picker from VID:PID patterns
    pub fn new(filters: Vec<String>) -> Self {
        Self { filters }
    }

    fn part_matches(pattern: &str, value: u16) -> bool {
        if pattern == "*" {
            return true;
        }
        let hex = pattern
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u16::from_str_radix(hex, 16)
            .map(|p| p == value)
            .unwrap_or(false)
    }

    /// Check a VID/PID pair against the patterns
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|filter| {
            filter
                .split_once(':')
                .is_some_and(|(f_vid, f_pid)| {
                    Self::part_matches(f_vid, vid) && Self::part_matches(f_pid, pid)
                })
        })
    }
}

impl DevicePicker for FilterPicker {
    fn pick(&self, devices: &[DeviceInfo]) -> Option<DeviceId> {
        devices
            .iter()
            .find(|device| self.matches(device.vendor_id, device.product_id))
            .map(|device| device.id)
    }
}

/// Owner of the single active session
///
/// Exactly one hardware device is opened and claimed per successful
/// acquire; no step is retried implicitly.
pub struct SessionManager {
    bridge: UsbBridge,
    settings: SessionSettings,
    active: Mutex<Option<SharedSession>>,
}

impl SessionManager {
    /// Create a manager talking to the USB worker through `bridge`
    pub fn new(bridge: UsbBridge, settings: SessionSettings) -> Self {
        Self {
            bridge,
            settings,
            active: Mutex::new(None),
        }
    }

    /// The bridge this manager drives
    pub fn bridge(&self) -> &UsbBridge {
        &self.bridge
    }

    /// Acquire a device session
    ///
    /// Enumerates devices, delegates selection to `picker`, then performs
    /// open, select-configuration, and claim-interface in that order. If
    /// any step fails the device is closed again before the error is
    /// returned, so no resource is left claimed but untracked.
    pub async fn acquire(&self, picker: &dyn DevicePicker) -> Result<SharedSession, AcquireError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref()
            && session.read().await.state() != SessionState::Closed
        {
            return Err(AcquireError::SessionAlreadyActive);
        }

        let devices = self
            .bridge
            .list_devices()
            .await
            .map_err(AcquireError::Backend)?;
        let Some(device) = picker.pick(&devices) else {
            debug!("device selection cancelled");
            return Err(AcquireError::NoDeviceSelected);
        };

        let handle = DeviceHandle {
            device,
            configuration: self.settings.configuration,
            interface: self.settings.interface,
            open: false,
        };
        let session = Arc::new(RwLock::new(Session::connecting(handle)));
        *active = Some(session.clone());

        if let Err(e) = self.bridge.open(device).await {
            warn!("failed to open device {:?}: {}", device, e);
            *active = None;
            return Err(AcquireError::OpenFailed(e));
        }

        if let Err(e) = self
            .bridge
            .select_configuration(device, self.settings.configuration)
            .await
        {
            warn!(
                "device {:?} rejected configuration {}: {}",
                device, self.settings.configuration, e
            );
            let _ = self.bridge.close(device).await;
            *active = None;
            return Err(AcquireError::ConfigurationFailed(e));
        }

        if let Err(e) = self
            .bridge
            .claim_interface(device, self.settings.interface)
            .await
        {
            warn!(
                "failed to claim interface {} on device {:?}: {}",
                self.settings.interface, device, e
            );
            let _ = self.bridge.close(device).await;
            *active = None;
            return Err(AcquireError::InterfaceClaimFailed(e));
        }

        session.write().await.mark_ready();
        info!(
            "session ready on device {:?} (configuration {}, interface {})",
            device, self.settings.configuration, self.settings.interface
        );
        Ok(session)
    }

    /// Release a session
    ///
    /// Releases the claimed interface and closes the device. Idempotent:
    /// releasing an already-closed session is a no-op.
    pub async fn release(&self, session: &SharedSession) {
        let handle = {
            let mut guard = session.write().await;
            if guard.state() == SessionState::Closed {
                debug!("release on closed session ignored");
                return;
            }
            guard.mark_closing();
            guard.handle()
        };

        if let Err(e) = self
            .bridge
            .release_interface(handle.device, handle.interface)
            .await
        {
            warn!(
                "failed to release interface {} on device {:?}: {}",
                handle.interface, handle.device, e
            );
        }
        if let Err(e) = self.bridge.close(handle.device).await {
            warn!("failed to close device {:?}: {}", handle.device, e);
        }

        session.write().await.mark_closed();
        self.forget(session).await;
        info!("session closed on device {:?}", handle.device);
    }

    /// Handle a device unplug
    ///
    /// Unplug is equivalent to release, except no device I/O is attempted
    /// since the handle is already gone. No reconnection is attempted.
    pub async fn handle_unplug(&self, device: DeviceId) {
        let mut active = self.active.lock().await;
        let Some(session) = active.as_ref() else {
            return;
        };

        let mut guard = session.write().await;
        if guard.handle().device == device && guard.state() != SessionState::Closed {
            warn!("device {:?} unplugged, closing session", device);
            guard.mark_closed();
        }
        let closed = guard.state() == SessionState::Closed;
        drop(guard);

        if closed {
            *active = None;
        }
    }

    /// Observable session state; `Idle` when no session is tracked
    pub async fn session_state(&self) -> SessionState {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(session) => session.read().await.state(),
            None => SessionState::Idle,
        }
    }

    async fn forget(&self, session: &SharedSession) {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref()
            && Arc::ptr_eq(current, session)
        {
            *active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let picker = FilterPicker::new(vec![
            "0x1234:0x5678".to_string(),
            "0xABCD:*".to_string(),
        ]);

        assert!(picker.matches(0x1234, 0x5678));
        assert!(picker.matches(0xABCD, 0x1111));
        assert!(picker.matches(0xABCD, 0x9999));

        assert!(!picker.matches(0x1234, 0x9999));
        assert!(!picker.matches(0x9999, 0x5678));

        // Empty filters = allow all
        let any = FilterPicker::new(vec![]);
        assert!(any.matches(0x1234, 0x5678));
    }

    #[test]
    fn test_filter_without_hex_prefix() {
        let picker = FilterPicker::new(vec!["0781:5581".to_string()]);
        assert!(picker.matches(0x0781, 0x5581));
        assert!(!picker.matches(0x0781, 0x5580));
    }

    #[test]
    fn test_picker_selects_first_match() {
        let devices = vec![
            common::test_utils::mock_device_info(1, 0x1111, 0x0001),
            common::test_utils::mock_device_info(2, 0x0781, 0x5581),
            common::test_utils::mock_device_info(3, 0x0781, 0x5581),
        ];

        let picker = FilterPicker::new(vec!["0x0781:*".to_string()]);
        assert_eq!(picker.pick(&devices), Some(DeviceId(2)));

        let any = FilterPicker::new(vec![]);
        assert_eq!(any.pick(&devices), Some(DeviceId(1)));

        let none = FilterPicker::new(vec!["0xFFFF:0xFFFF".to_string()]);
        assert_eq!(none.pick(&devices), None);
    }

    #[test]
    fn test_session_state_transitions() {
        let handle = DeviceHandle {
            device: DeviceId(1),
            configuration: 1,
            interface: 0,
            open: false,
        };
        let mut session = Session::connecting(handle);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_ready());

        session.mark_ready();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.is_ready());
        assert!(session.handle().open);

        session.mark_closing();
        assert!(!session.is_ready());

        session.mark_closed();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.handle().open);
    }
}
