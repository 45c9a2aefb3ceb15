//! Per-device lock registry.
//!
//! Two tiers: a registry-wide `std::sync::Mutex` guards only the
//! lookup-or-insert of a device's handle, and each handle is a
//! `tokio::sync::Mutex` that owns the device's slot. Same-device requests
//! queue FIFO on the handle; different devices never contend past the map
//! lookup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use brewlink_protocol::SessionId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::BrewError;
use crate::redact::DeviceId;
use crate::session::Session;

pub type DeviceHandle = Arc<Mutex<DeviceSlot>>;
pub type DeviceGuard = OwnedMutexGuard<DeviceSlot>;

/// Mutable state of one device. Reachable only through its lock.
#[derive(Debug)]
pub struct DeviceSlot {
    device_id: DeviceId,
    pub(crate) live: Option<Session>,
    /// Sessions this process has closed for the device.
    pub(crate) retired: HashSet<SessionId>,
    pub last_seen_ms: Option<u64>,
    pub firmware_version: Option<String>,
}

impl DeviceSlot {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            live: None,
            retired: HashSet::new(),
            last_seen_ms: None,
            firmware_version: None,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The device's current session, if it has one in the live set.
    pub fn live(&self) -> Option<&Session> {
        self.live.as_ref()
    }

    pub fn touch(&mut self, now_ms: u64, firmware_version: Option<&str>) {
        self.last_seen_ms = Some(now_ms);
        if let Some(version) = firmware_version {
            self.firmware_version = Some(version.to_string());
        }
    }
}

pub struct LockRegistry {
    handles: StdMutex<HashMap<DeviceId, DeviceHandle>>,
    timeout: Duration,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handles: StdMutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The one handle for `device_id`, created on first sight.
    ///
    /// Lookup, creation and insertion happen under a single registry guard,
    /// so concurrent first requests for a device all receive the same `Arc`.
    pub fn handle(&self, device_id: &DeviceId) -> DeviceHandle {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .entry(device_id.clone())
            .or_insert_with(|| {
                debug!(device = %device_id, "lock handle created");
                Arc::new(Mutex::new(DeviceSlot::new(device_id.clone())))
            })
            .clone()
    }

    /// Lock the device, waiting at most the configured timeout.
    pub async fn acquire(&self, device_id: &DeviceId) -> Result<DeviceGuard, BrewError> {
        let handle = self.handle(device_id);
        match tokio::time::timeout(self.timeout, handle.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(
                    device = %device_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "device lock wait timed out"
                );
                Err(BrewError::Busy {
                    retry_after_ms: self.timeout.as_millis().max(1) as u64,
                })
            }
        }
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_device_same_handle() {
        let registry = LockRegistry::new(Duration::from_millis(100));
        let a = registry.handle(&DeviceId::new("dev-a"));
        let b = registry.handle(&DeviceId::new("dev-a"));
        let c = registry.handle(&DeviceId::new("dev-c"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn held_lock_times_out_as_busy() {
        let registry = LockRegistry::new(Duration::from_millis(50));
        let device = DeviceId::new("dev-busy");
        let _held = registry.acquire(&device).await.expect("first acquire");

        let err = registry.acquire(&device).await.unwrap_err();
        assert!(matches!(err, BrewError::Busy { retry_after_ms: 50 }));
    }

    #[tokio::test]
    async fn lock_released_on_drop() {
        let registry = LockRegistry::new(Duration::from_millis(50));
        let device = DeviceId::new("dev-drop");
        {
            let mut guard = registry.acquire(&device).await.expect("acquire");
            guard.touch(7, Some("1.2.3"));
        }
        let guard = registry.acquire(&device).await.expect("reacquire");
        assert_eq!(guard.last_seen_ms, Some(7));
        assert_eq!(guard.firmware_version.as_deref(), Some("1.2.3"));
        assert_eq!(guard.device_id(), &device);
    }
}
