//! Connected-device registry
//!
//! Tracks which device serials the agent has reported as powered on, per
//! device type. Fed by device-state notifications on the global
//! connections; consumed when a caller wants to attach to "the" device of
//! a type without knowing its serial up front.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Shared registry of powered-on devices.
#[derive(Clone, Default)]
pub struct KnownDeviceRegistry {
    inner: Arc<Mutex<HashMap<u16, HashSet<String>>>>,
}

impl KnownDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device_type: u16, serial: &str) {
        if serial.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.entry(device_type).or_default().insert(serial.to_owned()) {
            log::info!("[NIHIA] Device {:#06x} '{}' is on", device_type, serial);
        }
    }

    pub fn remove(&self, device_type: u16, serial: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(serials) = inner.get_mut(&device_type) {
            if serials.remove(serial) {
                log::info!("[NIHIA] Device {:#06x} '{}' is off", device_type, serial);
            }
            if serials.is_empty() {
                inner.remove(&device_type);
            }
        }
    }

    /// All known serials for a device type, unordered.
    pub fn serials(&self, device_type: u16) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .get(&device_type)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The serial of the only powered-on device of this type, if there is
    /// exactly one.
    pub fn single_serial(&self, device_type: u16) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let serials = inner.get(&device_type)?;
        if serials.len() == 1 {
            serials.iter().next().cloned()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove() {
        let registry = KnownDeviceRegistry::new();
        registry.add(0x1610, "AAA");
        registry.add(0x1610, "AAA"); // idempotent
        registry.add(0x1610, "BBB");
        assert_eq!(registry.serials(0x1610).len(), 2);

        registry.remove(0x1610, "AAA");
        assert_eq!(registry.serials(0x1610), vec!["BBB".to_owned()]);
    }

    #[test]
    fn test_single_serial() {
        let registry = KnownDeviceRegistry::new();
        assert_eq!(registry.single_serial(0x1610), None);

        registry.add(0x1610, "AAA");
        assert_eq!(registry.single_serial(0x1610), Some("AAA".to_owned()));

        registry.add(0x1610, "BBB");
        assert_eq!(registry.single_serial(0x1610), None);
    }

    #[test]
    fn test_empty_serial_ignored() {
        let registry = KnownDeviceRegistry::new();
        registry.add(0x1610, "");
        assert!(registry.serials(0x1610).is_empty());
    }
}
