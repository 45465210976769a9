//! Device registry: every known device plus the maintain set

use anyhow::Result;
use nble_shared::{codec, DeviceIdentity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::BleDevice;
use crate::observer::NotifyObserver;

/// Registry collaborator a device calls into.
///
/// A device registers itself on construction and consults [`is_maintain`] every
/// time it decides whether a dropped link should be recovered.
///
/// [`is_maintain`]: DeviceRegistry::is_maintain
pub trait DeviceRegistry: Send + Sync {
    /// Register a device, replacing any device with the same address
    fn add(&self, device: BleDevice);

    /// Remove a device; the caller is responsible for closing it
    fn remove(&self, address: &str) -> Option<BleDevice>;

    /// Whether unexpected disconnects of this device should be recovered
    fn is_maintain(&self, address: &str) -> bool;

    /// Persist the registered devices
    fn store_devices(&self) -> Result<()>;

    /// Observer to use for a device built without one
    fn resolve_observer(&self, device_name: &str) -> Option<Arc<dyn NotifyObserver>>;
}

/// In-memory registry.
///
/// Maintain membership is each registered device's own maintain flag. Storing
/// encodes every identity record and keeps the latest snapshot in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    /// Map of address -> device
    devices: RwLock<HashMap<String, BleDevice>>,
    /// Name prefix -> observer, first match wins
    observers: RwLock<Vec<(String, Arc<dyn NotifyObserver>)>>,
    /// Identity records written by the last store
    stored: RwLock<Vec<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `observer` for devices built without one whose name starts with `name_prefix`
    pub fn register_observer(&self, name_prefix: impl Into<String>, observer: Arc<dyn NotifyObserver>) {
        self.observers.write().push((name_prefix.into(), observer));
    }

    pub fn get(&self, address: &str) -> Option<BleDevice> {
        self.devices.read().get(address).cloned()
    }

    pub fn devices(&self) -> Vec<BleDevice> {
        self.devices.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.devices.read().len()
    }

    /// Identity records written by the last [`DeviceRegistry::store_devices`]
    pub fn stored_identities(&self) -> Vec<DeviceIdentity> {
        self.stored
            .read()
            .iter()
            .filter_map(|record| match codec::decode(record) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("[REGISTRY] Unreadable stored record {}: {}", record, e);
                    None
                }
            })
            .collect()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn add(&self, device: BleDevice) {
        debug!("[REGISTRY] Adding {}", device.address());
        self.devices
            .write()
            .insert(device.address().to_string(), device);
    }

    fn remove(&self, address: &str) -> Option<BleDevice> {
        debug!("[REGISTRY] Removing {}", address);
        self.devices.write().remove(address)
    }

    fn is_maintain(&self, address: &str) -> bool {
        self.devices
            .read()
            .get(address)
            .map(|device| device.is_maintain())
            .unwrap_or(false)
    }

    fn store_devices(&self) -> Result<()> {
        let mut records = self
            .devices
            .read()
            .values()
            .map(|device| device.serialize())
            .collect::<Result<Vec<_>, _>>()?;
        records.sort();

        info!("[REGISTRY] Stored {} device(s)", records.len());
        *self.stored.write() = records;
        Ok(())
    }

    fn resolve_observer(&self, device_name: &str) -> Option<Arc<dyn NotifyObserver>> {
        self.observers
            .read()
            .iter()
            .find(|(prefix, _)| device_name.starts_with(prefix.as_str()))
            .map(|(_, observer)| observer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::LoggingObserver;
    use crate::transport::SimTransport;

    const ADDR: &str = "00:11:22:AA:BB:CC";

    #[tokio::test]
    async fn test_build_registers_device() {
        let registry = Arc::new(MemoryRegistry::new());
        let device = BleDevice::builder(ADDR, "Band")
            .build(Arc::new(SimTransport::new()), registry.clone());

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get(ADDR).map(|d| d.name()), Some(device.name()));
    }

    #[tokio::test]
    async fn test_maintain_follows_device_flag() {
        let registry = Arc::new(MemoryRegistry::new());
        let device = BleDevice::builder(ADDR, "Band")
            .build(Arc::new(SimTransport::new()), registry.clone());

        assert!(!registry.is_maintain(ADDR));
        device.set_maintain(true);
        assert!(registry.is_maintain(ADDR));

        // Unknown devices are never maintained
        assert!(!registry.is_maintain("FF:FF:FF:FF:FF:FF"));

        registry.remove(ADDR);
        assert!(!registry.is_maintain(ADDR));
    }

    #[tokio::test]
    async fn test_set_maintain_stores_devices() {
        let registry = Arc::new(MemoryRegistry::new());
        let device = BleDevice::builder(ADDR, "Band")
            .build(Arc::new(SimTransport::new()), registry.clone());
        assert!(registry.stored_identities().is_empty());

        device.set_maintain(true);

        assert_eq!(
            registry.stored_identities(),
            vec![DeviceIdentity::new(ADDR, "Band")]
        );
    }

    #[tokio::test]
    async fn test_store_keeps_every_device() {
        let registry = Arc::new(MemoryRegistry::new());
        let transport = Arc::new(SimTransport::new());
        BleDevice::builder(ADDR, "Band").build(transport.clone(), registry.clone());
        let lower = BleDevice::builder("00:11:22:aa:bb:dd", "Scale")
            .build(transport, registry.clone());

        lower.set_maintain(true);

        let stored = registry.stored_identities();
        assert_eq!(stored.len(), registry.count());
        assert!(stored.contains(&DeviceIdentity::new(ADDR, "Band")));
        assert!(stored.contains(&DeviceIdentity::new("00:11:22:aa:bb:dd", "Scale")));
    }

    #[test]
    fn test_resolve_observer_by_name_prefix() {
        let registry = MemoryRegistry::new();
        registry.register_observer("Band", Arc::new(LoggingObserver::default()));

        assert!(registry.resolve_observer("Band-7F21").is_some());
        assert!(registry.resolve_observer("Scale-0001").is_none());
    }
}
