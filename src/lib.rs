//! nble: per-device BLE GATT connection manager
//!
//! A [`BleDevice`] owns the transport handle for one remote peripheral, keeps an
//! audit trail of its lifecycle, recovers unexpected disconnects for devices in
//! the registry's maintain set, and reports everything to a [`NotifyObserver`].

pub mod connection;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use connection::{BleDevice, ConnectionConfig, DeviceBuilder};
pub use nble_shared::{
    ConnectionStatus, DeviceIdentity, GattStatus, LinkState, StatusChangeRecord, StatusKind,
};
pub use observer::{LoggingObserver, NotifyObserver};
pub use registry::{DeviceRegistry, MemoryRegistry};
pub use transport::{GattLink, GattTransport, SimTransport};
