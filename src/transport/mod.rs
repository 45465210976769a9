//! Transport capability consumed by the device state machine
//!
//! The platform BLE stack itself is not part of this crate; it plugs in through
//! [`GattTransport`] and [`GattLink`]. [`SimTransport`] is an in-memory stand-in
//! used by the demo binary and the tests.

pub mod gatt;
pub mod sim;
pub mod traits;

pub use gatt::{
    CharacteristicProperties, GattCharacteristic, GattService, CLIENT_CHARACTERISTIC_CONFIG,
    DEVICE_INFORMATION_SERVICE, ENABLE_NOTIFICATION_VALUE, SOFTWARE_REVISION_CHARACTERISTIC,
};
pub use sim::{SimCall, SimHandleInfo, SimTransport};
pub use traits::{ConnectMode, EventSink, GattLink, GattTransport, LinkId, TransportEvent};
