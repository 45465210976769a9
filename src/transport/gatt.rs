//! GATT data model: services, characteristics and well-known identifiers

use std::ops::BitOr;
use uuid::Uuid;

/// Client Characteristic Configuration descriptor
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Value written to the configuration descriptor to turn notifications on
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Device Information service
pub const DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// Software Revision String characteristic of the Device Information service
pub const SOFTWARE_REVISION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);

/// Characteristic property bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties(pub u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            descriptors: Vec::new(),
        }
    }

    /// A notifiable characteristic with its configuration descriptor
    pub fn notifiable(uuid: Uuid) -> Self {
        Self {
            uuid,
            properties: CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG],
        }
    }

    pub fn is_notifiable(&self) -> bool {
        self.properties.contains(CharacteristicProperties::NOTIFY)
    }

    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}
