//! Device identity: the transport address plus a display name

use serde::{Deserialize, Serialize};

/// Identity of a remote peripheral.
///
/// The address is the primary key everywhere; the name is informational and may
/// be replaced by whatever the transport reports once a link comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub address: String,
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    pub fn has_valid_address(&self) -> bool {
        is_valid_address(&self.address)
    }
}

/// Check a transport address, e.g. `00:11:22:AA:BB:CC`.
///
/// Six colon-separated octets of upper-case hex digits, nothing else.
pub fn is_valid_address(address: &str) -> bool {
    const ADDRESS_LENGTH: usize = 17;

    if address.len() != ADDRESS_LENGTH {
        return false;
    }

    address.bytes().enumerate().all(|(i, b)| match i % 3 {
        0 | 1 => b.is_ascii_digit() || (b'A'..=b'F').contains(&b),
        _ => b == b':',
    })
}
