//! nble shared types
//!
//! This crate provides the runtime-free pieces of the per-device BLE
//! connection manager: device identity and its record codec, the status
//! audit log, and the link-state decision table.

pub mod audit;
pub mod codec;
pub mod identity;
pub mod state_machine;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use audit::{AuditLog, StatusChangeRecord, StatusKind};
pub use codec::CodecError;
pub use identity::{is_valid_address, DeviceIdentity};
pub use state_machine::{ConnectionStatus, HandlerOutcome, LinkConditions, LinkReaction, LinkState};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for connection recovery
pub mod timing {
    /// Delay before a failed or dropped link is retried
    pub const RETRY_DELAY_MS: u64 = 1000;

    /// Delay before a handle whose in-flight attempt was cancelled is force-closed
    pub const FORCED_CLOSE_DELAY_MS: u64 = 1000;
}

/// Status code reported by the transport with a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);
    /// Generic stack error, typically an abnormal link loss
    pub const ERROR: GattStatus = GattStatus(133);
    pub const FAILURE: GattStatus = GattStatus(257);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "GATT_SUCCESS"),
            Self::ERROR => write!(f, "GATT_ERROR"),
            Self::FAILURE => write!(f, "GATT_FAILURE"),
            GattStatus(code) => write!(f, "GATT_STATUS({})", code),
        }
    }
}
