//! Per-device connection management
//!
//! This module handles:
//! - Connect/disconnect/close of a single peripheral's transport handle
//! - Recovery of unexpected drops for maintained devices, re-checked at fire time
//! - Serialized characteristic reads and writes
//! - Filtering and dispatch of notifications to the device's observer

mod device;
mod worker;

pub use device::{BleDevice, ConnectionConfig, DeviceBuilder};
pub(crate) use worker::Inbound;
