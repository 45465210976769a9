//! Application-facing observer of device lifecycle and data events

use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

/// Callbacks a device invokes for its lifecycle and data events.
///
/// Called from the device's processing task, one call at a time per device.
/// Every method defaults to a no-op so implementors only pick what they need.
pub trait NotifyObserver: Send + Sync {
    /// Characteristics whose notifications should be delivered to [`on_notify`].
    ///
    /// Notifications for anything else are dropped.
    ///
    /// [`on_notify`]: NotifyObserver::on_notify
    fn notify_characteristics(&self) -> &[Uuid] {
        &[]
    }

    fn on_connecting(&self, _address: &str) {}

    fn on_connected(&self, _address: &str) {}

    fn on_disconnected(&self, _address: &str) {}

    fn on_close(&self, _address: &str) {}

    /// Read completion; `None` if the read failed
    fn on_read(&self, _address: &str, _characteristic: Uuid, _value: Option<Bytes>) {}

    /// Write completion; `None` if the write failed
    fn on_write(&self, _address: &str, _characteristic: Uuid, _value: Option<Bytes>) {}

    fn on_notify(&self, _address: &str, _characteristic: Uuid, _value: Bytes) {}

    fn on_rssi(&self, _address: &str, _rssi: i16) {}
}

/// Observer that logs every callback
#[derive(Debug, Default)]
pub struct LoggingObserver {
    interests: Vec<Uuid>,
}

impl LoggingObserver {
    pub fn new(interests: Vec<Uuid>) -> Self {
        Self { interests }
    }
}

impl NotifyObserver for LoggingObserver {
    fn notify_characteristics(&self) -> &[Uuid] {
        &self.interests
    }

    fn on_connecting(&self, address: &str) {
        info!("[OBSERVER] {} connecting", address);
    }

    fn on_connected(&self, address: &str) {
        info!("[OBSERVER] {} connected", address);
    }

    fn on_disconnected(&self, address: &str) {
        info!("[OBSERVER] {} disconnected", address);
    }

    fn on_close(&self, address: &str) {
        info!("[OBSERVER] {} closed", address);
    }

    fn on_read(&self, address: &str, characteristic: Uuid, value: Option<Bytes>) {
        info!("[OBSERVER] {} read {} -> {:?}", address, characteristic, value);
    }

    fn on_write(&self, address: &str, characteristic: Uuid, value: Option<Bytes>) {
        info!("[OBSERVER] {} wrote {} -> {:?}", address, characteristic, value);
    }

    fn on_notify(&self, address: &str, characteristic: Uuid, value: Bytes) {
        info!("[OBSERVER] {} notify {} -> {:?}", address, characteristic, value);
    }

    fn on_rssi(&self, address: &str, rssi: i16) {
        info!("[OBSERVER] {} rssi {} dBm", address, rssi);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// One observed callback
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Observed {
        Connecting,
        Connected,
        Disconnected,
        Close,
        Read(Uuid, Option<Bytes>),
        Write(Uuid, Option<Bytes>),
        Notify(Uuid, Bytes),
        Rssi(i16),
    }

    /// Observer that records every callback for later assertions
    #[derive(Debug, Default)]
    pub(crate) struct RecordingObserver {
        interests: Vec<Uuid>,
        events: Mutex<Vec<Observed>>,
    }

    impl RecordingObserver {
        pub(crate) fn new(interests: Vec<Uuid>) -> Self {
            Self {
                interests,
                events: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn events(&self) -> Vec<Observed> {
            self.events.lock().clone()
        }

        pub(crate) fn count(&self, wanted: &Observed) -> usize {
            self.events.lock().iter().filter(|e| *e == wanted).count()
        }

        fn push(&self, event: Observed) {
            self.events.lock().push(event);
        }
    }

    impl NotifyObserver for RecordingObserver {
        fn notify_characteristics(&self) -> &[Uuid] {
            &self.interests
        }

        fn on_connecting(&self, _address: &str) {
            self.push(Observed::Connecting);
        }

        fn on_connected(&self, _address: &str) {
            self.push(Observed::Connected);
        }

        fn on_disconnected(&self, _address: &str) {
            self.push(Observed::Disconnected);
        }

        fn on_close(&self, _address: &str) {
            self.push(Observed::Close);
        }

        fn on_read(&self, _address: &str, characteristic: Uuid, value: Option<Bytes>) {
            self.push(Observed::Read(characteristic, value));
        }

        fn on_write(&self, _address: &str, characteristic: Uuid, value: Option<Bytes>) {
            self.push(Observed::Write(characteristic, value));
        }

        fn on_notify(&self, _address: &str, characteristic: Uuid, value: Bytes) {
            self.push(Observed::Notify(characteristic, value));
        }

        fn on_rssi(&self, _address: &str, rssi: i16) {
            self.push(Observed::Rssi(rssi));
        }
    }
}
