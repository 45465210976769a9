//! Device handle, builder and configuration

use bytes::Bytes;
use nble_shared::{
    codec, timing, AuditLog, CodecError, ConnectionStatus, DeviceIdentity, StatusChangeRecord,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::worker::{Command, DeviceWorker, Inbound};
use crate::observer::NotifyObserver;
use crate::registry::DeviceRegistry;
use crate::transport::{GattTransport, DEVICE_INFORMATION_SERVICE, SOFTWARE_REVISION_CHARACTERISTIC};

/// Configuration for one device's connection handling
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before a failed or dropped link is retried
    pub retry_delay: Duration,
    /// Delay before a cancelled in-flight attempt is force-closed
    pub forced_close_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(timing::RETRY_DELAY_MS),
            forced_close_delay: Duration::from_millis(timing::FORCED_CLOSE_DELAY_MS),
        }
    }
}

/// State readable without going through the processing task
pub(crate) struct DeviceShared {
    pub(crate) address: String,
    name: RwLock<String>,
    maintain: AtomicBool,
    pub(crate) audit: AuditLog,
    registry: Arc<dyn DeviceRegistry>,
}

impl DeviceShared {
    pub(crate) fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write() = name;
    }
}

/// Handle to one remote peripheral.
///
/// Cheap to clone; all clones drive the same processing task. Operations only
/// initiate work and report whether it was accepted. Outcomes arrive through
/// the device's [`NotifyObserver`].
#[derive(Clone)]
pub struct BleDevice {
    shared: Arc<DeviceShared>,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl fmt::Debug for BleDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleDevice")
            .field("address", &self.shared.address)
            .field("name", &self.shared.name())
            .field("maintain", &self.is_maintain())
            .finish()
    }
}

impl BleDevice {
    /// Start building a device with the given identity
    pub fn builder(address: impl Into<String>, name: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder::new(DeviceIdentity::new(address, name))
    }

    /// Rebuild a device from an identity record produced by [`BleDevice::serialize`].
    ///
    /// The observer is resolved through the registry from the recorded name.
    pub fn deserialize(
        record: &str,
        transport: Arc<dyn GattTransport>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Result<BleDevice, CodecError> {
        let identity = codec::decode(record)?;
        Ok(DeviceBuilder::new(identity).build(transport, registry))
    }

    /// Encode address and name as an identity record
    pub fn serialize(&self) -> Result<String, CodecError> {
        codec::encode(&self.identity())
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn name(&self) -> String {
        self.shared.name()
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.shared.address.clone(), self.shared.name())
    }

    pub fn is_maintain(&self) -> bool {
        self.shared.maintain.load(Ordering::SeqCst)
    }

    /// Set whether unexpected disconnects are recovered, then persist the registry
    pub fn set_maintain(&self, maintain: bool) {
        self.shared.maintain.store(maintain, Ordering::SeqCst);
        if let Err(e) = self.shared.registry.store_devices() {
            warn!("[BLE] {} failed to store devices: {}", self.address(), e);
        }
    }

    /// Copy of the audit log
    pub fn status_records(&self) -> Vec<StatusChangeRecord> {
        self.shared.audit.snapshot()
    }

    /// Start a one-shot connect attempt; false if preconditions fail
    pub async fn connect(&self) -> bool {
        self.request(Command::Connect).await.unwrap_or(false)
    }

    /// Disconnect; a user disconnect is never followed by an automatic reconnect
    pub async fn disconnect(&self) {
        self.request(Command::Disconnect).await;
    }

    /// Release the transport handle, if any
    pub async fn close(&self) {
        self.request(Command::Close).await;
    }

    /// Request a characteristic read; completion arrives via `on_read`
    pub async fn read(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.request(|reply| Command::Read {
            service,
            characteristic,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Request a characteristic write; completion arrives via `on_write`
    pub async fn write(&self, service: Uuid, characteristic: Uuid, value: impl Into<Bytes>) -> bool {
        let value = value.into();
        self.request(|reply| Command::Write {
            service,
            characteristic,
            value,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Request the link's RSSI; the result arrives via `on_rssi`
    pub async fn request_remote_rssi(&self) {
        self.request(Command::RequestRssi).await;
    }

    /// Read the Software Revision String of the Device Information service
    pub async fn read_software_revision(&self) -> bool {
        self.read(DEVICE_INFORMATION_SERVICE, SOFTWARE_REVISION_CHARACTERISTIC)
            .await
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.request(Command::Status)
            .await
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Close the handle and stop the processing task
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inbox.send(Inbound::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Inbound::Command(make(tx))).ok()?;
        rx.await.ok()
    }
}

/// Builder for [`BleDevice`]
pub struct DeviceBuilder {
    identity: DeviceIdentity,
    maintain: bool,
    observer: Option<Arc<dyn NotifyObserver>>,
    config: ConnectionConfig,
}

impl DeviceBuilder {
    fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            maintain: false,
            observer: None,
            config: ConnectionConfig::default(),
        }
    }

    pub fn maintain(mut self, maintain: bool) -> Self {
        self.maintain = maintain;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn NotifyObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the device's processing task and register it with `registry`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(
        self,
        transport: Arc<dyn GattTransport>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> BleDevice {
        let observer = self
            .observer
            .or_else(|| registry.resolve_observer(&self.identity.name));
        debug!(
            "[BLE] Building {} ({}) on {} transport, observer: {}",
            self.identity.address,
            self.identity.name,
            transport.name(),
            observer.is_some()
        );

        let shared = Arc::new(DeviceShared {
            address: self.identity.address,
            name: RwLock::new(self.identity.name),
            maintain: AtomicBool::new(self.maintain),
            audit: AuditLog::new(),
            registry: registry.clone(),
        });

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let worker = DeviceWorker::new(
            shared.clone(),
            transport,
            registry.clone(),
            observer,
            self.config,
            inbox_tx.downgrade(),
        );
        tokio::spawn(worker.run(inbox_rx));

        let device = BleDevice {
            shared,
            inbox: inbox_tx,
        };
        registry.add(device.clone());
        device
    }
}
