//! Per-device processing loop
//!
//! One task per device owns the transport handle and all connection state.
//! Public operations, transport events and fired timers all arrive on the same
//! inbound queue and are handled strictly one at a time, in arrival order.

use bytes::Bytes;
use nble_shared::state_machine::{self, LinkConditions};
use nble_shared::{
    is_valid_address, ConnectionStatus, GattStatus, HandlerOutcome, LinkReaction, StatusKind,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::device::{ConnectionConfig, DeviceShared};
use crate::observer::NotifyObserver;
use crate::registry::DeviceRegistry;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::transport::{
    ConnectMode, EventSink, GattLink, GattTransport, LinkId, TransportEvent,
    CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE,
};

/// Messages consumed by the processing loop
pub(crate) enum Inbound {
    Command(Command),
    Transport { link: LinkId, event: TransportEvent },
    Timer(TimerKind),
    Shutdown(oneshot::Sender<()>),
}

/// Operations requested through a device handle
pub(crate) enum Command {
    Connect(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
    Read {
        service: Uuid,
        characteristic: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Write {
        service: Uuid,
        characteristic: Uuid,
        value: Bytes,
        reply: oneshot::Sender<bool>,
    },
    RequestRssi(oneshot::Sender<()>),
    Status(oneshot::Sender<ConnectionStatus>),
}

/// Delayed work that came due
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerKind {
    /// Guarded retry passed its fire-time check
    Retry,
    /// Release a handle whose in-flight attempt the user cancelled
    ForcedClose { link: LinkId },
}

struct ActiveLink {
    id: LinkId,
    link: Box<dyn GattLink>,
}

pub(crate) struct DeviceWorker {
    shared: Arc<DeviceShared>,
    transport: Arc<dyn GattTransport>,
    registry: Arc<dyn DeviceRegistry>,
    observer: Option<Arc<dyn NotifyObserver>>,
    config: ConnectionConfig,
    scheduler: Scheduler,
    inbox: mpsc::WeakUnboundedSender<Inbound>,
    /// The only live transport handle
    link: Option<ActiveLink>,
    last_link_id: u64,
    /// A connect request is in flight
    attempting: bool,
    /// The user asked to disconnect since the last connect
    disconnect_requested: bool,
    pending_retry: Option<ScheduledTask>,
    pending_close: Option<ScheduledTask>,
}

impl DeviceWorker {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        transport: Arc<dyn GattTransport>,
        registry: Arc<dyn DeviceRegistry>,
        observer: Option<Arc<dyn NotifyObserver>>,
        config: ConnectionConfig,
        inbox: mpsc::WeakUnboundedSender<Inbound>,
    ) -> Self {
        let scheduler = Scheduler::new(shared.address.clone());
        Self {
            shared,
            transport,
            registry,
            observer,
            config,
            scheduler,
            inbox,
            link: None,
            last_link_id: 0,
            attempting: false,
            disconnect_requested: false,
            pending_retry: None,
            pending_close: None,
        }
    }

    /// Process messages until shutdown or until every handle to the device is gone
    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        let mut shutdown_reply = None;

        while let Some(message) = inbox.recv().await {
            match message {
                Inbound::Command(command) => self.handle_command(command).await,
                Inbound::Transport { link, event } => self.handle_transport(link, event).await,
                Inbound::Timer(kind) => self.handle_timer(kind).await,
                Inbound::Shutdown(reply) => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        self.pending_retry = None;
        self.pending_close = None;
        self.close().await;
        info!("[BLE] {} processing stopped", self.address());

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn address(&self) -> &str {
        &self.shared.address
    }

    fn record(&self, kind: StatusKind) {
        self.shared.audit.append(kind);
        debug!("[BLE] {} status record {}", self.address(), kind);
    }

    fn notify(&self, callback: impl FnOnce(&dyn NotifyObserver, &str)) {
        if let Some(observer) = &self.observer {
            callback(observer.as_ref(), self.address());
        }
    }

    fn current_link(&self) -> Option<LinkId> {
        self.link.as_ref().map(|active| active.id)
    }

    fn status(&self) -> ConnectionStatus {
        let reported = self.link.as_ref().map(|active| active.link.state());
        ConnectionStatus::derive(reported, self.attempting)
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let accepted = self.connect(ConnectMode::Direct).await;
                let _ = reply.send(accepted);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Close(reply) => {
                self.close().await;
                let _ = reply.send(());
            }
            Command::Read {
                service,
                characteristic,
                reply,
            } => {
                let accepted = self.read(service, characteristic).await;
                let _ = reply.send(accepted);
            }
            Command::Write {
                service,
                characteristic,
                value,
                reply,
            } => {
                let accepted = self.write(service, characteristic, value).await;
                let _ = reply.send(accepted);
            }
            Command::RequestRssi(reply) => {
                self.request_remote_rssi().await;
                let _ = reply.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn connect(&mut self, mode: ConnectMode) -> bool {
        if !self.transport.is_enabled() {
            warn!("[BLE] {} cannot connect: adapter disabled", self.address());
            return false;
        }

        if !is_valid_address(self.address()) {
            error!("[BLE] {} cannot connect: invalid address", self.address());
            return false;
        }

        let status = self.status();
        if status != ConnectionStatus::Disconnected || self.attempting {
            warn!(
                "[BLE] {} cannot connect: current state is {}, attempting: {}",
                self.address(),
                status,
                self.attempting
            );
            return false;
        }

        self.pending_retry = None;
        self.pending_close = None;

        // A handle that was only disconnected would deliver a second callback stream
        if let Some(stale) = self.link.take() {
            debug!("[BLE] {} closing stale {}", self.address(), stale.id);
            stale.link.close().await;
        }

        info!("[BLE] {} starting connect ({:?})", self.address(), mode);
        self.attempting = true;
        self.disconnect_requested = false;
        self.record(StatusKind::Connect);
        self.notify(|o, addr| o.on_connecting(addr));

        self.last_link_id += 1;
        let id = LinkId(self.last_link_id);
        let sink = EventSink::new(id, self.inbox.clone());

        match self.transport.connect(self.address(), mode, sink).await {
            Ok(link) => {
                debug!("[BLE] {} connecting on {}", self.address(), id);
                self.link = Some(ActiveLink { id, link });
                true
            }
            Err(e) => {
                warn!("[BLE] {} transport refused a handle: {}", self.address(), e);
                self.attempting = false;
                self.record(StatusKind::ConnectedError);
                self.notify(|o, addr| o.on_connecting(addr));
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        self.pending_retry = None;

        let Some(active) = &self.link else {
            self.attempting = false;
            return;
        };
        let id = active.id;

        info!(
            "[BLE] {} disconnect requested, attempting: {}",
            self.address(),
            self.attempting
        );
        self.record(StatusKind::Disconnect);
        self.disconnect_requested = true;

        if self.attempting {
            // Cancelling an in-flight attempt yields no callback, so release the
            // handle ourselves once the stack has had time to settle
            self.attempting = false;
            active.link.disconnect().await;
            self.schedule_forced_close(id);
        } else {
            // The disconnect callback does the teardown
            active.link.disconnect().await;
        }
    }

    /// Release the transport handle, if any. Idempotent.
    async fn close(&mut self) {
        self.attempting = false;

        if let Some(active) = self.link.take() {
            info!("[BLE] {} closing {}", self.address(), active.id);
            active.link.close().await;
            self.record(StatusKind::Close);
            self.notify(|o, addr| o.on_close(addr));
        }
    }

    async fn read(&mut self, service: Uuid, characteristic: Uuid) -> bool {
        let Some(active) = &self.link else {
            error!("[BLE] {} read: gatt not connected", self.address());
            return false;
        };

        if !Self::has_characteristic(active, service, characteristic, self.address()) {
            return false;
        }

        let accepted = active.link.read_characteristic(service, characteristic).await;
        info!("[BLE] {} read {} accepted: {}", self.address(), characteristic, accepted);
        accepted
    }

    async fn write(&mut self, service: Uuid, characteristic: Uuid, value: Bytes) -> bool {
        let Some(active) = &self.link else {
            error!("[BLE] {} write: gatt not connected", self.address());
            return false;
        };

        if !Self::has_characteristic(active, service, characteristic, self.address()) {
            return false;
        }

        let accepted = active
            .link
            .write_characteristic(service, characteristic, value)
            .await;
        info!("[BLE] {} write {} accepted: {}", self.address(), characteristic, accepted);
        accepted
    }

    fn has_characteristic(
        active: &ActiveLink,
        service: Uuid,
        characteristic: Uuid,
        address: &str,
    ) -> bool {
        let Some(found) = active.link.service(service) else {
            error!("[BLE] {} service not found: {}", address, service);
            return false;
        };

        if found.characteristic(characteristic).is_none() {
            error!("[BLE] {} characteristic not found: {}", address, characteristic);
            return false;
        }

        true
    }

    async fn request_remote_rssi(&mut self) {
        match &self.link {
            Some(active) => {
                active.link.read_remote_rssi().await;
            }
            None => error!("[BLE] {} rssi: gatt not connected", self.address()),
        }
    }

    async fn handle_transport(&mut self, link: LinkId, event: TransportEvent) {
        if self.current_link() != Some(link) {
            debug!(
                "[BLE] {} dropping event from stale {}: {:?}",
                self.address(),
                link,
                event
            );
            return;
        }

        match event {
            TransportEvent::ConnectionStateChanged {
                status,
                state,
                device_name,
            } => {
                let outcome = self.on_connection_state(status, state, device_name).await;
                self.dispatch(outcome).await;
            }
            TransportEvent::ServicesDiscovered { status } => {
                self.on_services_discovered(status).await;
            }
            TransportEvent::CharacteristicRead {
                characteristic,
                status,
                value,
            } => {
                debug!("[BLE] {} read {} status: {}", self.address(), characteristic, status);
                let value = status.is_success().then_some(value);
                self.notify(|o, addr| o.on_read(addr, characteristic, value));
            }
            TransportEvent::CharacteristicWrite {
                characteristic,
                status,
                value,
            } => {
                debug!("[BLE] {} write confirm {} status: {}", self.address(), characteristic, status);
                let value = status.is_success().then_some(value);
                self.notify(|o, addr| o.on_write(addr, characteristic, value));
            }
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                self.on_notification(characteristic, value);
            }
            TransportEvent::RssiRead { rssi, status } => {
                debug!("[BLE] {} rssi {} status: {}", self.address(), rssi, status);
                self.notify(|o, addr| o.on_rssi(addr, rssi));
            }
            TransportEvent::DescriptorRead { descriptor, status } => {
                debug!("[BLE] {} descriptor read {} status: {}", self.address(), descriptor, status);
            }
            TransportEvent::DescriptorWrite { descriptor, status } => {
                debug!("[BLE] {} descriptor write {} status: {}", self.address(), descriptor, status);
            }
            TransportEvent::ReliableWriteCompleted { status } => {
                debug!("[BLE] {} reliable write completed, status: {}", self.address(), status);
            }
            TransportEvent::MtuChanged { mtu, status } => {
                debug!("[BLE] {} mtu {} status: {}", self.address(), mtu, status);
            }
        }
    }

    async fn on_connection_state(
        &mut self,
        status: GattStatus,
        state: nble_shared::LinkState,
        device_name: Option<String>,
    ) -> HandlerOutcome {
        info!(
            "[BLE] {} ({}) connection status: {}, new state: {:?}",
            self.shared.name(),
            self.address(),
            status,
            state
        );

        self.attempting = false;
        let conditions = LinkConditions {
            adapter_enabled: self.transport.is_enabled(),
            maintain: self.registry.is_maintain(self.address()),
            disconnect_requested: self.disconnect_requested,
        };

        let reaction = state_machine::react(status, state, &conditions);
        match reaction {
            LinkReaction::Established => {
                if let Some(name) = device_name {
                    self.shared.set_name(name);
                }
                self.record(StatusKind::Connected);
                if let Some(active) = &self.link {
                    active.link.discover_services().await;
                }
                self.notify(|o, addr| o.on_connected(addr));
            }
            LinkReaction::Cancelled => {
                info!("[BLE] {} connected after disconnect request, tearing down", self.address());
                if let Some(active) = &self.link {
                    active.link.disconnect().await;
                }
            }
            LinkReaction::HandshakeFailed => {
                self.record(StatusKind::ConnectedError);
            }
            LinkReaction::Dropped(_) => {
                self.record(StatusKind::Disconnected);
                self.notify(|o, addr| o.on_disconnected(addr));
            }
            LinkReaction::Ignored => {}
        }

        let outcome = match reaction.outcome() {
            Some(outcome) => outcome,
            None => self.auto_reconnect().await,
        };
        outcome.respecting(&conditions)
    }

    /// Ask the stack to bring the dropped link back on the same handle
    async fn auto_reconnect(&mut self) -> HandlerOutcome {
        let accepted = match &self.link {
            Some(active) => active.link.reconnect().await,
            None => false,
        };

        if accepted {
            info!("[BLE] {} reconnect accepted", self.address());
            self.attempting = true;
            self.record(StatusKind::AutoConnect);
            self.notify(|o, addr| o.on_connecting(addr));
        } else {
            warn!("[BLE] {} reconnect rejected", self.address());
            self.record(StatusKind::AutoConnectFail);
        }

        HandlerOutcome::from_reconnect(accepted)
    }

    async fn dispatch(&mut self, outcome: HandlerOutcome) {
        match outcome {
            HandlerOutcome::Success => {}
            HandlerOutcome::Retryable => {
                self.close().await;
                self.schedule_retry();
            }
            HandlerOutcome::Fatal => {
                debug!("[BLE] {} no recovery for this link", self.address());
                self.close().await;
            }
        }
    }

    async fn on_services_discovered(&mut self, status: GattStatus) {
        let Some(active) = &self.link else {
            return;
        };

        if !status.is_success() {
            warn!("[BLE] {} service discovery failed: {}", self.address(), status);
            return;
        }

        for service in active.link.services() {
            for characteristic in service.characteristics.iter().filter(|c| c.is_notifiable()) {
                active
                    .link
                    .set_characteristic_notification(service.uuid, characteristic.uuid, true)
                    .await;

                if !characteristic.has_descriptor(CLIENT_CHARACTERISTIC_CONFIG) {
                    warn!(
                        "[BLE] {} {} has no configuration descriptor",
                        self.address(),
                        characteristic.uuid
                    );
                    continue;
                }

                let written = active
                    .link
                    .write_descriptor(
                        service.uuid,
                        characteristic.uuid,
                        CLIENT_CHARACTERISTIC_CONFIG,
                        Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
                    )
                    .await;
                info!(
                    "[BLE] {} enable notification on {}: {}",
                    self.address(),
                    characteristic.uuid,
                    written
                );
            }
        }
    }

    fn on_notification(&self, characteristic: Uuid, value: Bytes) {
        let Some(observer) = &self.observer else {
            return;
        };

        if observer.notify_characteristics().contains(&characteristic) {
            observer.on_notify(self.address(), characteristic, value);
        }
    }

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            // Maintain can change between the guard and this message
            TimerKind::Retry if !self.may_retry() => {
                info!("[BLE] {} retry dropped: no longer maintained or adapter off", self.address());
            }
            TimerKind::Retry => {
                info!("[BLE] {} retrying connection", self.address());
                self.connect(ConnectMode::Persistent).await;
            }
            TimerKind::ForcedClose { link } if self.current_link() == Some(link) => {
                info!("[BLE] {} forcing close of cancelled {}", self.address(), link);
                self.close().await;
            }
            TimerKind::ForcedClose { link } => {
                debug!("[BLE] {} forced close of {} no longer needed", self.address(), link);
            }
        }
    }

    fn may_retry(&self) -> bool {
        self.transport.is_enabled() && self.registry.is_maintain(self.address())
    }

    fn schedule_retry(&mut self) {
        let transport = self.transport.clone();
        let registry = self.registry.clone();
        let address = self.shared.address.clone();
        let inbox = self.inbox.clone();

        info!("[BLE] {} retry in {:?}", self.address(), self.config.retry_delay);
        let task = self.scheduler.schedule_guarded(
            self.config.retry_delay,
            move || transport.is_enabled() && registry.is_maintain(&address),
            move || async move {
                if let Some(inbox) = inbox.upgrade() {
                    let _ = inbox.send(Inbound::Timer(TimerKind::Retry));
                }
            },
        );
        self.pending_retry = Some(task);
    }

    fn schedule_forced_close(&mut self, link: LinkId) {
        let inbox = self.inbox.clone();
        let task = self.scheduler.schedule(self.config.forced_close_delay, async move {
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Inbound::Timer(TimerKind::ForcedClose { link }));
            }
        });
        self.pending_close = Some(task);
    }
}
