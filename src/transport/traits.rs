//! Transport capability abstraction for the platform BLE stack

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use nble_shared::{GattStatus, LinkState};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::gatt::GattService;
use crate::connection::Inbound;

/// How a connect request should behave at the radio level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Single immediate attempt, used for user-initiated connects
    Direct,
    /// Keep trying until the peer shows up, used for automatic reconnects
    Persistent,
}

/// Identity of one transport handle held by a device.
///
/// Assigned by the device in strictly increasing order, so a newer handle always
/// compares greater than any handle it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Asynchronous events delivered by the transport on its own thread
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionStateChanged {
        status: GattStatus,
        state: LinkState,
        /// Name the peer reported, if any
        device_name: Option<String>,
    },
    ServicesDiscovered {
        status: GattStatus,
    },
    CharacteristicRead {
        characteristic: Uuid,
        status: GattStatus,
        value: Bytes,
    },
    CharacteristicWrite {
        characteristic: Uuid,
        status: GattStatus,
        value: Bytes,
    },
    /// Notification from the peer
    CharacteristicChanged {
        characteristic: Uuid,
        value: Bytes,
    },
    DescriptorRead {
        descriptor: Uuid,
        status: GattStatus,
    },
    DescriptorWrite {
        descriptor: Uuid,
        status: GattStatus,
    },
    ReliableWriteCompleted {
        status: GattStatus,
    },
    RssiRead {
        rssi: i16,
        status: GattStatus,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
}

/// Where a transport handle delivers its events.
///
/// Sending never blocks, so it is safe to call from any thread the platform
/// stack uses for callbacks. Every event is tagged with the handle it came from.
#[derive(Debug, Clone)]
pub struct EventSink {
    link: LinkId,
    inbox: mpsc::WeakUnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(link: LinkId, inbox: mpsc::WeakUnboundedSender<Inbound>) -> Self {
        Self { link, inbox }
    }

    /// Handle these events belong to
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Deliver an event; returns false once the device is gone
    pub fn send(&self, event: TransportEvent) -> bool {
        match self.inbox.upgrade() {
            Some(inbox) => inbox
                .send(Inbound::Transport {
                    link: self.link,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Factory for transport handles (the platform adapter)
#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    /// Whether the adapter is powered and usable
    fn is_enabled(&self) -> bool;

    /// Request a new handle to the peer at `address`.
    ///
    /// Returning `Ok` only means the request was issued; the outcome arrives later
    /// as a [`TransportEvent::ConnectionStateChanged`] through `events`.
    async fn connect(
        &self,
        address: &str,
        mode: ConnectMode,
        events: EventSink,
    ) -> Result<Box<dyn GattLink>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// A live handle to one peer.
///
/// Every request method only reports whether the stack accepted the request;
/// completions arrive through the handle's [`EventSink`].
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Link state as the stack currently reports it
    fn state(&self) -> LinkState;

    /// Re-establish the link on this same handle
    async fn reconnect(&self) -> bool;

    async fn disconnect(&self);

    /// Release the handle; no further events are delivered afterwards
    async fn close(&self);

    async fn discover_services(&self) -> bool;

    /// Services found by the last discovery
    fn services(&self) -> Vec<GattService>;

    fn service(&self, uuid: Uuid) -> Option<GattService> {
        self.services().into_iter().find(|s| s.uuid == uuid)
    }

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;

    async fn write_characteristic(&self, service: Uuid, characteristic: Uuid, value: Bytes)
        -> bool;

    /// Enable or disable local delivery of notifications for a characteristic
    async fn set_characteristic_notification(
        &self,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> bool;

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) -> bool;

    async fn read_remote_rssi(&self) -> bool;
}
