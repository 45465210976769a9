//! In-memory simulated transport
//!
//! Stands in for the platform BLE stack during development and in tests. Every
//! request is recorded; completions are either injected by the caller or, with
//! auto-respond enabled, emitted immediately the way a healthy peer would.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use nble_shared::{GattStatus, LinkState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::gatt::GattService;
use super::traits::{ConnectMode, EventSink, GattLink, GattTransport, TransportEvent};

/// RSSI reported by an auto-responding peer
pub const SIM_RSSI: i16 = -60;

/// A request the simulated stack received
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Connect { address: String, mode: ConnectMode },
    Reconnect { handle: u64 },
    Disconnect { handle: u64 },
    Close { handle: u64 },
    DiscoverServices { handle: u64 },
    Read { handle: u64, characteristic: Uuid },
    Write { handle: u64, characteristic: Uuid, value: Bytes },
    SetNotification { handle: u64, characteristic: Uuid, enable: bool },
    WriteDescriptor { handle: u64, characteristic: Uuid, descriptor: Uuid },
    ReadRssi { handle: u64 },
}

/// Snapshot of one handle issued by the simulated stack
#[derive(Debug, Clone, PartialEq)]
pub struct SimHandleInfo {
    /// Sequence number within this transport, starting at 1
    pub handle: u64,
    pub address: String,
    pub mode: ConnectMode,
    pub state: LinkState,
    pub closed: bool,
}

struct SimHandle {
    info: SimHandleInfo,
    sink: EventSink,
}

struct SimState {
    enabled: bool,
    accept_connect: bool,
    accept_reconnect: bool,
    auto_respond: bool,
    device_name: Option<String>,
    services: Vec<GattService>,
    values: HashMap<Uuid, Bytes>,
    handles: Vec<SimHandle>,
    calls: Vec<SimCall>,
}

impl SimState {
    fn handle_mut(&mut self, handle: u64) -> Option<&mut SimHandle> {
        self.handles.iter_mut().find(|h| h.info.handle == handle)
    }

    fn latest_open(&mut self) -> Option<&mut SimHandle> {
        self.handles.iter_mut().rev().find(|h| !h.info.closed)
    }
}

/// Scriptable transport that keeps everything in memory
#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    /// Create an enabled transport that accepts requests but never answers on its own
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                enabled: true,
                accept_connect: true,
                accept_reconnect: true,
                auto_respond: false,
                device_name: None,
                services: Vec::new(),
                values: HashMap::new(),
                handles: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Create a transport that completes every request like a healthy peer
    pub fn auto_responding() -> Self {
        let sim = Self::new();
        sim.set_auto_respond(true);
        sim
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn set_accept_connect(&self, accept: bool) {
        self.state.lock().accept_connect = accept;
    }

    pub fn set_accept_reconnect(&self, accept: bool) {
        self.state.lock().accept_reconnect = accept;
    }

    pub fn set_auto_respond(&self, auto_respond: bool) {
        self.state.lock().auto_respond = auto_respond;
    }

    /// Name reported with successful connection events
    pub fn set_device_name(&self, name: Option<&str>) {
        self.state.lock().device_name = name.map(str::to_string);
    }

    /// Service table exposed after discovery
    pub fn set_services(&self, services: Vec<GattService>) {
        self.state.lock().services = services;
    }

    /// Value returned by auto-responded reads
    pub fn set_value(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        self.state.lock().values.insert(characteristic, value.into());
    }

    /// All requests received so far
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    /// All handles issued so far, oldest first
    pub fn handles(&self) -> Vec<SimHandleInfo> {
        self.state.lock().handles.iter().map(|h| h.info.clone()).collect()
    }

    /// Number of handles not yet closed
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.iter().filter(|h| !h.info.closed).count()
    }

    /// Report the outcome of the pending handshake on the newest open handle
    pub fn complete_connect(&self, status: GattStatus) -> bool {
        let mut state = self.state.lock();
        let name = state.device_name.clone();
        let Some(handle) = state.latest_open() else {
            return false;
        };
        handle.info.state = if status.is_success() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        handle.sink.send(TransportEvent::ConnectionStateChanged {
            status,
            state: LinkState::Connected,
            device_name: name,
        })
    }

    /// Report that the newest open handle lost its link
    pub fn drop_link(&self, status: GattStatus) -> bool {
        let mut state = self.state.lock();
        let Some(handle) = state.latest_open() else {
            return false;
        };
        handle.info.state = LinkState::Disconnected;
        handle.sink.send(TransportEvent::ConnectionStateChanged {
            status,
            state: LinkState::Disconnected,
            device_name: None,
        })
    }

    /// Deliver a raw event on the newest open handle
    pub fn emit(&self, event: TransportEvent) -> bool {
        let mut state = self.state.lock();
        match state.latest_open() {
            Some(handle) => handle.sink.send(event),
            None => false,
        }
    }

    /// Deliver a raw event on a specific handle, closed or not
    pub fn emit_on(&self, handle: u64, event: TransportEvent) -> bool {
        let mut state = self.state.lock();
        match state.handle_mut(handle) {
            Some(h) => h.sink.send(event),
            None => false,
        }
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GattTransport for SimTransport {
    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    async fn connect(
        &self,
        address: &str,
        mode: ConnectMode,
        events: EventSink,
    ) -> Result<Box<dyn GattLink>> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Connect {
            address: address.to_string(),
            mode,
        });

        if !state.accept_connect {
            return Err(anyhow!("Simulated stack refused a handle for {}", address));
        }

        let handle = state.handles.len() as u64 + 1;
        let auto_respond = state.auto_respond;
        let device_name = state.device_name.clone();

        if auto_respond {
            events.send(TransportEvent::ConnectionStateChanged {
                status: GattStatus::SUCCESS,
                state: LinkState::Connected,
                device_name,
            });
        }

        debug!("[SIM] Issued handle {} for {} ({:?})", handle, address, mode);
        state.handles.push(SimHandle {
            info: SimHandleInfo {
                handle,
                address: address.to_string(),
                mode,
                state: if auto_respond {
                    LinkState::Connected
                } else {
                    LinkState::Connecting
                },
                closed: false,
            },
            sink: events,
        });

        Ok(Box::new(SimLink {
            handle,
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}

/// Handle issued by [`SimTransport`]
struct SimLink {
    handle: u64,
    state: Arc<Mutex<SimState>>,
}

impl SimLink {
    /// Record the call and, if the handle is still open, run `respond` with it
    fn request<F>(&self, call: SimCall, respond: F) -> bool
    where
        F: FnOnce(&mut SimHandle, &SimSettings),
    {
        let mut state = self.state.lock();
        state.calls.push(call);

        let settings = SimSettings {
            auto_respond: state.auto_respond,
            accept_reconnect: state.accept_reconnect,
            device_name: state.device_name.clone(),
            values: state.values.clone(),
        };

        match state.handle_mut(self.handle) {
            Some(handle) if !handle.info.closed => {
                respond(handle, &settings);
                true
            }
            _ => false,
        }
    }
}

/// Copy of the settings a response needs, taken under the lock
struct SimSettings {
    auto_respond: bool,
    accept_reconnect: bool,
    device_name: Option<String>,
    values: HashMap<Uuid, Bytes>,
}

#[async_trait]
impl GattLink for SimLink {
    fn state(&self) -> LinkState {
        let mut state = self.state.lock();
        state
            .handle_mut(self.handle)
            .map(|h| h.info.state)
            .unwrap_or(LinkState::Disconnected)
    }

    async fn reconnect(&self) -> bool {
        let mut accepted = false;
        self.request(SimCall::Reconnect { handle: self.handle }, |h, s| {
            if !s.accept_reconnect {
                return;
            }
            accepted = true;
            if s.auto_respond {
                h.info.state = LinkState::Connected;
                h.sink.send(TransportEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: LinkState::Connected,
                    device_name: s.device_name.clone(),
                });
            } else {
                h.info.state = LinkState::Connecting;
            }
        });
        accepted
    }

    async fn disconnect(&self) {
        self.request(SimCall::Disconnect { handle: self.handle }, |h, s| {
            let was_connected = h.info.state == LinkState::Connected;
            h.info.state = LinkState::Disconnected;
            // Cancelling a pending handshake produces no callback
            if s.auto_respond && was_connected {
                h.sink.send(TransportEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: LinkState::Disconnected,
                    device_name: None,
                });
            }
        });
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Close { handle: self.handle });
        if let Some(h) = state.handle_mut(self.handle) {
            h.info.closed = true;
            h.info.state = LinkState::Disconnected;
        }
    }

    async fn discover_services(&self) -> bool {
        self.request(SimCall::DiscoverServices { handle: self.handle }, |h, s| {
            if s.auto_respond {
                h.sink.send(TransportEvent::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                });
            }
        })
    }

    fn services(&self) -> Vec<GattService> {
        self.state.lock().services.clone()
    }

    async fn read_characteristic(&self, _service: Uuid, characteristic: Uuid) -> bool {
        let call = SimCall::Read {
            handle: self.handle,
            characteristic,
        };
        self.request(call, |h, s| {
            if s.auto_respond {
                h.sink.send(TransportEvent::CharacteristicRead {
                    characteristic,
                    status: GattStatus::SUCCESS,
                    value: s.values.get(&characteristic).cloned().unwrap_or_default(),
                });
            }
        })
    }

    async fn write_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        value: Bytes,
    ) -> bool {
        let call = SimCall::Write {
            handle: self.handle,
            characteristic,
            value: value.clone(),
        };
        self.request(call, |h, s| {
            if s.auto_respond {
                h.sink.send(TransportEvent::CharacteristicWrite {
                    characteristic,
                    status: GattStatus::SUCCESS,
                    value,
                });
            }
        })
    }

    async fn set_characteristic_notification(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> bool {
        let call = SimCall::SetNotification {
            handle: self.handle,
            characteristic,
            enable,
        };
        self.request(call, |_, _| {})
    }

    async fn write_descriptor(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        _value: Bytes,
    ) -> bool {
        let call = SimCall::WriteDescriptor {
            handle: self.handle,
            characteristic,
            descriptor,
        };
        self.request(call, |h, s| {
            if s.auto_respond {
                h.sink.send(TransportEvent::DescriptorWrite {
                    descriptor,
                    status: GattStatus::SUCCESS,
                });
            }
        })
    }

    async fn read_remote_rssi(&self) -> bool {
        self.request(SimCall::ReadRssi { handle: self.handle }, |h, s| {
            if s.auto_respond {
                h.sink.send(TransportEvent::RssiRead {
                    rssi: SIM_RSSI,
                    status: GattStatus::SUCCESS,
                });
            }
        })
    }
}
