//! Link State Machine
//!
//! Decides how a device reacts to connection-state changes reported by the
//! transport. Pure: the caller supplies the conditions sampled at the moment
//! the event is handled and performs the resulting side effects.

use crate::GattStatus;

/// Connection status seen by callers of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Link state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionStatus {
    /// Derive the status from the transport's view of the current handle (`None`
    /// when no handle is held) and the device's own "attempt in flight" flag.
    ///
    /// The flag wins over the transport while an attempt is in flight, since the
    /// transport can report stale values during the handshake.
    pub fn derive(link: Option<LinkState>, attempting: bool) -> Self {
        match link {
            None => ConnectionStatus::Disconnected,
            Some(_) if attempting => ConnectionStatus::Connecting,
            Some(LinkState::Connecting) => ConnectionStatus::Connecting,
            // Still linked until teardown completes
            Some(LinkState::Connected | LinkState::Disconnecting) => ConnectionStatus::Connected,
            Some(LinkState::Disconnected) => ConnectionStatus::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// Conditions sampled when a connection-state change is handled
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkConditions {
    /// Transport adapter is enabled
    pub adapter_enabled: bool,
    /// Device is a member of the registry's maintain set
    pub maintain: bool,
    /// The user asked to disconnect since the last connect
    pub disconnect_requested: bool,
}

impl LinkConditions {
    /// Whether an unexpected drop may be recovered automatically
    pub fn may_reconnect(&self) -> bool {
        self.adapter_enabled && self.maintain && !self.disconnect_requested
    }
}

/// What to do after a link dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAction {
    /// Ask the transport to re-establish the same handle right away
    Reconnect,
    /// Release the handle and retry after a delay
    Retry,
    /// Release the handle and stay disconnected
    Release,
}

/// Reaction to a connection-state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkReaction {
    /// Link is up: record, discover services, notify
    Established,
    /// Link came up after the user asked to disconnect: tear it down again
    Cancelled,
    /// Handshake reported a failure status
    HandshakeFailed,
    /// Link went down
    Dropped(DropAction),
    /// Intermediate state, nothing to do
    Ignored,
}

/// Result of handling a transport event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Nothing further to do
    Success,
    /// Release the handle and schedule a guarded retry
    Retryable,
    /// Release the handle and stay disconnected
    Fatal,
}

impl LinkReaction {
    /// Outcome known without asking the transport anything further.
    ///
    /// `None` for [`DropAction::Reconnect`], whose outcome depends on whether the
    /// transport accepts the reconnect (see [`HandlerOutcome::from_reconnect`]).
    pub fn outcome(&self) -> Option<HandlerOutcome> {
        match self {
            LinkReaction::Established | LinkReaction::Cancelled | LinkReaction::Ignored => {
                Some(HandlerOutcome::Success)
            }
            LinkReaction::HandshakeFailed => Some(HandlerOutcome::Retryable),
            LinkReaction::Dropped(DropAction::Retry) => Some(HandlerOutcome::Retryable),
            LinkReaction::Dropped(DropAction::Release) => Some(HandlerOutcome::Fatal),
            LinkReaction::Dropped(DropAction::Reconnect) => None,
        }
    }
}

impl HandlerOutcome {
    pub fn from_reconnect(accepted: bool) -> Self {
        if accepted {
            HandlerOutcome::Success
        } else {
            HandlerOutcome::Retryable
        }
    }

    /// A user-ended attempt is never retried.
    pub fn respecting(self, conditions: &LinkConditions) -> Self {
        match self {
            HandlerOutcome::Retryable if conditions.disconnect_requested => HandlerOutcome::Fatal,
            other => other,
        }
    }
}

/// Decide the reaction to a reported connection-state change
pub fn react(status: GattStatus, state: LinkState, conditions: &LinkConditions) -> LinkReaction {
    match state {
        LinkState::Connected if !status.is_success() => LinkReaction::HandshakeFailed,
        LinkState::Connected if conditions.disconnect_requested => LinkReaction::Cancelled,
        LinkState::Connected => LinkReaction::Established,

        LinkState::Disconnected if !conditions.may_reconnect() => {
            LinkReaction::Dropped(DropAction::Release)
        }
        // Abnormal drop: the handle is unusable, start over from a fresh one
        LinkState::Disconnected if !status.is_success() => LinkReaction::Dropped(DropAction::Retry),
        LinkState::Disconnected => LinkReaction::Dropped(DropAction::Reconnect),

        LinkState::Connecting | LinkState::Disconnecting => LinkReaction::Ignored,
    }
}
