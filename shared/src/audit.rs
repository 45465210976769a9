//! Status audit log
//!
//! Append-only history of lifecycle transitions for one device, kept for
//! postmortem debugging of flaky links. Records are never evicted.

use parking_lot::Mutex;
use std::fmt;

use crate::now_ms;

/// Kind of lifecycle transition recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Connect attempt initiated
    Connect,
    /// Link established
    Connected,
    /// Disconnect requested by the user
    Disconnect,
    /// Link dropped
    Disconnected,
    /// Transport handle released
    Close,
    /// Automatic reconnect initiated
    AutoConnect,
    /// Automatic reconnect rejected by the transport
    AutoConnectFail,
    /// Connection handshake failed
    ConnectedError,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Connect => "CONNECT",
            StatusKind::Connected => "CONNECTED",
            StatusKind::Disconnect => "DISCONNECT",
            StatusKind::Disconnected => "DISCONNECTED",
            StatusKind::Close => "CLOSE",
            StatusKind::AutoConnect => "AUTOCONNECT",
            StatusKind::AutoConnectFail => "AUTOCONNECT_FAIL",
            StatusKind::ConnectedError => "CONNECTED_ERROR",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChangeRecord {
    pub kind: StatusKind,
    /// Milliseconds since Unix epoch
    pub timestamp_ms: u64,
}

/// Thread-safe, insertion-ordered audit log
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<StatusChangeRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record stamped with the current time.
    ///
    /// Timestamps never go backwards within one log, even if the wall clock does.
    pub fn append(&self, kind: StatusKind) -> StatusChangeRecord {
        let mut records = self.records.lock();
        let floor = records.last().map(|r| r.timestamp_ms).unwrap_or(0);
        let record = StatusChangeRecord {
            kind,
            timestamp_ms: now_ms().max(floor),
        };
        records.push(record);
        record
    }

    /// Independent copy of all records in append order
    pub fn snapshot(&self) -> Vec<StatusChangeRecord> {
        self.records.lock().clone()
    }

    /// Kinds only, in append order
    pub fn kinds(&self) -> Vec<StatusKind> {
        self.records.lock().iter().map(|r| r.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
