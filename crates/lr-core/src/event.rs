//! Raw connection records as stored by the station.

use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// Which stream a listener was attached to.
///
/// A listener is either on a local mount, on a remote relay, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MountRef {
    Local(i64),
    Remote(i64),
    None,
}

impl MountRef {
    /// Builds a reference from the two nullable id columns of a stored row.
    ///
    /// Returns `None` when both ids are set, which the store rejects.
    pub const fn from_ids(mount_id: Option<i64>, remote_id: Option<i64>) -> Option<Self> {
        match (mount_id, remote_id) {
            (Some(id), None) => Some(Self::Local(id)),
            (None, Some(id)) => Some(Self::Remote(id)),
            (None, None) => Some(Self::None),
            (Some(_), Some(_)) => None,
        }
    }
}

/// One persisted listener connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Fingerprint of the listener's client, stable across reconnects.
    pub identity_hash: String,
    pub ip: String,
    pub user_agent: String,
    pub mount_ref: MountRef,
    /// Epoch seconds the connection began.
    pub interval_start: i64,
    /// Epoch seconds the connection ended, or `0` while still connected.
    pub interval_end: i64,
}

impl RawEvent {
    /// Whether the connection is still open.
    pub const fn is_open(&self) -> bool {
        self.interval_end == 0
    }

    /// The raw interval, with an open end left as `0`.
    pub const fn interval(&self) -> Interval {
        Interval::new(self.interval_start, self.interval_end)
    }
}
