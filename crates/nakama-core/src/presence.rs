use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};
use crate::stream::Stream;

/// Metadata carried by a presence, independent of which stream it's on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub username: String,
    /// Opaque, user-chosen status payload.
    pub status: Option<String>,
    /// If true, this presence is not reported to other members via
    /// join/leave events, but still receives message delivery.
    pub hidden: bool,
    /// If true, messages addressed to the stream via this presence are
    /// eligible for persistence by the external storage collaborator.
    pub persistence: bool,
}

impl PresenceMeta {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            status: None,
            hidden: false,
            persistence: true,
        }
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn persistence(mut self, persistence: bool) -> Self {
        self.persistence = persistence;
        self
    }
}

/// The tuple `(stream, session-id, user-id) -> meta`, the unit the tracker
/// stores and the router/match code reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub stream: Stream,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub meta: PresenceMeta,
}

impl Presence {
    /// Key the tracker guarantees uniqueness on: `(stream, session-id)`.
    pub fn key(&self) -> (Stream, SessionId) {
        (self.stream.clone(), self.session_id)
    }
}
