use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of logical channel a [`Stream`] addresses.
///
/// Field-wise equality on [`Stream`] (mode, subject, subcontext, label) is
/// what the tracker and router key on; this enum is deliberately
/// `#[non_exhaustive]` so new modes can be added without breaking callers
/// that match on it defensively via `_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
pub enum StreamMode {
    Notifications = 0,
    Status = 1,
    ChannelDirect = 2,
    ChannelRoom = 3,
    ChannelGroup = 4,
    MatchRelayed = 5,
    MatchAuthoritative = 6,
    Group = 7,
    Party = 8,
}

/// A structured subscription key. Streams are first-class values used as
/// map keys by the tracker; they are never serialized to disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stream {
    pub mode: StreamMode,
    /// Primary target, e.g. user-id for notifications, match-id for match
    /// streams. `Uuid::nil()` when unused.
    pub subject: Uuid,
    /// Secondary target, e.g. the other user-id for direct chat.
    pub subcontext: Uuid,
    /// Free-form sub-key for rooms. Empty when unused.
    pub label: String,
}

impl Stream {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            subject: Uuid::nil(),
            subcontext: Uuid::nil(),
            label: String::new(),
        }
    }

    pub fn with_subject(mut self, subject: Uuid) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_subcontext(mut self, subcontext: Uuid) -> Self {
        self.subcontext = subcontext;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn notifications(user: Uuid) -> Self {
        Self::new(StreamMode::Notifications).with_subject(user)
    }

    pub fn match_authoritative(match_id: Uuid) -> Self {
        Self::new(StreamMode::MatchAuthoritative).with_subject(match_id)
    }

    pub fn direct_chat(a: Uuid, b: Uuid) -> Self {
        // Canonical ordering so (a, b) and (b, a) resolve to the same stream.
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self::new(StreamMode::ChannelDirect)
            .with_subject(lo)
            .with_subcontext(hi)
    }
}
