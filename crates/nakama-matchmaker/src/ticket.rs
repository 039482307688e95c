use std::collections::HashMap;

use nakama_core::{SessionId, UserId};
use uuid::Uuid;

use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketId(pub Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A matchmaker ticket (spec §3, §4.6). Ephemeral and node-local;
/// expiration is explicit cancel, session close, or successful match.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub min_count: u32,
    pub max_count: u32,
    pub count_multiple: u32,
    pub string_properties: HashMap<String, String>,
    pub numeric_properties: HashMap<String, f64>,
    pub query: Query,
    /// Monotonic insertion order, used for tie-breaking (spec §4.6:
    /// "prefer the group with the earliest-added seed ticket") instead of
    /// a wall-clock timestamp so ordering is exact even when two tickets
    /// are added within the same millisecond.
    pub(crate) sequence: u64,
}

impl Ticket {
    pub fn satisfies(&self, other: &Ticket) -> bool {
        self.query
            .evaluate(&other.string_properties, &other.numeric_properties)
    }
}
