use std::sync::Arc;

use nakama_core::{MatchId, SessionId, UserId};

/// Opaque user state, round-tripped through every handler callback. Kept
/// as `serde_json::Value` (rather than a generic type parameter) so one
/// `MatchRegistry` can host many differently-typed match modules behind a
/// single trait object, the same shape the Kaos match-handler reference
/// uses for its `MatchState::state` field.
pub type MatchState = serde_json::Value;

/// Immutable per-match facts handed to every handler callback.
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub match_id: MatchId,
    pub node: Arc<str>,
    pub authoritative: bool,
}

/// A participant in a match, the match-scoped analog of
/// [`nakama_core::Presence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPresence {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
}

/// One inbound `match-data-send`, buffered for the tick it's delivered on.
#[derive(Debug, Clone)]
pub struct MatchMessage {
    pub sender: MatchPresence,
    pub op_code: i64,
    pub data: Vec<u8>,
    pub reliable: bool,
    pub received_at_ms: i64,
    /// The sender's optional recipient filter (spec §8 scenario 6). Core
    /// routing never applies this itself — threading it through to
    /// `match_loop` and honoring it in `Dispatcher::broadcast` is the
    /// handler's decision, the same way the real server leaves relay
    /// policy to user match code.
    pub recipients: Option<Vec<MatchPresence>>,
}

/// Returned by `MatchHandler::match_init`.
pub struct MatchInit {
    pub state: MatchState,
    pub tick_rate_hz: u32,
    pub label: String,
}

impl MatchInit {
    pub fn new(state: MatchState, tick_rate_hz: u32, label: impl Into<String>) -> Self {
        Self {
            state,
            tick_rate_hz,
            label: label.into(),
        }
    }
}
