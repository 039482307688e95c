//! Minimal authoritative match module registered under `"echo"`: accepts
//! every join and rebroadcasts whatever data it receives to the match's
//! other members. Exists so the accept loop and the matchmaker's
//! `matchmaker_match_module` have something real to create and join
//! against; production deployments register their own modules instead.

use async_trait::async_trait;
use nakama_match::{
    Dispatcher, MatchContext, MatchError, MatchHandler, MatchInit, MatchMessage, MatchPresence,
    MatchState,
};
use serde_json::json;

pub struct EchoMatch;

#[async_trait]
impl MatchHandler for EchoMatch {
    async fn match_init(&self, _ctx: &MatchContext, _params: &str) -> Result<MatchInit, MatchError> {
        Ok(MatchInit::new(json!({"ticks": 0}), 10, "echo"))
    }

    async fn match_join_attempt(
        &self,
        _ctx: &MatchContext,
        _tick: u64,
        state: MatchState,
        _presence: &MatchPresence,
        _metadata: &str,
    ) -> (MatchState, bool, Option<String>) {
        (state, true, None)
    }

    async fn match_join(
        &self,
        _ctx: &MatchContext,
        _tick: u64,
        state: MatchState,
        _joined: Vec<MatchPresence>,
    ) -> MatchState {
        state
    }

    async fn match_leave(
        &self,
        _ctx: &MatchContext,
        _tick: u64,
        state: MatchState,
        _left: Vec<MatchPresence>,
    ) -> MatchState {
        state
    }

    async fn match_loop(
        &self,
        _ctx: &MatchContext,
        dispatcher: &Dispatcher,
        _tick: u64,
        mut state: MatchState,
        messages: Vec<MatchMessage>,
    ) -> Option<MatchState> {
        for m in messages {
            dispatcher
                .broadcast(m.op_code, &m.data, m.recipients.as_deref(), Some(&m.sender))
                .await;
        }
        if let Some(obj) = state.as_object_mut() {
            let ticks = obj.get("ticks").and_then(|v| v.as_u64()).unwrap_or(0);
            obj.insert("ticks".into(), json!(ticks + 1));
        }
        Some(state)
    }

    async fn match_terminate(
        &self,
        _ctx: &MatchContext,
        _dispatcher: &Dispatcher,
        state: MatchState,
        _grace_seconds: u32,
    ) -> MatchState {
        state
    }
}
