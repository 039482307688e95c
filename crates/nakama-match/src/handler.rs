use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::dispatcher::Dispatcher;
use crate::error::MatchError;
use crate::types::{MatchContext, MatchInit, MatchMessage, MatchPresence, MatchState};

/// User-supplied game logic, shaped after the Kaos match-handler
/// reference's `MatchHandler` trait (`init`/`join`/`leave`/`tick`/
/// `terminate`), generalized to `async_trait` since callbacks here run on
/// a `tokio` task rather than synchronously inside a server tick.
#[async_trait]
pub trait MatchHandler: Send + Sync + 'static {
    /// `params` is the caller-supplied, core-opaque JSON string from
    /// `MatchCreate`. The returned `tick_rate_hz` must be in `[1, 60]`;
    /// the runtime rejects anything outside that range as a fatal create
    /// error before the handle is ever registered (spec §4.5).
    async fn match_init(&self, ctx: &MatchContext, params: &str) -> Result<MatchInit, MatchError>;

    /// Gate a join request. If `accept` is false, the join is rejected
    /// with `reason` returned to the client and no presence is recorded.
    async fn match_join_attempt(
        &self,
        ctx: &MatchContext,
        tick: u64,
        state: MatchState,
        presence: &MatchPresence,
        metadata: &str,
    ) -> (MatchState, bool, Option<String>);

    /// Invoked on the next tick boundary with the batch of presences that
    /// joined (were accepted) since the previous tick. Skipped when empty.
    async fn match_join(
        &self,
        ctx: &MatchContext,
        tick: u64,
        state: MatchState,
        joined: Vec<MatchPresence>,
    ) -> MatchState;

    /// Invoked on the next tick boundary with the batch that left since
    /// the previous tick (explicit leave, kick, or session close). Skipped
    /// when empty.
    async fn match_leave(
        &self,
        ctx: &MatchContext,
        tick: u64,
        state: MatchState,
        left: Vec<MatchPresence>,
    ) -> MatchState;

    /// The per-tick update. Returning `None` is the terminal sentinel: the
    /// handle transitions to `terminating` and `match_terminate` is
    /// invoked once.
    async fn match_loop(
        &self,
        ctx: &MatchContext,
        dispatcher: &Dispatcher,
        tick: u64,
        state: MatchState,
        messages: Vec<MatchMessage>,
    ) -> Option<MatchState>;

    /// Invoked once when the match becomes terminal. The runtime waits up
    /// to `grace_seconds` for outbound dispatches made here to drain
    /// before transitioning to `dead`.
    async fn match_terminate(
        &self,
        ctx: &MatchContext,
        dispatcher: &Dispatcher,
        state: MatchState,
        grace_seconds: u32,
    ) -> MatchState;

    /// Custom signal, e.g. from an RPC. Default is a no-op returning no
    /// response, matching the Kaos reference's default `signal` impl.
    async fn match_signal(
        &self,
        _ctx: &MatchContext,
        _dispatcher: &Dispatcher,
        state: MatchState,
        _data: &str,
    ) -> (MatchState, Option<String>) {
        (state, None)
    }
}

/// Registry of match-module factories, keyed by module name. Populated
/// once at startup (the same "registry from key to function pointer,
/// looked up in O(1) at dispatch" shape spec §9 calls for, for hook
/// chains, reused here for match modules).
#[derive(Default)]
pub struct MatchHandlerRegistry {
    handlers: DashMap<String, Arc<dyn MatchHandler>>,
}

impl MatchHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: impl Into<String>, handler: Arc<dyn MatchHandler>) {
        self.handlers.insert(module.into(), handler);
    }

    pub fn get(&self, module: &str) -> Option<Arc<dyn MatchHandler>> {
        self.handlers.get(module).map(|r| r.value().clone())
    }

    pub fn modules(&self) -> HashMap<String, Arc<dyn MatchHandler>> {
        self.handlers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
