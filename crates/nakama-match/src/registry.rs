use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use nakama_core::{Config, MatchId, Stream, StreamMode};
use nakama_router::Router;
use nakama_tracker::Tracker;

use crate::dispatcher::Dispatcher;
use crate::error::MatchError;
use crate::handler::{MatchHandler, MatchHandlerRegistry};
use crate::runtime::{self, MatchHandle};
use crate::types::{MatchMessage, MatchPresence};

/// Boolean query over match labels (spec §4.5, reusing the §4.6 grammar).
/// Implemented as simple substring/token containment since match labels
/// are free-form strings, not structured properties — see
/// [`nakama_matchmaker::query`] for the richer ticket-property grammar.
pub fn label_matches_query(label: &str, query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    let label_lower = label.to_lowercase();
    // A minimal AND-of-tokens evaluator: every whitespace-separated token
    // (optionally prefixed with `-` for negation) must match.
    query.split_whitespace().all(|token| {
        if let Some(negated) = token.strip_prefix('-') {
            !label_lower.contains(&negated.to_lowercase())
        } else {
            label_lower.contains(&token.to_lowercase())
        }
    })
}

/// Owns match handles and their tick tasks (spec §4.5). Each handle's
/// state is owned by its own tick task; this registry only ever touches
/// the routing metadata described in [`MatchHandle`].
pub struct MatchRegistry {
    handles: DashMap<MatchId, Arc<MatchHandle>>,
    handlers: Arc<MatchHandlerRegistry>,
    router: Arc<Router>,
    tracker: Arc<Tracker>,
    config: Arc<Config>,
    node: Arc<str>,
}

impl MatchRegistry {
    pub fn new(
        handlers: Arc<MatchHandlerRegistry>,
        router: Arc<Router>,
        tracker: Arc<Tracker>,
        config: Arc<Config>,
        node: impl Into<Arc<str>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handles: DashMap::new(),
            handlers,
            router,
            tracker,
            config,
            node: node.into(),
        })
    }

    /// `match_create(module, params)` (spec §4.5). Instantiates the
    /// handler via the registered factory, validates `tick_rate_hz`,
    /// registers the handle and starts its tick loop. The creator is not
    /// auto-joined.
    pub async fn match_create(
        self: &Arc<Self>,
        module: &str,
        params: &str,
    ) -> Result<MatchId, MatchError> {
        let handler = self
            .handlers
            .get(module)
            .ok_or_else(|| MatchError::ModuleNotFound(module.to_string()))?;

        let match_id = MatchId::new(self.node.clone());
        let ctx = crate::types::MatchContext {
            match_id: match_id.clone(),
            node: self.node.clone(),
            authoritative: true,
        };

        let init = handler
            .match_init(&ctx, params)
            .await
            .map_err(|e| MatchError::InitFailed(e.to_string()))?;

        if init.tick_rate_hz < 1 || init.tick_rate_hz > 60 {
            return Err(MatchError::InvalidTickRate(init.tick_rate_hz));
        }

        let stream = Stream::new(StreamMode::MatchAuthoritative).with_subject(match_id.id);
        let label_cell = Arc::new(RwLock::new(String::new()));
        let dispatcher = Arc::new(Dispatcher::new(
            self.router.clone(),
            stream.clone(),
            match_id.clone(),
            label_cell.clone(),
        ));

        let registry = self.clone();
        let handles_key = match_id.clone();
        let on_terminate = move || {
            registry.handles.remove(&handles_key);
        };

        let handle = runtime::spawn(
            match_id.clone(),
            true,
            handler,
            init.state,
            init.tick_rate_hz,
            init.label,
            dispatcher,
            label_cell,
            self.tracker.clone(),
            stream,
            self.config.clone(),
            on_terminate,
        );

        // `match_init`'s returned state is folded in by re-dispatching
        // through the handle's first tick rather than passed directly:
        // simpler to just seed `runtime::spawn` with it up front.
        self.handles.insert(match_id.clone(), handle);

        Ok(match_id)
    }

    pub fn get(&self, match_id: &MatchId) -> Option<Arc<MatchHandle>> {
        self.handles.get(match_id).map(|e| e.value().clone())
    }

    /// `match_join`'s client-facing half (spec §4.5): runs the join-attempt
    /// gate synchronously against the match's tick task and returns
    /// accept/reject. On accept, the Tracker has already recorded the
    /// presence (done by the tick task itself, so it's visible to any
    /// concurrent `match_list`/`count` immediately, not only after the
    /// next tick).
    pub async fn match_join(
        &self,
        match_id: &MatchId,
        presence: MatchPresence,
        metadata: String,
    ) -> Result<(), MatchError> {
        let handle = self
            .get(match_id)
            .ok_or_else(|| MatchError::NotFound(match_id.to_string()))?;
        match handle.join_attempt(presence, metadata).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(MatchError::JoinRejected(reason)),
            Err(_) => Err(MatchError::Terminating(match_id.to_string())),
        }
    }

    pub fn match_leave(&self, match_id: &MatchId, presence: MatchPresence) {
        if let Some(handle) = self.get(match_id) {
            handle.leave(presence);
        }
    }

    /// Inbound `match-data-send` (spec §4.5): a session that is not a
    /// current presence of the match is silently dropped, no error to the
    /// sender.
    pub fn match_data_send(&self, match_id: &MatchId, message: MatchMessage) {
        let Some(handle) = self.get(match_id) else {
            return;
        };
        let is_member = self
            .tracker
            .list_local_session_ids_by_stream(&handle.stream)
            .contains(&message.sender.session_id);
        if !is_member {
            return;
        }
        handle.data_send(message);
    }

    pub fn terminate(&self, match_id: &MatchId) {
        if let Some(handle) = self.get(match_id) {
            handle.terminate();
        }
    }

    /// `match_list(limit, authoritative?, label, min_size, max_size,
    /// query)` (spec §4.5). Size is derived from the Tracker count on the
    /// match's stream, label/query from the handle's current label.
    #[allow(clippy::too_many_arguments)]
    pub fn match_list(
        &self,
        limit: usize,
        authoritative: Option<bool>,
        label: Option<&str>,
        min_size: Option<usize>,
        max_size: Option<usize>,
        query: Option<&str>,
    ) -> Vec<(MatchId, String, usize)> {
        let mut out = Vec::new();
        for entry in self.handles.iter() {
            if out.len() >= limit {
                break;
            }
            let handle = entry.value();
            if let Some(wanted) = authoritative {
                if handle.authoritative != wanted {
                    continue;
                }
            }
            let current_label = handle.label();
            if let Some(exact) = label {
                if current_label != exact {
                    continue;
                }
            }
            if let Some(q) = query {
                if !label_matches_query(&current_label, q) {
                    continue;
                }
            }
            let size = handle.size();
            if let Some(min) = min_size {
                if size < min {
                    continue;
                }
            }
            if let Some(max) = max_size {
                if size > max {
                    continue;
                }
            }
            out.push((handle.match_id.clone(), current_label, size));
        }
        out
    }
}
