//! Match registry and authoritative match runtime (spec §4.5): fixed
//! tick-rate loops generalizing the teacher's `SharedServer::tps`/
//! `Server::current_tick` single-ECS-tick model to one `tokio` task per
//! match, with a `MatchHandler` trait shaped after the Kaos match-handler
//! reference.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;
pub mod runtime;
pub mod types;

pub use dispatcher::Dispatcher;
pub use error::MatchError;
pub use handler::{MatchHandler, MatchHandlerRegistry};
pub use registry::MatchRegistry;
pub use runtime::{MatchHandle, MatchLifecycle};
pub use types::{MatchContext, MatchInit, MatchMessage, MatchPresence, MatchState};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use nakama_core::{Config, UserId};
    use nakama_registry::Registry;
    use nakama_router::Router;
    use nakama_session::SessionId;
    use nakama_tracker::Tracker;
    use serde_json::json;

    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl MatchHandler for EchoHandler {
        async fn match_init(
            &self,
            _ctx: &MatchContext,
            _params: &str,
        ) -> Result<MatchInit, MatchError> {
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
            ctx: &MatchContext,
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
            let _ = ctx;
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

    fn test_registry() -> Arc<MatchRegistry> {
        let handlers = Arc::new(MatchHandlerRegistry::new());
        handlers.register("echo", Arc::new(EchoHandler));
        let tracker = Arc::new(Tracker::new());
        let session_registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(tracker.clone(), session_registry));
        let config = Arc::new(Config::default());
        MatchRegistry::new(handlers, router, tracker, config, "test-node")
    }

    #[tokio::test]
    async fn create_then_join_then_list_reflects_size() {
        let registry = test_registry();
        let match_id = registry.match_create("echo", "{}").await.unwrap();

        let presence = MatchPresence {
            session_id: SessionId::new(),
            user_id: UserId::new(),
            username: "p1".into(),
        };
        registry
            .match_join(&match_id, presence, String::new())
            .await
            .unwrap();

        // Join is visible immediately via the Tracker, before any tick.
        let listed = registry.match_list(10, Some(true), None, None, None, None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, match_id);
        assert_eq!(listed[0].2, 1);
    }

    #[tokio::test]
    async fn create_rejects_unknown_module() {
        let registry = test_registry();
        let err = registry.match_create("does-not-exist", "{}").await;
        assert!(matches!(err, Err(MatchError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn data_send_from_non_member_is_silently_dropped() {
        let registry = test_registry();
        let match_id = registry.match_create("echo", "{}").await.unwrap();

        let not_a_member = MatchPresence {
            session_id: SessionId::new(),
            user_id: UserId::new(),
            username: "ghost".into(),
        };
        // Should not panic and should have no observable effect.
        registry.match_data_send(
            &match_id,
            MatchMessage {
                sender: not_a_member,
                op_code: 1,
                data: vec![1],
                reliable: true,
                received_at_ms: 0,
                recipients: None,
            },
        );
    }
}
