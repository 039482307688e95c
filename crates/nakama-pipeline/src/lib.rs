//! Top-level demultiplexer (spec §4.7, §4.8 glossary "Pipeline"): receives
//! a decoded [`Envelope`] from a session, wraps it with the Hook Pipeline,
//! and routes it by payload tag to the chat/match/status/matchmaker/rpc
//! handler that owns it. Plays the role the teacher's `handle_packet`
//! dispatch loop plays for `valence_network`, generalized from one packet
//! enum to the full payload union and fronted by before/after hooks.

pub mod collaborators;
pub mod rpc;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use nakama_core::{MatchId, PresenceMeta, SessionId, Stream, StreamMode, UserId};
use nakama_match::{MatchError, MatchMessage, MatchPresence, MatchRegistry};
use nakama_matchmaker::{Matchmaker, TicketId, TicketRequest};
use nakama_proto::payload::{
    ChannelJoin, ChannelJoinType, ChannelLeave, ChannelMessage, ChannelMessageSend, Match,
    MatchCreate, MatchDataSend, MatchJoin, MatchJoinTarget, MatchLeave, MatchPresenceEvent,
    MatchmakerAdd, MatchmakerMatched, MatchmakerRemove, MatchmakerTicket, MatchmakerUser, Ping,
    Pong, Rpc as RpcPayload, StatusFollow, StatusUnfollow, UserPresence,
};
use nakama_proto::{CodecError, Envelope, ErrorCode, ErrorPayload, Payload, WireFormat};
use nakama_registry::Registry;
use nakama_router::Router;
use nakama_session::{EnvelopeHandler, SessionHandle, WsSession};
use nakama_tracker::Tracker;
use tracing::warn;
use uuid::Uuid;

pub use collaborators::{
    MessagePersistence, MetricsSink, NoopMetricsSink, NoopNotificationDelivery, NoopPersistence,
    NotificationDelivery, TracingMetricsSink,
};
pub use rpc::{RpcHandler, RpcRegistry};

use nakama_hooks::{HandlerResult, HookContext, HookPipeline};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn channel_id_for(stream: &Stream) -> String {
    match stream.mode {
        StreamMode::ChannelDirect => format!("dm:{}:{}", stream.subject, stream.subcontext),
        StreamMode::ChannelRoom => format!("room:{}", stream.label),
        StreamMode::ChannelGroup => format!("group:{}", stream.label),
        other => format!("{other:?}:{}:{}:{}", stream.subject, stream.subcontext, stream.label),
    }
}

fn presence_of(session: &dyn SessionHandle) -> UserPresence {
    UserPresence {
        user_id: session.user_id().0,
        session_id: session.id().0,
        username: session.username(),
        persistence: false,
    }
}

fn match_presence_of(session: &dyn SessionHandle) -> MatchPresence {
    MatchPresence {
        session_id: session.id(),
        user_id: session.user_id(),
        username: session.username(),
    }
}

/// Wiring needed to build a [`Pipeline`]. Broken out from the constructor
/// argument list purely for readability; every field is required.
pub struct PipelineDeps {
    pub node: Arc<str>,
    pub registry: Arc<Registry>,
    pub tracker: Arc<Tracker>,
    pub router: Arc<Router>,
    pub match_registry: Arc<MatchRegistry>,
    pub matchmaker: Arc<Matchmaker>,
    pub hooks: Arc<HookPipeline>,
    pub rpc: RpcRegistry,
    pub persistence: Arc<dyn MessagePersistence>,
    pub notifications: Arc<dyn NotificationDelivery>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Match module instantiated for a successfully formed matchmaker
    /// group, if any. `None` means `run_matchmaker_tick` only emits the
    /// `matchmaker-matched` notification without a backing match; the
    /// ticket-backed token then carries no usable `match_join` target.
    pub matchmaker_match_module: Option<String>,
}

pub struct Pipeline {
    node: Arc<str>,
    registry: Arc<Registry>,
    tracker: Arc<Tracker>,
    router: Arc<Router>,
    match_registry: Arc<MatchRegistry>,
    matchmaker: Arc<Matchmaker>,
    hooks: Arc<HookPipeline>,
    rpc: RpcRegistry,
    persistence: Arc<dyn MessagePersistence>,
    notifications: Arc<dyn NotificationDelivery>,
    metrics: Arc<dyn MetricsSink>,
    matchmaker_match_module: Option<String>,
    /// `channel_id -> Stream`, populated on `channel-join`. `ChannelLeave`
    /// and `ChannelMessageSend` only carry the opaque id the client was
    /// handed back, so the Pipeline is the place that remembers which
    /// Stream it names (Tracker/Router key on `Stream`, not on this id).
    channels: DashMap<String, Stream>,
    /// `matchmaker-matched` token -> the match it was minted for.
    matched_tokens: DashMap<String, MatchId>,
    /// Lets `EnvelopeHandler::handle` (which only gets `&self`) recover the
    /// `Arc<Self>` that `dispatch`'s hook bookkeeping needs, without
    /// duplicating dispatch logic for the trait-object entry point.
    self_weak: Weak<Pipeline>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            node: deps.node,
            registry: deps.registry,
            tracker: deps.tracker,
            router: deps.router,
            match_registry: deps.match_registry,
            matchmaker: deps.matchmaker,
            hooks: deps.hooks,
            rpc: deps.rpc,
            persistence: deps.persistence,
            notifications: deps.notifications,
            metrics: deps.metrics,
            matchmaker_match_module: deps.matchmaker_match_module,
            channels: DashMap::new(),
            matched_tokens: DashMap::new(),
            self_weak: weak.clone(),
        })
    }

    fn self_arc(&self) -> Arc<Pipeline> {
        self.self_weak.upgrade().expect("pipeline outlives its own handle")
    }

    /// Dispatches one decoded envelope: runs the before-hook, routes to
    /// the payload's handler, runs the after-hook, and returns the
    /// envelope (if any) to send back to `session` with the original
    /// `collation_id` attached. A before-hook `drop` or an inbound-only
    /// payload with no ack (e.g. `match-data-send`) both yield `None`.
    pub async fn dispatch(self: &Arc<Self>, session: Arc<dyn SessionHandle>, envelope: Envelope) -> Option<Envelope> {
        self.metrics.incr_messages_in();
        let collation_id = envelope.collation_id.clone();
        let ctx = HookContext::new(self.node.clone());

        let envelope = match self.hooks.run_before(&ctx, session.as_ref(), envelope).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return None,
            Err(error) => {
                self.metrics.incr_error(error.code);
                return Some(Envelope::error(collation_id, error));
            }
        };

        let after_envelope = envelope.clone();
        let result = self.route(&session, envelope).await;

        let handler_result = match &result {
            Ok(_) => HandlerResult::Ok,
            Err(e) => HandlerResult::Err(e.clone()),
        };
        self.hooks.run_after(ctx, session, after_envelope, handler_result);

        match result {
            Ok(Some(payload)) => {
                self.metrics.incr_messages_out();
                Some(Envelope::new(payload).with_collation_id(collation_id))
            }
            Ok(None) => None,
            Err(error) => {
                self.metrics.incr_error(error.code);
                Some(Envelope::error(collation_id, error))
            }
        }
    }

    async fn route(
        self: &Arc<Self>,
        session: &Arc<dyn SessionHandle>,
        envelope: Envelope,
    ) -> Result<Option<Payload>, ErrorPayload> {
        match envelope.payload {
            Payload::ChannelJoin(p) => self.handle_channel_join(session, p).await,
            Payload::ChannelLeave(p) => self.handle_channel_leave(session, p).await,
            Payload::ChannelMessageSend(p) => self.handle_channel_message_send(session, p).await,
            Payload::MatchCreate(p) => self.handle_match_create(session, p).await,
            Payload::MatchJoin(p) => self.handle_match_join(session, p).await,
            Payload::MatchLeave(p) => self.handle_match_leave(session, p).await,
            Payload::MatchDataSend(p) => self.handle_match_data_send(session, p).await,
            Payload::MatchmakerAdd(p) => self.handle_matchmaker_add(session, p).await,
            Payload::MatchmakerRemove(p) => self.handle_matchmaker_remove(session, p).await,
            Payload::StatusFollow(p) => self.handle_status_follow(session, p).await,
            Payload::StatusUnfollow(p) => self.handle_status_unfollow(session, p).await,
            Payload::Ping(p) => self.handle_ping(p).await,
            Payload::Rpc(p) => self.handle_rpc(session, p).await,
            Payload::Pong(_) | Payload::Heartbeat(_) => Ok(None),
            other => {
                warn!(payload = ?other, "unrecognized or server-only payload from client");
                Err(ErrorPayload::new(
                    ErrorCode::UnrecognizedPayload,
                    "this payload is not accepted from a client",
                ))
            }
        }
    }

    async fn handle_channel_join(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: ChannelJoin,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let stream = match payload.channel_type {
            ChannelJoinType::Room => Stream::new(StreamMode::ChannelRoom).with_label(payload.target),
            ChannelJoinType::Group => Stream::new(StreamMode::ChannelGroup).with_label(payload.target),
            ChannelJoinType::DirectMessage => {
                let other = Uuid::parse_str(&payload.target).map_err(|_| {
                    ErrorPayload::new(ErrorCode::BadInput, "channel-join target is not a user id")
                })?;
                Stream::direct_chat(session.user_id().0, other)
            }
        };

        let channel_id = channel_id_for(&stream);
        self.channels.insert(channel_id, stream.clone());

        let meta = PresenceMeta::new(session.username())
            .hidden(payload.hidden)
            .persistence(payload.persistence);
        self.tracker.track(session.id(), stream, session.user_id(), meta);

        Ok(None)
    }

    async fn handle_channel_leave(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: ChannelLeave,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let stream = self
            .channels
            .get(&payload.channel_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ErrorPayload::new(ErrorCode::BadInput, "unknown channel id"))?;
        self.tracker.untrack(session.id(), &stream);
        Ok(None)
    }

    async fn handle_channel_message_send(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: ChannelMessageSend,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let stream = self
            .channels
            .get(&payload.channel_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ErrorPayload::new(ErrorCode::BadInput, "unknown channel id"))?;

        let message = ChannelMessage {
            channel_id: payload.channel_id.clone(),
            message_id: Uuid::new_v4(),
            code: 0,
            sender: presence_of(session.as_ref()),
            content: payload.content,
            persistent: payload.persistent,
            create_time_ms: now_ms(),
        };

        if message.persistent {
            if let Err(e) = self.persistence.persist_if_enabled(&payload.channel_id, &message).await {
                warn!(%e, channel_id = %payload.channel_id, "message persistence failed, delivery continues");
            }
        }

        let envelope = Envelope::new(Payload::ChannelMessage(message.clone()));
        self.router.send(&stream, &envelope, true, None, Some(session.id())).await;

        Ok(Some(Payload::ChannelMessage(message)))
    }

    async fn handle_match_create(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: MatchCreate,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let match_id = self
            .match_registry
            .match_create(&payload.module, &payload.params)
            .await
            .map_err(match_error_to_envelope)?;

        let handle = self
            .match_registry
            .get(&match_id)
            .expect("just created, must still be in the registry");

        Ok(Some(Payload::Match(Match {
            match_id: match_id.to_string(),
            authoritative: handle.authoritative,
            label: handle.label(),
            size: handle.size() as u32,
            presences: Vec::new(),
            self_presence: presence_of(session.as_ref()),
        })))
    }

    fn resolve_match_target(&self, target: &MatchJoinTarget) -> Result<MatchId, ErrorPayload> {
        match target {
            MatchJoinTarget::MatchId(s) => s.parse().map_err(|_| {
                ErrorPayload::new(ErrorCode::BadInput, "malformed match id")
            }),
            MatchJoinTarget::Token(token) => self
                .matched_tokens
                .get(token)
                .map(|e| e.value().clone())
                .ok_or_else(|| ErrorPayload::new(ErrorCode::MatchNotFound, "matchmaker token is unknown or expired")),
        }
    }

    async fn handle_match_join(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: MatchJoin,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let match_id = self.resolve_match_target(&payload.target)?;
        let presence = match_presence_of(session.as_ref());

        self.match_registry
            .match_join(&match_id, presence.clone(), payload.metadata)
            .await
            .map_err(match_error_to_envelope)?;

        let handle = self
            .match_registry
            .get(&match_id)
            .ok_or_else(|| ErrorPayload::new(ErrorCode::MatchNotFound, "match no longer exists"))?;

        let presences: Vec<UserPresence> = self
            .tracker
            .list_by_stream(&handle.stream, true, true)
            .into_iter()
            .map(|p| UserPresence {
                user_id: p.user_id.0,
                session_id: p.session_id.0,
                username: p.meta.username,
                persistence: p.meta.persistence,
            })
            .collect();

        let joined_envelope = Envelope::new(Payload::MatchPresenceEvent(MatchPresenceEvent {
            match_id: match_id.to_string(),
            joins: vec![UserPresence {
                user_id: presence.user_id.0,
                session_id: presence.session_id.0,
                username: presence.username.clone(),
                persistence: false,
            }],
            leaves: Vec::new(),
        }));
        self.router
            .send(&handle.stream, &joined_envelope, true, None, Some(session.id()))
            .await;

        Ok(Some(Payload::Match(Match {
            match_id: match_id.to_string(),
            authoritative: handle.authoritative,
            label: handle.label(),
            size: handle.size() as u32,
            presences,
            self_presence: presence_of(session.as_ref()),
        })))
    }

    async fn handle_match_leave(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: MatchLeave,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let match_id: MatchId = payload
            .match_id
            .parse()
            .map_err(|_| ErrorPayload::new(ErrorCode::BadInput, "malformed match id"))?;
        let presence = match_presence_of(session.as_ref());

        if let Some(handle) = self.match_registry.get(&match_id) {
            let left_envelope = Envelope::new(Payload::MatchPresenceEvent(MatchPresenceEvent {
                match_id: match_id.to_string(),
                joins: Vec::new(),
                leaves: vec![UserPresence {
                    user_id: presence.user_id.0,
                    session_id: presence.session_id.0,
                    username: presence.username.clone(),
                    persistence: false,
                }],
            }));
            self.match_registry.match_leave(&match_id, presence);
            self.router
                .send(&handle.stream, &left_envelope, true, None, Some(session.id()))
                .await;
        }

        Ok(None)
    }

    async fn handle_match_data_send(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: MatchDataSend,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let match_id: MatchId = payload
            .match_id
            .parse()
            .map_err(|_| ErrorPayload::new(ErrorCode::BadInput, "malformed match id"))?;

        let recipients = if payload.presences.is_empty() {
            None
        } else {
            Some(
                payload
                    .presences
                    .iter()
                    .map(|p| MatchPresence {
                        session_id: SessionId(p.session_id),
                        user_id: UserId(p.user_id),
                        username: p.username.clone(),
                    })
                    .collect(),
            )
        };

        let message = MatchMessage {
            sender: match_presence_of(session.as_ref()),
            op_code: payload.op_code,
            data: payload.data,
            reliable: payload.reliable,
            received_at_ms: now_ms(),
            recipients,
        };

        self.match_registry.match_data_send(&match_id, message);
        Ok(None)
    }

    async fn handle_matchmaker_add(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: MatchmakerAdd,
    ) -> Result<Option<Payload>, ErrorPayload> {
        if self.matchmaker.at_capacity() {
            return Err(ErrorPayload::new(ErrorCode::BadInput, "matchmaker is at capacity"));
        }

        let request = TicketRequest {
            session_id: session.id(),
            user_id: session.user_id(),
            username: session.username(),
            min_count: payload.min_count,
            max_count: payload.max_count,
            count_multiple: payload.count_multiple,
            string_properties: payload.string_properties,
            numeric_properties: payload.numeric_properties,
            query: payload.query,
        };

        let ticket_id = self
            .matchmaker
            .add(request)
            .map_err(|e| ErrorPayload::new(ErrorCode::BadInput, e.to_string()))?;

        Ok(Some(Payload::MatchmakerTicket(MatchmakerTicket {
            ticket_id: ticket_id.to_string(),
        })))
    }

    async fn handle_matchmaker_remove(
        &self,
        _session: &Arc<dyn SessionHandle>,
        payload: MatchmakerRemove,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let ticket_id: TicketId = payload
            .ticket_id
            .parse::<Uuid>()
            .map(TicketId)
            .map_err(|_| ErrorPayload::new(ErrorCode::BadInput, "malformed ticket id"))?;
        self.matchmaker.remove(ticket_id);
        Ok(None)
    }

    async fn handle_status_follow(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: StatusFollow,
    ) -> Result<Option<Payload>, ErrorPayload> {
        for user_id in payload.user_ids {
            let stream = Stream::new(StreamMode::Status).with_subject(user_id);
            self.tracker.track(
                session.id(),
                stream,
                session.user_id(),
                PresenceMeta::new(session.username()),
            );
        }
        Ok(None)
    }

    async fn handle_status_unfollow(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: StatusUnfollow,
    ) -> Result<Option<Payload>, ErrorPayload> {
        for user_id in payload.user_ids {
            let stream = Stream::new(StreamMode::Status).with_subject(user_id);
            self.tracker.untrack(session.id(), &stream);
        }
        Ok(None)
    }

    async fn handle_ping(&self, _payload: Ping) -> Result<Option<Payload>, ErrorPayload> {
        Ok(Some(Payload::Pong(Pong::default())))
    }

    async fn handle_rpc(
        &self,
        session: &Arc<dyn SessionHandle>,
        payload: RpcPayload,
    ) -> Result<Option<Payload>, ErrorPayload> {
        let result = self.rpc.call(&payload.id, session.as_ref(), &payload.payload).await?;
        Ok(Some(Payload::Rpc(RpcPayload { id: payload.id, payload: result })))
    }

    /// Cross-cutting teardown for a closed session (spec §4.1 close step
    /// (f)/(g), §9's `streams_for_session` note): notifies every match the
    /// session was joined to, drops its matchmaker ticket if any, clears
    /// every Tracker presence, and removes it from the Registry. The
    /// session itself has already committed its close by the time a
    /// caller reaches here; this only touches the shared indices the
    /// session crate deliberately doesn't depend on.
    pub async fn cleanup_session(&self, session_id: SessionId, user_id: UserId) {
        self.matchmaker.remove_by_session(session_id);

        for stream in self.tracker.streams_for_session(session_id) {
            if stream.mode != StreamMode::MatchAuthoritative {
                continue;
            }
            let Some(presence) = self
                .tracker
                .list_by_stream(&stream, true, true)
                .into_iter()
                .find(|p| p.session_id == session_id)
            else {
                continue;
            };
            let match_presence = MatchPresence {
                session_id,
                user_id,
                username: presence.meta.username.clone(),
            };
            let match_id = MatchId { id: stream.subject, node: self.node.clone() };

            let left_envelope = Envelope::new(Payload::MatchPresenceEvent(MatchPresenceEvent {
                match_id: match_id.to_string(),
                joins: Vec::new(),
                leaves: vec![UserPresence {
                    user_id: user_id.0,
                    session_id: session_id.0,
                    username: match_presence.username.clone(),
                    persistence: false,
                }],
            }));
            self.router.send(&stream, &left_envelope, true, None, Some(session_id)).await;
            self.match_registry.match_leave(&match_id, match_presence);
        }

        self.tracker.untrack_all(session_id);
        self.registry.remove(session_id);
    }

    /// One matchmaker interval (spec §4.6, default 100ms): drains formed
    /// groups, optionally materializes a real match per group (when
    /// `matchmaker_match_module` is set) so the emitted token has
    /// something for `match_join` to resolve to, and delivers
    /// `matchmaker-matched` directly to each participant still connected.
    /// Offline participants are silently skipped — matchmaking makes no
    /// delivery guarantee beyond "was online at match time".
    pub async fn run_matchmaker_tick(&self) {
        for group in self.matchmaker.tick() {
            let match_id = match &self.matchmaker_match_module {
                Some(module) => self.match_registry.match_create(module, "{}").await.ok(),
                None => None,
            };
            if let Some(match_id) = &match_id {
                self.matched_tokens.insert(group.token.clone(), match_id.clone());
            }

            let users: Vec<MatchmakerUser> = group
                .tickets
                .iter()
                .map(|t| MatchmakerUser {
                    presence: UserPresence {
                        user_id: t.user_id.0,
                        session_id: t.session_id.0,
                        username: t.username.clone(),
                        persistence: false,
                    },
                    string_properties: t.string_properties.clone(),
                    numeric_properties: t.numeric_properties.clone(),
                })
                .collect();

            for (i, ticket) in group.tickets.iter().enumerate() {
                let Some(session) = self.registry.get(ticket.session_id) else {
                    continue;
                };
                let envelope = Envelope::new(Payload::MatchmakerMatched(MatchmakerMatched {
                    ticket_id: ticket.ticket_id.to_string(),
                    token: group.token.clone(),
                    users: users.clone(),
                    self_user: users[i].clone(),
                }));
                let _ = session.send(&envelope, true).await;
            }
        }
    }
}

/// Best-effort extraction of `collation_id` out of a frame that otherwise
/// failed to decode (spec §4.1: "echoing `collation-id` when parseable").
/// Only the JSON wire format is structured enough to salvage partially; a
/// malformed binary frame carries nothing worth picking through.
fn salvage_collation_id(bytes: &[u8], format: WireFormat) -> String {
    if format != WireFormat::Json {
        return String::new();
    }
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("collation_id").and_then(|c| c.as_str().map(str::to_owned)))
        .unwrap_or_default()
}

fn match_error_to_envelope(error: MatchError) -> ErrorPayload {
    match error {
        MatchError::ModuleNotFound(_) => ErrorPayload::new(ErrorCode::BadInput, error.to_string()),
        MatchError::InvalidTickRate(_) => ErrorPayload::new(ErrorCode::BadInput, error.to_string()),
        MatchError::InitFailed(_) => ErrorPayload::new(ErrorCode::RuntimeFunctionException, error.to_string()),
        MatchError::NotFound(_) => ErrorPayload::new(ErrorCode::MatchNotFound, error.to_string()),
        MatchError::Terminating(_) => ErrorPayload::new(ErrorCode::MatchNotFound, error.to_string()),
        MatchError::JoinRejected(_) => ErrorPayload::new(ErrorCode::MatchJoinRejected, error.to_string()),
    }
}

#[async_trait]
impl EnvelopeHandler for Pipeline {
    async fn handle(&self, session: Arc<WsSession>, envelope: Envelope, _reliable: bool) {
        let pipeline = self.self_arc();
        let session_handle: Arc<dyn SessionHandle> = session.clone();
        if let Some(reply) = pipeline.dispatch(session_handle, envelope).await {
            let _ = session.send(&reply, true).await;
        }
    }

    async fn handle_decode_error(&self, session: Arc<WsSession>, bytes: &[u8], error: CodecError) {
        warn!(session_id = %session.id(), %error, "undecodable frame");
        let collation_id = salvage_collation_id(bytes, session.format());
        let envelope = Envelope::error(
            collation_id,
            ErrorPayload::new(ErrorCode::UnrecognizedPayload, error.to_string()),
        );
        let _ = session.send(&envelope, true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nakama_core::Config;
    use nakama_match::{MatchContext, MatchHandlerRegistry, MatchInit, MatchState};
    use nakama_proto::{payload::Heartbeat, WireFormat};
    use nakama_session::{CloseReason, SessionError, SessionVars};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct FakeSession {
        id: SessionId,
        user_id: UserId,
        username: String,
        cancellation: CancellationToken,
        vars: SessionVars,
        received: Mutex<Vec<Envelope>>,
    }

    impl FakeSession {
        fn new(username: &str) -> Arc<Self> {
            Arc::new(Self {
                id: SessionId::new(),
                user_id: UserId::new(),
                username: username.to_string(),
                cancellation: CancellationToken::new(),
                vars: SessionVars::new(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionHandle for FakeSession {
        fn id(&self) -> SessionId {
            self.id
        }
        fn user_id(&self) -> UserId {
            self.user_id
        }
        fn username(&self) -> String {
            self.username.clone()
        }
        fn set_username(&self, _username: String) {}
        fn lang(&self) -> &str {
            "en"
        }
        fn format(&self) -> WireFormat {
            WireFormat::Json
        }
        fn expiry(&self) -> i64 {
            0
        }
        fn client_ip(&self) -> IpAddr {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        fn client_port(&self) -> u16 {
            0
        }
        fn vars(&self) -> &SessionVars {
            &self.vars
        }
        fn is_stopped(&self) -> bool {
            false
        }
        fn cancellation_token(&self) -> &CancellationToken {
            &self.cancellation
        }
        async fn send(&self, envelope: &Envelope, _reliable: bool) -> Result<(), SessionError> {
            self.received.lock().unwrap().push(envelope.clone());
            Ok(())
        }
        async fn send_raw(&self, _bytes: Vec<u8>, _reliable: bool) -> Result<(), SessionError> {
            Ok(())
        }
        async fn close(&self, _reason: CloseReason, _envelopes: Vec<Envelope>) {}
    }

    struct EchoHandler;

    #[async_trait]
    impl nakama_match::MatchHandler for EchoHandler {
        async fn match_init(&self, _ctx: &MatchContext, _params: &str) -> Result<MatchInit, MatchError> {
            Ok(MatchInit::new(json!({}), 10, "echo"))
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
            dispatcher: &nakama_match::Dispatcher,
            _tick: u64,
            state: MatchState,
            messages: Vec<MatchMessage>,
        ) -> Option<MatchState> {
            for m in messages {
                dispatcher.broadcast(m.op_code, &m.data, m.recipients.as_deref(), Some(&m.sender)).await;
            }
            Some(state)
        }
        async fn match_terminate(
            &self,
            _ctx: &MatchContext,
            _dispatcher: &nakama_match::Dispatcher,
            state: MatchState,
            _grace_seconds: u32,
        ) -> MatchState {
            state
        }
    }

    struct RejectJoinHook;

    #[async_trait]
    impl nakama_hooks::BeforeHook for RejectJoinHook {
        async fn before(
            &self,
            _ctx: &HookContext,
            _session: &dyn SessionHandle,
            _envelope: Envelope,
        ) -> Result<nakama_hooks::BeforeOutcome, ErrorPayload> {
            Err(ErrorPayload::new(ErrorCode::MatchJoinRejected, "rejected by hook"))
        }
    }

    fn test_pipeline(reject_join: bool) -> Arc<Pipeline> {
        let tracker = Arc::new(Tracker::new());
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(tracker.clone(), registry.clone()));
        let handlers = Arc::new(MatchHandlerRegistry::new());
        handlers.register("echo", Arc::new(EchoHandler));
        let config = Arc::new(Config::default());
        let match_registry = MatchRegistry::new(handlers, router.clone(), tracker.clone(), config.clone(), "test-node");
        let matchmaker = Matchmaker::new(1000);

        let mut hooks = HookPipeline::new();
        if reject_join {
            hooks.register_before(nakama_proto::PayloadTag::MatchJoin, Arc::new(RejectJoinHook));
        }

        Pipeline::new(PipelineDeps {
            node: Arc::from("test-node"),
            registry,
            tracker,
            router,
            match_registry,
            matchmaker,
            hooks: Arc::new(hooks),
            rpc: RpcRegistry::new(),
            persistence: Arc::new(NoopPersistence),
            notifications: Arc::new(NoopNotificationDelivery),
            metrics: Arc::new(NoopMetricsSink),
            matchmaker_match_module: Some("echo".to_string()),
        })
    }

    fn as_handle(session: &Arc<FakeSession>) -> Arc<dyn SessionHandle> {
        session.clone()
    }

    #[tokio::test]
    async fn direct_chat_delivers_to_recipient_and_acks_sender() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("alice");
        let b = FakeSession::new("bob");
        pipeline.registry.add(a.clone());
        pipeline.registry.add(b.clone());

        let join = |target: Uuid| {
            Envelope::new(Payload::ChannelJoin(ChannelJoin {
                target: target.to_string(),
                channel_type: ChannelJoinType::DirectMessage,
                persistence: true,
                hidden: false,
            }))
        };
        pipeline.dispatch(as_handle(&a), join(b.user_id().0)).await;
        pipeline.dispatch(as_handle(&b), join(a.user_id().0)).await;

        let channel_id = channel_id_for(&Stream::direct_chat(a.user_id().0, b.user_id().0));
        let send = Envelope::new(Payload::ChannelMessageSend(ChannelMessageSend {
            channel_id: channel_id.clone(),
            content: "hi".to_string(),
            persistent: true,
        }))
        .with_collation_id("c1");

        let ack = pipeline.dispatch(as_handle(&a), send).await.unwrap();
        assert_eq!(ack.collation_id, "c1");
        match ack.payload {
            Payload::ChannelMessage(m) => assert_eq!(m.content, "hi"),
            other => panic!("expected ack ChannelMessage, got {other:?}"),
        }

        let received = b.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        match &received[0].payload {
            Payload::ChannelMessage(m) => {
                assert_eq!(m.content, "hi");
                assert_eq!(m.sender.user_id, a.user_id().0);
            }
            other => panic!("expected ChannelMessage, got {other:?}"),
        }
        assert!(a.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn match_create_join_and_data_send_relay() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        let b = FakeSession::new("b");
        pipeline.registry.add(a.clone());
        pipeline.registry.add(b.clone());

        let create = Envelope::new(Payload::MatchCreate(MatchCreate {
            module: "echo".to_string(),
            params: "{}".to_string(),
        }));
        let created = pipeline.dispatch(as_handle(&a), create).await.unwrap();
        let match_id = match created.payload {
            Payload::Match(m) => m.match_id,
            other => panic!("expected Match, got {other:?}"),
        };

        let join = Envelope::new(Payload::MatchJoin(MatchJoin {
            target: MatchJoinTarget::MatchId(match_id.clone()),
            metadata: String::new(),
        }));
        let joined = pipeline.dispatch(as_handle(&b), join).await.unwrap();
        match joined.payload {
            Payload::Match(m) => assert_eq!(m.presences.len(), 1),
            other => panic!("expected Match, got {other:?}"),
        }

        let data = Envelope::new(Payload::MatchDataSend(MatchDataSend {
            match_id: match_id.clone(),
            op_code: 7,
            data: vec![0x01],
            reliable: true,
            presences: Vec::new(),
        }));
        let ack = pipeline.dispatch(as_handle(&b), data).await;
        assert!(ack.is_none());

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        let a_received = a.received.lock().unwrap();
        let saw_data = a_received.iter().any(|e| matches!(&e.payload, Payload::MatchData(d) if d.op_code == 7 && d.data == vec![0x01]));
        assert!(saw_data, "expected A to receive relayed match-data");
        let b_echoed = b.received.lock().unwrap().iter().any(|e| matches!(&e.payload, Payload::MatchData(_)));
        assert!(!b_echoed, "sender must not receive its own echo");
    }

    #[tokio::test]
    async fn hook_rejection_on_match_join_keeps_tracker_clean() {
        let pipeline = test_pipeline(true);
        let a = FakeSession::new("a");
        pipeline.registry.add(a.clone());

        let create = Envelope::new(Payload::MatchCreate(MatchCreate {
            module: "echo".to_string(),
            params: "{}".to_string(),
        }));
        let created = pipeline.dispatch(as_handle(&a), create).await.unwrap();
        let match_id = match created.payload {
            Payload::Match(m) => m.match_id,
            other => panic!("expected Match, got {other:?}"),
        };

        let join = Envelope::new(Payload::MatchJoin(MatchJoin {
            target: MatchJoinTarget::MatchId(match_id),
            metadata: String::new(),
        }))
        .with_collation_id("join-1");

        let response = pipeline.dispatch(as_handle(&a), join).await.unwrap();
        assert_eq!(response.collation_id, "join-1");
        match response.payload {
            Payload::Error(e) => assert_eq!(e.code, ErrorCode::MatchJoinRejected),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn matchmaker_pairing_emits_token_usable_for_match_join() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        let b = FakeSession::new("b");
        pipeline.registry.add(a.clone());
        pipeline.registry.add(b.clone());

        let add = |count: u32| {
            Envelope::new(Payload::MatchmakerAdd(MatchmakerAdd {
                min_count: count,
                max_count: count,
                count_multiple: 1,
                string_properties: std::collections::HashMap::from([("mode".to_string(), "1v1".to_string())]),
                numeric_properties: std::collections::HashMap::new(),
                query: "mode:1v1".to_string(),
            }))
        };
        pipeline.dispatch(as_handle(&a), add(2)).await;
        pipeline.dispatch(as_handle(&b), add(2)).await;

        pipeline.run_matchmaker_tick().await;

        let a_matched = a.received.lock().unwrap().iter().find_map(|e| match &e.payload {
            Payload::MatchmakerMatched(m) => Some(m.clone()),
            _ => None,
        });
        let matched = a_matched.expect("A should have received matchmaker-matched");
        assert_eq!(matched.users.len(), 2);

        let join = Envelope::new(Payload::MatchJoin(MatchJoin {
            target: MatchJoinTarget::Token(matched.token),
            metadata: String::new(),
        }));
        let joined = pipeline.dispatch(as_handle(&a), join).await.unwrap();
        assert!(matches!(joined.payload, Payload::Match(_)));
    }

    #[tokio::test]
    async fn match_data_recipient_filter_restricts_delivery() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        let b = FakeSession::new("b");
        let c = FakeSession::new("c");
        for s in [&a, &b, &c] {
            pipeline.registry.add(s.clone());
        }

        let created = pipeline
            .dispatch(
                as_handle(&a),
                Envelope::new(Payload::MatchCreate(MatchCreate { module: "echo".into(), params: "{}".into() })),
            )
            .await
            .unwrap();
        let match_id = match created.payload {
            Payload::Match(m) => m.match_id,
            other => panic!("expected Match, got {other:?}"),
        };
        for s in [&a, &b, &c] {
            pipeline
                .dispatch(
                    as_handle(s),
                    Envelope::new(Payload::MatchJoin(MatchJoin {
                        target: MatchJoinTarget::MatchId(match_id.clone()),
                        metadata: String::new(),
                    })),
                )
                .await;
        }
        for s in [&a, &b, &c] {
            s.received.lock().unwrap().clear();
        }

        let filtered = Envelope::new(Payload::MatchDataSend(MatchDataSend {
            match_id: match_id.clone(),
            op_code: 1,
            data: vec![9],
            reliable: true,
            presences: vec![presence_of(b.as_ref())],
        }));
        pipeline.dispatch(as_handle(&a), filtered).await;

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        assert!(a.received.lock().unwrap().iter().all(|e| !matches!(e.payload, Payload::MatchData(_))));
        assert!(b.received.lock().unwrap().iter().any(|e| matches!(e.payload, Payload::MatchData(_))));
        assert!(c.received.lock().unwrap().iter().all(|e| !matches!(e.payload, Payload::MatchData(_))));
    }

    #[tokio::test]
    async fn ping_gets_a_pong() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        pipeline.registry.add(a.clone());

        let reply = pipeline
            .dispatch(as_handle(&a), Envelope::new(Payload::Ping(Ping::default())).with_collation_id("p1"))
            .await
            .unwrap();
        assert_eq!(reply.collation_id, "p1");
        assert!(matches!(reply.payload, Payload::Pong(_)));
    }

    #[tokio::test]
    async fn cleanup_session_notifies_match_and_clears_tracker_and_registry() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        let b = FakeSession::new("b");
        pipeline.registry.add(a.clone());
        pipeline.registry.add(b.clone());

        let created = pipeline
            .dispatch(
                as_handle(&a),
                Envelope::new(Payload::MatchCreate(MatchCreate { module: "echo".into(), params: "{}".into() })),
            )
            .await
            .unwrap();
        let match_id = match created.payload {
            Payload::Match(m) => m.match_id,
            other => panic!("expected Match, got {other:?}"),
        };
        for s in [&a, &b] {
            pipeline
                .dispatch(
                    as_handle(s),
                    Envelope::new(Payload::MatchJoin(MatchJoin {
                        target: MatchJoinTarget::MatchId(match_id.clone()),
                        metadata: String::new(),
                    })),
                )
                .await;
        }
        a.received.lock().unwrap().clear();
        b.received.lock().unwrap().clear();

        pipeline.cleanup_session(b.id(), b.user_id()).await;

        assert!(pipeline.registry.get(b.id()).is_none());
        let remaining = pipeline
            .tracker
            .list_by_stream(&Stream::match_authoritative(match_id.parse::<MatchId>().unwrap().id), true, true);
        assert!(remaining.iter().all(|p| p.session_id != b.id()));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let saw_leave = a.received.lock().unwrap().iter().any(|e| {
            matches!(&e.payload, Payload::MatchPresenceEvent(ev) if !ev.leaves.is_empty())
        });
        assert!(saw_leave, "remaining member should see a leave presence event");
    }

    #[tokio::test]
    async fn server_only_payload_from_client_is_rejected() {
        let pipeline = test_pipeline(false);
        let a = FakeSession::new("a");
        pipeline.registry.add(a.clone());

        let reply = pipeline
            .dispatch(as_handle(&a), Envelope::new(Payload::Heartbeat(Heartbeat { server_time_ms: 0 })))
            .await;
        // Heartbeat is explicitly tolerated (a client might echo one back);
        // it should not error.
        assert!(reply.is_none());
    }

    #[test]
    fn salvage_collation_id_recovers_it_from_otherwise_bad_json() {
        let bytes = br#"{"collation_id":"c-9","payload":{"not_a_real_variant":{}}}"#;
        assert_eq!(salvage_collation_id(bytes, WireFormat::Json), "c-9");
    }

    #[test]
    fn salvage_collation_id_is_empty_for_unparseable_json() {
        assert_eq!(salvage_collation_id(b"not json at all", WireFormat::Json), "");
    }

    #[test]
    fn salvage_collation_id_never_attempted_for_binary() {
        let bytes = br#"{"collation_id":"c-9"}"#;
        assert_eq!(salvage_collation_id(bytes, WireFormat::Binary), "");
    }
}
