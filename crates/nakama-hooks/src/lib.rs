//! Before/after hook registry wrapping envelope dispatch (spec §4.7, §9:
//! "ordered pairs of (before, after) functions keyed by message name...a
//! registry from payload-tag enum to optional function pointers, looked
//! up in O(1) at dispatch"). Kept as its own crate so the Pipeline can
//! depend on it without every hook author also depending on the
//! handler/match/matchmaker crates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nakama_proto::{Envelope, ErrorPayload, PayloadTag};
use nakama_session::SessionHandle;

/// Minimal per-dispatch context passed to hooks. `node` identifies which
/// process is running the hook, useful for hooks that log or attribute
/// metrics; request-scoped values beyond that belong in the envelope or
/// session itself, not bolted onto this struct.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub node: Arc<str>,
}

impl HookContext {
    pub fn new(node: impl Into<Arc<str>>) -> Self {
        Self { node: node.into() }
    }
}

/// What a before-hook decided about the envelope it inspected.
pub enum BeforeOutcome {
    /// Dispatch continues with this envelope (unchanged or replaced).
    Continue(Envelope),
    /// Dispatch is silently cancelled; no error is sent to the client.
    Drop,
}

#[async_trait]
pub trait BeforeHook: Send + Sync + 'static {
    async fn before(
        &self,
        ctx: &HookContext,
        session: &dyn SessionHandle,
        envelope: Envelope,
    ) -> Result<BeforeOutcome, ErrorPayload>;
}

/// Outcome handed to an after-hook: whether the handler itself succeeded,
/// and with what error if not. After-hooks never affect what's sent to
/// the client; they run once dispatch has already completed.
pub enum HandlerResult {
    Ok,
    Err(ErrorPayload),
}

#[async_trait]
pub trait AfterHook: Send + Sync + 'static {
    async fn after(
        &self,
        ctx: &HookContext,
        session: &dyn SessionHandle,
        envelope: &Envelope,
        result: &HandlerResult,
    );
}

/// Registry of before/after hooks keyed by payload tag, built once at
/// startup and shared read-only thereafter (spec §9: "looked up in O(1)
/// at dispatch"). A plain `HashMap` is enough: hooks are registered
/// before the server starts accepting connections and never mutated
/// concurrently with lookups.
#[derive(Default)]
pub struct HookPipeline {
    before: HashMap<PayloadTag, Arc<dyn BeforeHook>>,
    after: HashMap<PayloadTag, Arc<dyn AfterHook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self {
            before: HashMap::new(),
            after: HashMap::new(),
        }
    }

    pub fn register_before(&mut self, tag: PayloadTag, hook: Arc<dyn BeforeHook>) {
        self.before.insert(tag, hook);
    }

    pub fn register_after(&mut self, tag: PayloadTag, hook: Arc<dyn AfterHook>) {
        self.after.insert(tag, hook);
    }

    /// Runs the before-hook registered for `envelope`'s tag, if any.
    /// `Ok(None)` means drop silently; `Ok(Some(envelope'))` means
    /// continue dispatch with that envelope (pass-through unmodified if
    /// no hook is registered for this tag).
    pub async fn run_before(
        &self,
        ctx: &HookContext,
        session: &dyn SessionHandle,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, ErrorPayload> {
        let tag = envelope.payload.tag();
        match self.before.get(&tag) {
            Some(hook) => match hook.before(ctx, session, envelope).await? {
                BeforeOutcome::Continue(envelope) => Ok(Some(envelope)),
                BeforeOutcome::Drop => Ok(None),
            },
            None => Ok(Some(envelope)),
        }
    }

    /// Runs the after-hook registered for `envelope`'s tag, if any,
    /// asynchronously (spec: "runs asynchronously after the handler
    /// returns"). Errors inside the hook are logged only and never
    /// surface to the caller or the client.
    pub fn run_after(
        self: &Arc<Self>,
        ctx: HookContext,
        session: Arc<dyn SessionHandle>,
        envelope: Envelope,
        result: HandlerResult,
    ) {
        let tag = envelope.payload.tag();
        let Some(hook) = self.after.get(&tag).cloned() else {
            return;
        };
        tokio::spawn(async move {
            hook.after(&ctx, session.as_ref(), &envelope, &result).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nakama_core::{SessionId, UserId};
    use nakama_proto::payload::ChannelLeave;
    use nakama_proto::{ErrorCode, Payload, WireFormat};
    use nakama_session::{CloseReason, SessionError, SessionVars};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FakeSession {
        id: SessionId,
        user_id: UserId,
        cancellation: CancellationToken,
        vars: SessionVars,
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
            "fake".to_string()
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
        async fn send(&self, _envelope: &Envelope, _reliable: bool) -> Result<(), SessionError> {
            Ok(())
        }
        async fn send_raw(&self, _bytes: Vec<u8>, _reliable: bool) -> Result<(), SessionError> {
            Ok(())
        }
        async fn close(&self, _reason: CloseReason, _envelopes: Vec<Envelope>) {}
    }

    fn fake_session() -> FakeSession {
        FakeSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            cancellation: CancellationToken::new(),
            vars: SessionVars::new(),
        }
    }

    fn leave_envelope() -> Envelope {
        Envelope::new(Payload::ChannelLeave(ChannelLeave {
            channel_id: "c1".to_string(),
        }))
    }

    struct RejectHook;

    #[async_trait]
    impl BeforeHook for RejectHook {
        async fn before(
            &self,
            _ctx: &HookContext,
            _session: &dyn SessionHandle,
            _envelope: Envelope,
        ) -> Result<BeforeOutcome, ErrorPayload> {
            Err(ErrorPayload::new(ErrorCode::MatchJoinRejected, "rejected by hook"))
        }
    }

    struct DropHook;

    #[async_trait]
    impl BeforeHook for DropHook {
        async fn before(
            &self,
            _ctx: &HookContext,
            _session: &dyn SessionHandle,
            _envelope: Envelope,
        ) -> Result<BeforeOutcome, ErrorPayload> {
            Ok(BeforeOutcome::Drop)
        }
    }

    struct RewriteHook;

    #[async_trait]
    impl BeforeHook for RewriteHook {
        async fn before(
            &self,
            _ctx: &HookContext,
            _session: &dyn SessionHandle,
            _envelope: Envelope,
        ) -> Result<BeforeOutcome, ErrorPayload> {
            Ok(BeforeOutcome::Continue(Envelope::new(Payload::ChannelLeave(
                ChannelLeave { channel_id: "rewritten".to_string() },
            ))))
        }
    }

    #[tokio::test]
    async fn no_hook_registered_passes_envelope_through_unchanged() {
        let pipeline = HookPipeline::new();
        let ctx = HookContext::new("node-a");
        let session = fake_session();

        let result = pipeline.run_before(&ctx, &session, leave_envelope()).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn before_hook_error_is_surfaced_with_its_code() {
        let mut pipeline = HookPipeline::new();
        pipeline.register_before(PayloadTag::ChannelLeave, Arc::new(RejectHook));
        let ctx = HookContext::new("node-a");
        let session = fake_session();

        let err = pipeline
            .run_before(&ctx, &session, leave_envelope())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MatchJoinRejected);
    }

    #[tokio::test]
    async fn before_hook_drop_yields_none_with_no_error() {
        let mut pipeline = HookPipeline::new();
        pipeline.register_before(PayloadTag::ChannelLeave, Arc::new(DropHook));
        let ctx = HookContext::new("node-a");
        let session = fake_session();

        let result = pipeline.run_before(&ctx, &session, leave_envelope()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn before_hook_can_replace_the_envelope() {
        let mut pipeline = HookPipeline::new();
        pipeline.register_before(PayloadTag::ChannelLeave, Arc::new(RewriteHook));
        let ctx = HookContext::new("node-a");
        let session = fake_session();

        let result = pipeline.run_before(&ctx, &session, leave_envelope()).await.unwrap().unwrap();
        match result.payload {
            Payload::ChannelLeave(leave) => assert_eq!(leave.channel_id, "rewritten"),
            _ => panic!("expected ChannelLeave"),
        }
    }

    struct CountingAfterHook(Arc<AtomicUsize>);

    #[async_trait]
    impl AfterHook for CountingAfterHook {
        async fn after(
            &self,
            _ctx: &HookContext,
            _session: &dyn SessionHandle,
            _envelope: &Envelope,
            _result: &HandlerResult,
        ) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn after_hook_runs_asynchronously_and_does_not_block_dispatch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HookPipeline::new();
        pipeline.register_after(PayloadTag::ChannelLeave, Arc::new(CountingAfterHook(counter.clone())));
        let pipeline = Arc::new(pipeline);

        let ctx = HookContext::new("node-a");
        let session: Arc<dyn SessionHandle> = Arc::new(fake_session());
        pipeline.run_after(ctx, session, leave_envelope(), HandlerResult::Ok);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
