use std::sync::Arc;

use async_trait::async_trait;
use nakama_proto::Envelope;

use crate::ws::WsSession;

/// Implemented by the Pipeline crate. `consume` forwards each decoded
/// envelope here; handlers are synchronous with respect to the session's
/// reader and must not block indefinitely (spec §4.7) — anything that
/// needs real work hands off to a dedicated task.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    async fn handle(&self, session: Arc<WsSession>, envelope: Envelope, reliable: bool);

    /// Called once a decode failure occurs. `bytes` is the raw frame that
    /// failed to decode, handed over so an implementation can attempt to
    /// salvage a `collation_id` out of it (spec §4.1: "send an
    /// `UNRECOGNIZED_PAYLOAD` error (echoing `collation-id` when
    /// parseable)"). The default only logs and sends nothing; `Pipeline`
    /// overrides this to actually reply.
    async fn handle_decode_error(
        &self,
        session: Arc<WsSession>,
        bytes: &[u8],
        error: nakama_proto::CodecError,
    ) {
        let _ = bytes;
        tracing::debug!(session_id = %session.id(), %error, "dropping undecodable frame");
    }
}
