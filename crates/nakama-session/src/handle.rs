use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use nakama_core::{SessionId, UserId};
use nakama_proto::{Envelope, WireFormat};
use tokio_util::sync::CancellationToken;

use crate::close::CloseReason;
use crate::error::SessionError;

/// Small string map captured at login (handshake query params / token
/// claims). Immutable for the session's lifetime.
pub type SessionVars = HashMap<String, String>;

/// The flattened `Session` capability set from the design notes: one trait,
/// two concrete implementations (WebSocket-class here; a UDP-class variant
/// is left as an extension point per spec §9 and is not implemented).
///
/// `send`/`send_raw`/`close` must be usable concurrently with each other
/// and with a live `consume` reader loop.
#[async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    fn id(&self) -> SessionId;
    fn user_id(&self) -> UserId;
    fn username(&self) -> String;
    fn set_username(&self, username: String);
    fn lang(&self) -> &str;
    fn format(&self) -> WireFormat;
    /// Unix seconds at which the session's token expires.
    fn expiry(&self) -> i64;
    fn client_ip(&self) -> IpAddr;
    fn client_port(&self) -> u16;
    fn vars(&self) -> &SessionVars;
    fn is_stopped(&self) -> bool;
    /// Canceled when `close` commits. Handlers processing on behalf of this
    /// session should honor it for long-running work.
    fn cancellation_token(&self) -> &CancellationToken;

    /// Encode `envelope` per this session's wire format and enqueue it on
    /// the outbound mailbox. For the WebSocket-class transport `reliable`
    /// is accepted but ignored: all delivery is reliable.
    async fn send(&self, envelope: &Envelope, reliable: bool) -> Result<(), SessionError>;

    /// Enqueue pre-encoded bytes directly, bypassing the codec. Used when
    /// the caller already has a wire-format-correct payload (e.g. the
    /// Stream Router re-delivering a message built once for many
    /// recipients who all share the sender's format would still need a
    /// per-recipient encode if formats differ; this escape hatch exists
    /// for same-format fan-out).
    async fn send_raw(&self, bytes: Vec<u8>, reliable: bool) -> Result<(), SessionError>;

    /// Idempotent. Flips the stopped flag, best-effort sends `envelopes`,
    /// writes a protocol close frame, cancels the session's token. Does
    /// NOT touch the Registry/Tracker/match membership — that cross-cutting
    /// cleanup is the caller's responsibility once `consume` returns (see
    /// crate docs), to avoid a dependency cycle between this crate and the
    /// Registry/Tracker/Match crates that sit above it.
    async fn close(&self, reason: CloseReason, envelopes: Vec<Envelope>);
}

/// Fields shared by every `SessionHandle` implementation. Embedded in
/// concrete types rather than re-declared, the way the teacher's
/// `SharedServer` factors common state out of per-connection specifics.
pub struct SessionCore {
    id: SessionId,
    user_id: UserId,
    username: RwLock<String>,
    lang: String,
    format: WireFormat,
    expiry: i64,
    client_ip: IpAddr,
    client_port: u16,
    vars: SessionVars,
    stopped: AtomicBool,
    cancellation: CancellationToken,
}

impl SessionCore {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        username: String,
        lang: String,
        format: WireFormat,
        expiry: i64,
        client_ip: IpAddr,
        client_port: u16,
        vars: SessionVars,
    ) -> Self {
        Self {
            id,
            user_id,
            username: RwLock::new(username),
            lang,
            format,
            expiry,
            client_ip,
            client_port,
            vars,
            stopped: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> String {
        self.username.read().unwrap().clone()
    }

    pub fn set_username(&self, username: String) {
        *self.username.write().unwrap() = username;
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    pub fn vars(&self) -> &SessionVars {
        &self.vars
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Flip the stopped flag. Returns `true` iff this call committed the
    /// flip (the close-lock from spec §5: exactly one caller observes
    /// `true`, every other concurrent/later caller observes `false` and
    /// must treat `close` as already having run).
    pub fn commit_close(&self) -> bool {
        self.stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
