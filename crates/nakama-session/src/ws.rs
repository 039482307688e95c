use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nakama_core::{Config, SessionId, UserId};
use nakama_proto::{codec, Envelope, WireFormat};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::close::CloseReason;
use crate::error::SessionError;
use crate::handle::{SessionCore, SessionHandle, SessionVars};
use crate::handler::EnvelopeHandler;

const MAILBOX_CAPACITY: usize = 1024;

enum OutMsg {
    Ws(Message),
    Close(Vec<u8>),
}

/// WebSocket-class implementation of [`SessionHandle`]. One instance owns
/// one accepted connection; the reader, writer and heartbeat tasks it
/// spawns from [`WsSession::run`] are this session's entire concurrency
/// footprint, mirroring the one-task-per-connection model in the teacher's
/// `valence_network::connect`/`packet_io` (reader task) generalized to add
/// a dedicated writer task and heartbeat task per spec §4.1.
pub struct WsSession {
    core: SessionCore,
    mailbox: mpsc::Sender<OutMsg>,
}

impl WsSession {
    fn new(core: SessionCore, mailbox: mpsc::Sender<OutMsg>) -> Arc<Self> {
        Arc::new(Self { core, mailbox })
    }

    /// Accept one connection's handshake data and drive its lifetime to
    /// completion: spawns reader/writer/heartbeat tasks, runs them until
    /// the session closes, then returns. Cross-cutting cleanup (Registry
    /// removal, Tracker untrack-all, match leave notification) is the
    /// caller's responsibility once this returns — see crate docs.
    ///
    /// `on_connected` fires once, synchronously, after the mailbox and
    /// background tasks exist but before any inbound frame is read: a
    /// caller registers the session (Registry, single-socket policy,
    /// `Notifications` stream join) from there so the session is
    /// addressable before its first message can possibly arrive.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        stream: WebSocketStream<TcpStream>,
        id: SessionId,
        user_id: UserId,
        username: String,
        lang: String,
        format: WireFormat,
        expiry: i64,
        client_ip: IpAddr,
        client_port: u16,
        vars: SessionVars,
        config: Arc<Config>,
        handler: Arc<dyn EnvelopeHandler>,
        on_connected: impl FnOnce(Arc<Self>) + Send,
    ) -> Arc<Self> {
        let core = SessionCore::new(
            id, user_id, username, lang, format, expiry, client_ip, client_port, vars,
        );
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let session = Self::new(core, tx);

        let (sink, stream) = stream.split();

        let writer = tokio::spawn(run_writer(
            sink,
            rx,
            Duration::from_millis(config.socket.write_wait_ms),
        ));

        let heartbeat_session = session.clone();
        let heartbeat = tokio::spawn(run_heartbeat(
            heartbeat_session,
            Duration::from_millis(config.socket.ping_period_ms),
        ));

        on_connected(session.clone());

        let reader_session = session.clone();
        run_reader(
            reader_session,
            stream,
            handler,
            Duration::from_millis(config.socket.pong_wait_ms),
            config.socket.max_message_size_bytes,
        )
        .await;

        heartbeat.abort();
        session.close(CloseReason::ClientClosed, Vec::new()).await;
        let _ = writer.await;

        session
    }
}

#[async_trait]
impl SessionHandle for WsSession {
    fn id(&self) -> SessionId {
        self.core.id()
    }

    fn user_id(&self) -> UserId {
        self.core.user_id()
    }

    fn username(&self) -> String {
        self.core.username()
    }

    fn set_username(&self, username: String) {
        self.core.set_username(username)
    }

    fn lang(&self) -> &str {
        self.core.lang()
    }

    fn format(&self) -> WireFormat {
        self.core.format()
    }

    fn expiry(&self) -> i64 {
        self.core.expiry()
    }

    fn client_ip(&self) -> IpAddr {
        self.core.client_ip()
    }

    fn client_port(&self) -> u16 {
        self.core.client_port()
    }

    fn vars(&self) -> &SessionVars {
        self.core.vars()
    }

    fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    fn cancellation_token(&self) -> &tokio_util::sync::CancellationToken {
        self.core.cancellation_token()
    }

    async fn send(&self, envelope: &Envelope, reliable: bool) -> Result<(), SessionError> {
        let bytes = codec::encode(envelope, self.core.format())?;
        self.send_raw(bytes, reliable).await
    }

    async fn send_raw(&self, bytes: Vec<u8>, _reliable: bool) -> Result<(), SessionError> {
        if self.core.is_stopped() {
            return Err(SessionError::Closed);
        }
        let msg = match self.core.format() {
            WireFormat::Json => Message::Text(String::from_utf8_lossy(&bytes).into_owned()),
            WireFormat::Binary => Message::Binary(bytes),
        };
        self.mailbox
            .send(OutMsg::Ws(msg))
            .await
            .map_err(|_| SessionError::Closed)
    }

    async fn close(&self, reason: CloseReason, envelopes: Vec<Envelope>) {
        if !self.core.commit_close() {
            // Another caller already committed the close; idempotent no-op
            // per spec §4.1 and §8 (N invocations produce exactly one
            // unregistration and one protocol close frame).
            return;
        }

        trace!(session_id = %self.id(), reason = reason.as_str(), "closing session");

        for envelope in envelopes {
            if let Ok(bytes) = codec::encode(&envelope, self.core.format()) {
                let msg = match self.core.format() {
                    WireFormat::Json => Message::Text(String::from_utf8_lossy(&bytes).into_owned()),
                    WireFormat::Binary => Message::Binary(bytes),
                };
                let _ = self.mailbox.try_send(OutMsg::Ws(msg));
            }
        }

        let _ = self
            .mailbox
            .try_send(OutMsg::Close(reason.as_str().as_bytes().to_vec()));

        self.core.cancellation_token().cancel();
    }
}

async fn run_writer(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<OutMsg>,
    write_wait: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let result = match msg {
            OutMsg::Ws(m) => tokio::time::timeout(write_wait, sink.send(m)).await,
            OutMsg::Close(reason) => {
                let frame = Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: String::from_utf8_lossy(&reason).into_owned().into(),
                }));
                let r = tokio::time::timeout(write_wait, sink.send(frame)).await;
                let _ = tokio::time::timeout(write_wait, sink.close()).await;
                r
            }
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%e, "write failed, session continues unless reads also fail");
            }
            Err(_) => {
                debug!("write deadline exceeded");
            }
        }
    }
}

async fn run_heartbeat(session: Arc<WsSession>, ping_period: Duration) {
    let mut interval = tokio::time::interval(ping_period);
    interval.tick().await; // first tick fires immediately; consume it as "send one ping at start"

    loop {
        interval.tick().await;

        if session.is_stopped() {
            return;
        }

        if session.mailbox.send(OutMsg::Ws(Message::Ping(Vec::new()))).await.is_err() {
            return;
        }

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let heartbeat = Envelope::new(nakama_proto::Payload::Heartbeat(
            nakama_proto::payload::Heartbeat {
                server_time_ms: now_ms,
            },
        ));

        // A heartbeat application-level envelope failing to send is logged
        // but not fatal, per spec §4.1; only ping (protocol-level) failure
        // triggers cleanup, handled above via the mailbox-closed check.
        if session.send(&heartbeat, true).await.is_err() {
            warn!(session_id = %session.id(), "failed to enqueue heartbeat envelope");
        }
    }
}

async fn run_reader(
    session: Arc<WsSession>,
    mut stream: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    handler: Arc<dyn EnvelopeHandler>,
    pong_wait: Duration,
    max_message_size_bytes: usize,
) {
    loop {
        // Recomputed every iteration rather than tracked across pongs: any
        // frame arriving (not only a pong) pushes the deadline out, which
        // is a superset of "extend on pong" and keeps the loop simple.
        let deadline = Instant::now() + pong_wait;

        let next = tokio::select! {
            item = stream.next() => item,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(session_id = %session.id(), "read deadline lapsed without a pong");
                session.close(CloseReason::HeartbeatTimeout, Vec::new()).await;
                return;
            }
        };

        let Some(frame) = next else {
            // Stream ended: normal close or disconnect.
            return;
        };

        let msg = match frame {
            Ok(m) => m,
            Err(e) => {
                debug!(session_id = %session.id(), %e, "read error, closing");
                session.close(CloseReason::TransportError, Vec::new()).await;
                return;
            }
        };

        match msg {
            Message::Pong(_) => {
                continue;
            }
            Message::Ping(_) => {
                // tokio-tungstenite answers protocol-level pings automatically.
                continue;
            }
            Message::Close(_) => {
                return;
            }
            Message::Text(text) => {
                if text.len() > max_message_size_bytes {
                    session.close(CloseReason::TransportError, Vec::new()).await;
                    return;
                }
                dispatch_bytes(&session, text.as_bytes(), &*handler).await;
            }
            Message::Binary(bytes) => {
                if bytes.len() > max_message_size_bytes {
                    session.close(CloseReason::TransportError, Vec::new()).await;
                    return;
                }
                dispatch_bytes(&session, &bytes, &*handler).await;
            }
            Message::Frame(_) => {}
        }
    }
}

async fn dispatch_bytes(session: &Arc<WsSession>, bytes: &[u8], handler: &dyn EnvelopeHandler) {
    match codec::decode(bytes, session.format()) {
        Ok(envelope) => handler.handle(session.clone(), envelope, true).await,
        Err(e) => handler.handle_decode_error(session.clone(), bytes, e).await,
    }
}
