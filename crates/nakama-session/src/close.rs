/// Why a session was closed. Carried through to logging and to the
/// `disconnect`/`ban` notification envelopes that the Registry's
/// single-socket policy sends as a final frame before closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the connection dropped.
    ClientClosed,
    /// A read/write error that isn't a normal close (oversized frame,
    /// decode failure repeated, I/O error).
    TransportError,
    /// The read deadline lapsed without a pong.
    HeartbeatTimeout,
    /// `Registry::disconnect` or the single-socket policy forced this
    /// session closed to make room for a newer one.
    Disconnect,
    /// `Registry::disconnect(.., ban = true)`.
    Banned,
    /// Graceful server shutdown.
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::Disconnect => "disconnect",
            CloseReason::Banned => "banned",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }
}
