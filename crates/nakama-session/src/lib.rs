//! Transport session: one per client connection (spec §4.1). Owns the
//! socket, read/write deadlines, heartbeat timer, codec and outbound
//! mailbox. `WsSession` is the WebSocket-class implementation of the
//! [`SessionHandle`] capability set; a UDP-class implementation is a
//! documented extension point (spec §9) and is not implemented here.

pub mod accept;
pub mod close;
pub mod error;
pub mod handle;
pub mod handler;
pub mod ws;

pub use accept::{extract_bearer_token, AuthError, AuthProvider, AuthedUser, NoopAuthProvider};
pub use close::CloseReason;
pub use error::SessionError;
pub use handle::{SessionCore, SessionHandle, SessionVars};
pub use handler::EnvelopeHandler;
pub use nakama_core::SessionId;
pub use ws::WsSession;
