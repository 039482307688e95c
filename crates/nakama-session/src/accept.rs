//! Handshake-time collaborator interface and helpers (spec §6 "Auth").
//! Token validation is the caller's concern the same way `persist_if_enabled`
//! and `enqueue` are in `nakama-pipeline::collaborators`; this crate only
//! defines the seam and the bearer-token extraction helper a WS accept loop
//! needs, mirroring the teacher's own login step in `connect.rs` (there a
//! Mojang session-server call, here an arbitrary token backend).

use async_trait::async_trait;
use nakama_core::UserId;
use tokio_tungstenite::tungstenite::http::Request;

use crate::handle::SessionVars;

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: UserId,
    pub username: String,
    pub vars: SessionVars,
    pub expiry: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// `validate(token) -> (user-id, username, vars, expiry) | err` (spec §6).
/// Invoked once per accepted connection, before a [`crate::WsSession`] is
/// constructed.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn validate(&self, token: &str) -> Result<AuthedUser, AuthError>;
}

/// Derives a stable [`UserId`] from the token itself via UUIDv5 instead of
/// checking it against any backend. Exists for the demo binary and tests;
/// a real deployment plugs in a provider backed by its own account store.
pub struct NoopAuthProvider {
    token_expiry_sec: i64,
}

impl NoopAuthProvider {
    pub fn new(token_expiry_sec: u64) -> Self {
        Self {
            token_expiry_sec: token_expiry_sec as i64,
        }
    }
}

#[async_trait]
impl AuthProvider for NoopAuthProvider {
    async fn validate(&self, token: &str) -> Result<AuthedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user_id = UserId(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, token.as_bytes()));
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(AuthedUser {
            user_id,
            username: token.to_string(),
            vars: SessionVars::new(),
            expiry: now + self.token_expiry_sec,
        })
    }
}

/// Reads a `Bearer <token>` value out of the WS upgrade request's
/// `authorization` header, the same place `iwismer-rusty-timer`'s
/// `ws_common::extract_token_from_headers` looks, generalized from axum's
/// `HeaderMap` to the raw `http::Request` `tokio-tungstenite`'s handshake
/// callback hands back.
pub fn extract_bearer_token<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}
