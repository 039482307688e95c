//! The generic `rpc(id, payload)` endpoint (spec §4.7): dispatches to a
//! registered handler by id and returns its string result, with handler
//! errors mapped to typed envelope errors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nakama_proto::{ErrorCode, ErrorPayload};
use nakama_session::SessionHandle;

#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn call(&self, session: &dyn SessionHandle, payload: &str) -> Result<String, ErrorPayload>;
}

/// `id -> handler`, built once at startup (same shape as
/// [`nakama_match::MatchHandlerRegistry`]).
#[derive(Default)]
pub struct RpcRegistry {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(id.into(), handler);
    }

    pub async fn call(
        &self,
        id: &str,
        session: &dyn SessionHandle,
        payload: &str,
    ) -> Result<String, ErrorPayload> {
        let handler = self.handlers.get(id).ok_or_else(|| {
            ErrorPayload::new(
                ErrorCode::RuntimeFunctionNotFound,
                format!("no rpc handler registered for id {id:?}"),
            )
        })?;
        handler.call(session, payload).await.map_err(|e| {
            if e.code == ErrorCode::RuntimeFunctionNotFound || e.code == ErrorCode::RuntimeFunctionException {
                e
            } else {
                ErrorPayload::new(ErrorCode::RuntimeFunctionException, e.message)
            }
        })
    }
}
