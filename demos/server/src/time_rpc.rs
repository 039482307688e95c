//! Demo `rpc(id="time")` handler: returns the server's current time as a
//! JSON string. Registered so the accept loop exercises the generic RPC
//! path end to end without needing a real game-specific function.

use async_trait::async_trait;
use nakama_pipeline::RpcHandler;
use nakama_proto::ErrorPayload;
use nakama_session::SessionHandle;

pub struct TimeRpc;

#[async_trait]
impl RpcHandler for TimeRpc {
    async fn call(&self, _session: &dyn SessionHandle, _payload: &str) -> Result<String, ErrorPayload> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(serde_json::json!({ "server_time_ms": now_ms }).to_string())
    }
}
