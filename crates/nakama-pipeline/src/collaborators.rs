//! External collaborator interfaces the core consumes but does not
//! implement (spec §6): auth token validation, message persistence and
//! offline notification delivery. The core itself persists no state
//! (spec §6); these traits are the seam a deployment plugs a real
//! database or auth provider into. `Noop*` implementations exist for
//! tests and the demo binary.

use async_trait::async_trait;
use nakama_core::UserId;
use nakama_proto::payload::{ChannelMessage, Notification};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("persistence collaborator failed: {0}")]
    Backend(String),
}

/// `persist_if_enabled(channel-id, message) -> err?` (spec §6), called
/// when an inbound chat message carries `persistent=true`.
#[async_trait]
pub trait MessagePersistence: Send + Sync + 'static {
    async fn persist_if_enabled(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), PersistenceError>;
}

pub struct NoopPersistence;

#[async_trait]
impl MessagePersistence for NoopPersistence {
    async fn persist_if_enabled(
        &self,
        _channel_id: &str,
        _message: &ChannelMessage,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// `enqueue(user-id, notifications[])` (spec §6), used for persistent
/// notifications while the target user is offline; an online user is
/// instead delivered directly via the Router.
#[async_trait]
pub trait NotificationDelivery: Send + Sync + 'static {
    async fn enqueue(&self, user_id: UserId, notifications: Vec<Notification>);
}

pub struct NoopNotificationDelivery;

#[async_trait]
impl NotificationDelivery for NoopNotificationDelivery {
    async fn enqueue(&self, _user_id: UserId, _notifications: Vec<Notification>) {}
}

/// Gauges for active sessions/matches/pending tickets, counters for
/// messages in/out and errors by code (spec §6). Plain `&self` methods,
/// not `async_trait`: a metrics backend never needs to await, matching
/// the teacher's preference for synchronous counter increments at hot
/// call sites. A deployment plugs in a Prometheus-backed implementation;
/// none is provided here (out of scope per Non-goals, but the seam itself
/// is ambient stack and is kept).
pub trait MetricsSink: Send + Sync + 'static {
    fn set_active_sessions(&self, count: usize);
    fn set_active_matches(&self, count: usize);
    fn set_pending_tickets(&self, count: usize);
    fn incr_messages_in(&self);
    fn incr_messages_out(&self);
    fn incr_error(&self, code: nakama_proto::ErrorCode);
}

pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn set_active_sessions(&self, _count: usize) {}
    fn set_active_matches(&self, _count: usize) {}
    fn set_pending_tickets(&self, _count: usize) {}
    fn incr_messages_in(&self) {}
    fn incr_messages_out(&self) {}
    fn incr_error(&self, _code: nakama_proto::ErrorCode) {}
}

/// Logs every call at `trace` level via `tracing`, the teacher's own
/// fallback when no real metrics backend is wired up.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn set_active_sessions(&self, count: usize) {
        tracing::trace!(count, "active_sessions");
    }
    fn set_active_matches(&self, count: usize) {
        tracing::trace!(count, "active_matches");
    }
    fn set_pending_tickets(&self, count: usize) {
        tracing::trace!(count, "pending_tickets");
    }
    fn incr_messages_in(&self) {
        tracing::trace!("messages_in");
    }
    fn incr_messages_out(&self) {
        tracing::trace!("messages_out");
    }
    fn incr_error(&self, code: nakama_proto::ErrorCode) {
        tracing::trace!(?code, "error");
    }
}
