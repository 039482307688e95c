//! Process-wide index of live sessions (spec §4.2). Grounded on the
//! teacher's `SharedServer` (one `Arc`-wrapped shared state reachable from
//! every task) and on the Kaos match-handler reference's `DashMap`-backed
//! registries for the sharded-map technique itself.

use std::sync::Arc;

use dashmap::DashMap;
use nakama_core::{SessionId, UserId};
use nakama_proto::payload::Notification;
use nakama_proto::{Envelope, Payload};
use nakama_session::{CloseReason, SessionHandle};
use nakama_tracker::Tracker;

/// `session-id -> session`, O(1) lookup/insert/remove via `DashMap`'s
/// internal sharding (spec §5: "sharded lock-free map keyed by
/// session-id").
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, Arc<dyn SessionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<dyn SessionHandle>) {
        self.sessions.insert(session.id(), session);
    }

    /// Removes and returns the session, if present. Idempotent: a second
    /// call for the same id is a no-op returning `None`.
    pub fn remove(&self, session_id: SessionId) -> Option<Arc<dyn SessionHandle>> {
        self.sessions.remove(&session_id).map(|(_, s)| s)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<dyn SessionHandle>> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Iterate live sessions. A session removed mid-iteration may or may
    /// not be visited; one added mid-iteration is not required to be
    /// visited — the same weak guarantee `DashMap::iter` gives (spec §4.2).
    pub fn range(&self, mut f: impl FnMut(&Arc<dyn SessionHandle>)) {
        for entry in self.sessions.iter() {
            f(entry.value());
        }
    }

    /// Close a session with reason `disconnect`, optionally sending a
    /// persistent `banned` notification as the final frame first. The
    /// Registry does not record the ban itself — persistence is the
    /// database collaborator's concern (spec §4.2).
    pub async fn disconnect(&self, session_id: SessionId, ban: bool) {
        let Some(session) = self.get(session_id) else {
            return;
        };

        let envelopes = if ban {
            vec![Envelope::new(Payload::Notifications(
                nakama_proto::payload::Notifications {
                    notifications: vec![banned_notification()],
                },
            ))]
        } else {
            Vec::new()
        };

        let reason = if ban {
            CloseReason::Banned
        } else {
            CloseReason::Disconnect
        };

        session.close(reason, envelopes).await;
    }

    /// Single-socket policy (spec §4.2): enumerate all presences of
    /// `user_id` in the notifications stream on this node via the
    /// Tracker; for each session other than `current_session_id`, close it
    /// after best-effort delivering a `single_socket` notification.
    pub async fn single_session(&self, tracker: &Tracker, user_id: UserId, current_session_id: SessionId) {
        let stream = nakama_core::Stream::notifications(user_id.0);
        for presence in tracker.list_by_stream(&stream, true, true) {
            if presence.session_id == current_session_id {
                continue;
            }
            let Some(session) = self.get(presence.session_id) else {
                continue;
            };
            let envelope = Envelope::new(Payload::Notifications(
                nakama_proto::payload::Notifications {
                    notifications: vec![single_socket_notification()],
                },
            ));
            session.close(CloseReason::Disconnect, vec![envelope]).await;
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn single_socket_notification() -> Notification {
    Notification {
        id: uuid::Uuid::new_v4(),
        subject: "single_socket".to_string(),
        content: "{}".to_string(),
        code: -6,
        sender_id: None,
        create_time_ms: now_ms(),
        persistent: false,
    }
}

fn banned_notification() -> Notification {
    Notification {
        id: uuid::Uuid::new_v4(),
        subject: "banned".to_string(),
        content: "{}".to_string(),
        code: -7,
        sender_id: None,
        create_time_ms: now_ms(),
        persistent: true,
    }
}
