//! Fans an envelope out to a stream's current membership (spec §4.4). Pure
//! function over `&Tracker` + `&Registry`: no state of its own, the same
//! "resolve membership, then dispatch, skip what's gone" shape as the
//! teacher's `valence_network` client packet dispatch.

use std::collections::HashSet;

use nakama_core::{SessionId, Stream, UserId};
use nakama_proto::Envelope;
use nakama_registry::Registry;
use nakama_tracker::Tracker;

/// Optional allow-list used by match-data forwarding (spec §4.4). When
/// present, delivery is restricted to members whose `(session_id, user_id)`
/// pair appears in the filter.
#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    pairs: HashSet<(SessionId, UserId)>,
}

impl RecipientFilter {
    pub fn new(pairs: impl IntoIterator<Item = (SessionId, UserId)>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    fn allows(&self, session_id: SessionId, user_id: UserId) -> bool {
        self.pairs.contains(&(session_id, user_id))
    }
}

pub struct Router {
    tracker: std::sync::Arc<Tracker>,
    registry: std::sync::Arc<Registry>,
}

impl Router {
    pub fn new(tracker: std::sync::Arc<Tracker>, registry: std::sync::Arc<Registry>) -> Self {
        Self { tracker, registry }
    }

    /// Fan `envelope` out to `stream`'s current member set. Resolution is a
    /// fresh Tracker snapshot per call; no caching (spec §4.4). The
    /// `exclude` session, when given, is skipped — used for excluding the
    /// sender from its own data-send echoes. Returns the number of
    /// sessions the envelope was actually handed to (sends whose target
    /// session has since left the Registry are silently skipped, not
    /// counted as an error).
    pub async fn send(
        &self,
        stream: &Stream,
        envelope: &Envelope,
        reliable: bool,
        filter: Option<&RecipientFilter>,
        exclude: Option<SessionId>,
    ) -> usize {
        let members = self.tracker.list_by_stream(stream, true, true);
        let mut delivered = 0usize;

        for presence in members {
            if Some(presence.session_id) == exclude {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.allows(presence.session_id, presence.user_id) {
                    continue;
                }
            }
            let Some(session) = self.registry.get(presence.session_id) else {
                // Presence exists but the session was removed in the race
                // window described in spec §9; silently skip, no error.
                continue;
            };
            if session.send(envelope, reliable).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    session_id = %presence.session_id,
                    "router send failed, recipient continues to be independent of others"
                );
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use nakama_core::{PresenceMeta, StreamMode};
    use nakama_proto::Payload;
    use nakama_session::{CloseReason, SessionError, SessionHandle};
    use tokio_util::sync::CancellationToken;

    use super::*;

    struct FakeSession {
        id: SessionId,
        user_id: UserId,
        stopped: AtomicBool,
        cancellation: CancellationToken,
        received: Mutex<Vec<Envelope>>,
    }

    impl FakeSession {
        fn new(user_id: UserId) -> Arc<Self> {
            Arc::new(Self {
                id: SessionId::new(),
                user_id,
                stopped: AtomicBool::new(false),
                cancellation: CancellationToken::new(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionHandle for FakeSession {
        fn id(&self) -> SessionId {
            self.id
        }
        fn user_id(&self) -> UserId {
            self.user_id
        }
        fn username(&self) -> String {
            "fake".into()
        }
        fn set_username(&self, _username: String) {}
        fn lang(&self) -> &str {
            "en"
        }
        fn format(&self) -> nakama_proto::WireFormat {
            nakama_proto::WireFormat::Json
        }
        fn expiry(&self) -> i64 {
            0
        }
        fn client_ip(&self) -> IpAddr {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        fn client_port(&self) -> u16 {
            0
        }
        fn vars(&self) -> &std::collections::HashMap<String, String> {
            static EMPTY: std::sync::OnceLock<std::collections::HashMap<String, String>> =
                std::sync::OnceLock::new();
            EMPTY.get_or_init(std::collections::HashMap::new)
        }
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::Acquire)
        }
        fn cancellation_token(&self) -> &CancellationToken {
            &self.cancellation
        }
        async fn send(&self, envelope: &Envelope, _reliable: bool) -> Result<(), SessionError> {
            self.received.lock().unwrap().push(envelope.clone());
            Ok(())
        }
        async fn send_raw(&self, _bytes: Vec<u8>, _reliable: bool) -> Result<(), SessionError> {
            Ok(())
        }
        async fn close(&self, _reason: CloseReason, _envelopes: Vec<Envelope>) {
            self.stopped.store(true, Ordering::Release);
        }
    }

    fn sample_envelope() -> Envelope {
        Envelope::new(Payload::Ping(nakama_proto::payload::Ping::default()))
    }

    #[tokio::test]
    async fn send_reaches_every_member_except_excluded() {
        let tracker = Arc::new(Tracker::new());
        let registry = Arc::new(Registry::new());
        let router = Router::new(tracker.clone(), registry.clone());

        let stream = Stream::new(StreamMode::ChannelRoom).with_label("general");
        let a = FakeSession::new(UserId::new());
        let b = FakeSession::new(UserId::new());
        registry.add(a.clone());
        registry.add(b.clone());
        tracker.track(a.id(), stream.clone(), a.user_id(), PresenceMeta::new("a"));
        tracker.track(b.id(), stream.clone(), b.user_id(), PresenceMeta::new("b"));

        let delivered = router
            .send(&stream, &sample_envelope(), true, None, Some(a.id()))
            .await;

        assert_eq!(delivered, 1);
        assert!(a.received.lock().unwrap().is_empty());
        assert_eq!(b.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_skips_presence_whose_session_left_the_registry() {
        let tracker = Arc::new(Tracker::new());
        let registry = Arc::new(Registry::new());
        let router = Router::new(tracker.clone(), registry.clone());

        let stream = Stream::new(StreamMode::ChannelRoom).with_label("general");
        let a = FakeSession::new(UserId::new());
        tracker.track(a.id(), stream.clone(), a.user_id(), PresenceMeta::new("a"));
        // Deliberately not added to registry: simulates the race window
        // where presence exists but the session already unregistered.

        let delivered = router.send(&stream, &sample_envelope(), true, None, None).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn filter_restricts_delivery_to_allow_listed_pairs() {
        let tracker = Arc::new(Tracker::new());
        let registry = Arc::new(Registry::new());
        let router = Router::new(tracker.clone(), registry.clone());

        let stream = Stream::new(StreamMode::MatchAuthoritative);
        let a = FakeSession::new(UserId::new());
        let b = FakeSession::new(UserId::new());
        let c = FakeSession::new(UserId::new());
        for s in [&a, &b, &c] {
            registry.add(s.clone());
            tracker.track(s.id(), stream.clone(), s.user_id(), PresenceMeta::new("p"));
        }

        let filter = RecipientFilter::new([(b.id(), b.user_id())]);
        let delivered = router
            .send(&stream, &sample_envelope(), true, Some(&filter), Some(a.id()))
            .await;

        assert_eq!(delivered, 1);
        assert!(b.received.lock().unwrap().len() == 1);
        assert!(c.received.lock().unwrap().is_empty());
    }
}
