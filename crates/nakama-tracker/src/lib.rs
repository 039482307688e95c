//! The node-local source of truth for "who is present in which streams"
//! (spec §4.3). Presences are ephemeral and never serialized to disk;
//! every operation here is synchronous and infallible from the caller's
//! perspective, the same contract the teacher's `SharedServer` state
//! gives its ECS resources.

use dashmap::DashMap;
use dashmap::DashSet;

use nakama_core::{Presence, PresenceMeta, SessionId, Stream, UserId};

/// Sharded map keyed by stream, mirroring the Registry's `DashMap`
/// sharding technique (grounded on the Kaos match-handler reference's
/// `DashMap`-backed registries) but nested one level so each stream's
/// membership can be listed as an independent snapshot without taking a
/// lock over the whole tracker.
#[derive(Default)]
pub struct Tracker {
    streams: DashMap<Stream, DashMap<SessionId, Presence>>,
    /// Reverse index so `untrack_all` doesn't have to scan every stream.
    by_session: DashMap<SessionId, DashSet<Stream>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the presence keyed by `(stream, session_id)`.
    /// Returns `true` iff this is a fresh insertion. A re-`track` with
    /// identical meta is a no-op on visible state but still returns
    /// `false` (it was already present).
    pub fn track(
        &self,
        session_id: SessionId,
        stream: Stream,
        user_id: UserId,
        meta: PresenceMeta,
    ) -> bool {
        let presence = Presence {
            stream: stream.clone(),
            session_id,
            user_id,
            meta,
        };

        let shard = self.streams.entry(stream.clone()).or_default();
        let fresh = !shard.contains_key(&session_id);
        shard.insert(session_id, presence);
        drop(shard);

        self.by_session
            .entry(session_id)
            .or_default()
            .insert(stream);

        fresh
    }

    pub fn untrack(&self, session_id: SessionId, stream: &Stream) {
        if let Some(shard) = self.streams.get(stream) {
            shard.remove(&session_id);
        }
        if let Some(streams) = self.by_session.get(&session_id) {
            streams.remove(stream);
        }
    }

    /// Remove every presence keyed by this session, across all streams.
    /// Called when a session closes (spec §4.1 close step (f)).
    pub fn untrack_all(&self, session_id: SessionId) {
        if let Some((_, streams)) = self.by_session.remove(&session_id) {
            for stream in streams.iter() {
                if let Some(shard) = self.streams.get(stream.key()) {
                    shard.remove(&session_id);
                }
            }
        }
    }

    /// Snapshot of presences on `stream` matching the visibility filter.
    /// Sorted by user-id ascending so a fixed tracker state yields a
    /// deterministic order across repeated calls (spec §4.3).
    pub fn list_by_stream(
        &self,
        stream: &Stream,
        include_hidden: bool,
        include_visible: bool,
    ) -> Vec<Presence> {
        let Some(shard) = self.streams.get(stream) else {
            return Vec::new();
        };
        let mut out: Vec<Presence> = shard
            .iter()
            .map(|e| e.value().clone())
            .filter(|p| {
                if p.meta.hidden {
                    include_hidden
                } else {
                    include_visible
                }
            })
            .collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    pub fn list_local_session_ids_by_stream(&self, stream: &Stream) -> Vec<SessionId> {
        let Some(shard) = self.streams.get(stream) else {
            return Vec::new();
        };
        shard.iter().map(|e| *e.key()).collect()
    }

    pub fn count_by_stream(&self, stream: &Stream) -> usize {
        self.streams.get(stream).map(|s| s.len()).unwrap_or(0)
    }

    /// Every `(stream, presence)` this session currently holds. Used by
    /// `close()`'s step (g): notify matches the session was joined to.
    pub fn streams_for_session(&self, session_id: SessionId) -> Vec<Stream> {
        self.by_session
            .get(&session_id)
            .map(|s| s.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default()
    }
}
