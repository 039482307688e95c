use std::sync::{Arc, RwLock};

use nakama_core::{MatchId, Stream};
use nakama_proto::payload::{MatchData, UserPresence};
use nakama_proto::{Envelope, Payload};
use nakama_router::{RecipientFilter, Router};
use tokio::sync::Mutex;

use crate::types::MatchPresence;

struct DeferredSend {
    op_code: i64,
    data: Vec<u8>,
    presences: Option<Vec<MatchPresence>>,
    sender: Option<MatchPresence>,
}

/// Passed to every tick (spec §4.5). `broadcast` fans out immediately via
/// the Router; `broadcast_deferred` queues for the runtime to flush once
/// `match_loop` returns, preserving "state first, message second"
/// atomicity. `match_kick` and `label_update` likewise stage their effect
/// for the runtime to apply at the next tick boundary / immediately,
/// respectively.
pub struct Dispatcher {
    router: Arc<Router>,
    stream: Stream,
    match_id: MatchId,
    label: Arc<RwLock<String>>,
    deferred: Mutex<Vec<DeferredSend>>,
    kicked: Mutex<Vec<MatchPresence>>,
}

impl Dispatcher {
    pub(crate) fn new(
        router: Arc<Router>,
        stream: Stream,
        match_id: MatchId,
        label: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            router,
            stream,
            match_id,
            label,
            deferred: Mutex::new(Vec::new()),
            kicked: Mutex::new(Vec::new()),
        }
    }

    fn envelope_for(&self, op_code: i64, data: &[u8], sender: Option<&MatchPresence>) -> Envelope {
        let presence = sender
            .map(|p| UserPresence {
                user_id: p.user_id.0,
                session_id: p.session_id.0,
                username: p.username.clone(),
                persistence: false,
            })
            .unwrap_or_else(|| UserPresence {
                user_id: uuid::Uuid::nil(),
                session_id: uuid::Uuid::nil(),
                username: String::new(),
                persistence: false,
            });
        Envelope::new(Payload::MatchData(MatchData {
            match_id: self.match_id.to_string(),
            presence,
            op_code,
            data: data.to_vec(),
        }))
    }

    /// Fan out to all current match members, or a subset when `presences`
    /// is given. `sender` annotates the envelope's `presence` field; when
    /// no explicit `presences` allow-list is given, the sender is also
    /// excluded from delivery (spec §8 scenario 2: a relayed sender never
    /// receives its own echo). An explicit `presences` list is authoritative
    /// — callers that want the sender included in a filtered broadcast can
    /// add it to that list themselves.
    pub async fn broadcast(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[MatchPresence]>,
        sender: Option<&MatchPresence>,
    ) {
        let envelope = self.envelope_for(op_code, data, sender);
        let filter = presences.map(|p| {
            RecipientFilter::new(p.iter().map(|mp| (mp.session_id, mp.user_id)))
        });
        let exclude = if presences.is_none() {
            sender.map(|s| s.session_id)
        } else {
            None
        };
        self.router
            .send(&self.stream, &envelope, true, filter.as_ref(), exclude)
            .await;
    }

    /// Queue a broadcast to be sent after the current tick's `match_loop`
    /// returns, so a crash partway through a tick can never leave a
    /// message sent without its corresponding state mutation applied.
    pub async fn broadcast_deferred(
        &self,
        op_code: i64,
        data: &[u8],
        presences: Option<&[MatchPresence]>,
        sender: Option<&MatchPresence>,
    ) {
        self.deferred.lock().await.push(DeferredSend {
            op_code,
            data: data.to_vec(),
            presences: presences.map(|p| p.to_vec()),
            sender: sender.cloned(),
        });
    }

    /// Mark presences to be untracked and synthesized as a leave on the
    /// next tick.
    pub async fn match_kick(&self, presences: &[MatchPresence]) {
        self.kicked.lock().await.extend_from_slice(presences);
    }

    /// Mutate the searchable label used by match listing. Effective
    /// immediately — unlike joins/leaves/messages, label changes have no
    /// tick-ordering requirement in spec §4.5.
    pub fn label_update(&self, label: impl Into<String>) {
        *self.label.write().unwrap() = label.into();
    }

    pub(crate) async fn take_deferred(&self) -> Vec<(i64, Vec<u8>, Option<Vec<MatchPresence>>, Option<MatchPresence>)> {
        let mut guard = self.deferred.lock().await;
        std::mem::take(&mut *guard)
            .into_iter()
            .map(|d| (d.op_code, d.data, d.presences, d.sender))
            .collect()
    }

    pub(crate) async fn take_kicked(&self) -> Vec<MatchPresence> {
        std::mem::take(&mut *self.kicked.lock().await)
    }

    pub(crate) async fn flush_deferred(&self) {
        for (op_code, data, presences, sender) in self.take_deferred().await {
            self.broadcast(op_code, &data, presences.as_deref(), sender.as_ref())
                .await;
        }
    }
}
