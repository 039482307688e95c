use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use nakama_core::{Config, MatchId, Stream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::handler::MatchHandler;
use crate::types::{MatchContext, MatchMessage, MatchPresence};

/// Commands the rest of the core hands to a running match's tick task.
/// Everything except `JoinAttempt` is fire-and-forget; `JoinAttempt`
/// round-trips a decision because the caller (Pipeline) must reply to the
/// joining client synchronously.
pub enum Inbound {
    JoinAttempt {
        presence: MatchPresence,
        metadata: String,
        respond: oneshot::Sender<Result<(), String>>,
    },
    Leave {
        presence: MatchPresence,
    },
    Data {
        message: MatchMessage,
    },
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLifecycle {
    Init,
    Active,
    Terminating,
    Dead,
}

/// What the Registry keeps for a live match: everything needed to route
/// inbound traffic to its tick task and to list it, without touching the
/// task-owned state itself (spec §5: "per-handle state is owned by its
/// tick task").
pub struct MatchHandle {
    pub match_id: MatchId,
    pub authoritative: bool,
    pub tick_rate_hz: u32,
    pub stream: Stream,
    label: Arc<RwLock<String>>,
    lifecycle: Arc<RwLock<MatchLifecycle>>,
    size: Arc<AtomicUsize>,
    inbound: mpsc::Sender<Inbound>,
}

impl MatchHandle {
    pub fn label(&self) -> String {
        self.label.read().unwrap().clone()
    }

    pub fn lifecycle(&self) -> MatchLifecycle {
        *self.lifecycle.read().unwrap()
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub async fn join_attempt(
        &self,
        presence: MatchPresence,
        metadata: String,
    ) -> Result<Result<(), String>, mpsc::error::SendError<Inbound>> {
        let (tx, rx) = oneshot::channel();
        self.inbound
            .send(Inbound::JoinAttempt {
                presence,
                metadata,
                respond: tx,
            })
            .await?;
        Ok(rx.await.unwrap_or_else(|_| Err("match terminated".to_string())))
    }

    pub fn leave(&self, presence: MatchPresence) {
        let _ = self.inbound.try_send(Inbound::Leave { presence });
    }

    /// Non-blocking: back-pressure policy (spec §5) is "drop with a logged
    /// warning", not "block the caller".
    pub fn data_send(&self, message: MatchMessage) {
        if self.inbound.try_send(Inbound::Data { message }).is_err() {
            warn!(match_id = %self.match_id, "match queue full, dropping data message");
        }
    }

    pub fn terminate(&self) {
        let _ = self.inbound.try_send(Inbound::Terminate);
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    match_id: MatchId,
    authoritative: bool,
    handler: Arc<dyn MatchHandler>,
    init_state: serde_json::Value,
    tick_rate_hz: u32,
    label: String,
    dispatcher: Arc<Dispatcher>,
    label_cell: Arc<RwLock<String>>,
    tracker: Arc<nakama_tracker::Tracker>,
    stream: Stream,
    config: Arc<Config>,
    on_terminate: impl FnOnce() + Send + 'static,
) -> Arc<MatchHandle> {
    *label_cell.write().unwrap() = label;
    let (tx, rx) = mpsc::channel(config.match_.max_queue_size);
    let lifecycle = Arc::new(RwLock::new(MatchLifecycle::Active));
    let size = Arc::new(AtomicUsize::new(0));

    let handle = Arc::new(MatchHandle {
        match_id: match_id.clone(),
        authoritative,
        tick_rate_hz,
        stream: stream.clone(),
        label: label_cell.clone(),
        lifecycle: lifecycle.clone(),
        size: size.clone(),
        inbound: tx,
    });

    let ctx = MatchContext {
        match_id: match_id.clone(),
        node: Arc::from("local"),
        authoritative,
    };

    tokio::spawn(run_tick_loop(
        ctx,
        handler,
        init_state,
        tick_rate_hz,
        rx,
        dispatcher,
        lifecycle,
        size,
        tracker,
        stream,
        config,
        on_terminate,
    ));

    handle
}

#[allow(clippy::too_many_arguments)]
async fn run_tick_loop(
    ctx: MatchContext,
    handler: Arc<dyn MatchHandler>,
    mut state: serde_json::Value,
    tick_rate_hz: u32,
    mut inbound: mpsc::Receiver<Inbound>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<RwLock<MatchLifecycle>>,
    size: Arc<AtomicUsize>,
    tracker: Arc<nakama_tracker::Tracker>,
    stream: Stream,
    config: Arc<Config>,
    on_terminate: impl FnOnce() + Send + 'static,
) {
    let period = Duration::from_secs_f64(1.0 / tick_rate_hz as f64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut tick: u64 = 0;
    let mut joined: Vec<MatchPresence> = Vec::new();
    let mut left: Vec<MatchPresence> = Vec::new();
    let mut messages: Vec<MatchMessage> = Vec::new();
    let max_tick_duration = Duration::from_millis(config.match_.max_tick_duration_ms);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for kicked in dispatcher.take_kicked().await {
                    tracker.untrack(kicked.session_id, &stream);
                    left.push(kicked);
                }
                size.store(tracker.count_by_stream(&stream), Ordering::Relaxed);

                let started = Instant::now();

                if !joined.is_empty() {
                    state = handler
                        .match_join(&ctx, tick, state, std::mem::take(&mut joined))
                        .await;
                }
                if !left.is_empty() {
                    state = handler
                        .match_leave(&ctx, tick, state, std::mem::take(&mut left))
                        .await;
                }

                let next_state = handler
                    .match_loop(&ctx, &dispatcher, tick, state, std::mem::take(&mut messages))
                    .await;

                dispatcher.flush_deferred().await;

                let elapsed = started.elapsed();
                if elapsed > max_tick_duration {
                    warn!(match_id = %ctx.match_id, ?elapsed, budget = ?max_tick_duration, "tick overran");
                }

                match next_state {
                    Some(s) => {
                        state = s;
                        tick += 1;
                    }
                    None => {
                        *lifecycle.write().unwrap() = MatchLifecycle::Terminating;
                        debug!(match_id = %ctx.match_id, "match loop returned terminal, entering terminate grace period");
                        let grace = config.match_.terminate_grace_sec;
                        let terminated = handler
                            .match_terminate(&ctx, &dispatcher, state, grace)
                            .await;
                        let _ = terminated;
                        let _ = tokio::time::timeout(
                            Duration::from_secs(grace as u64),
                            dispatcher.flush_deferred(),
                        )
                        .await;
                        *lifecycle.write().unwrap() = MatchLifecycle::Dead;
                        on_terminate();
                        return;
                    }
                }
            }
            msg = inbound.recv() => {
                match msg {
                    Some(Inbound::JoinAttempt { presence, metadata, respond }) => {
                        let (s, accept, reason) = handler
                            .match_join_attempt(&ctx, tick, state, &presence, &metadata)
                            .await;
                        state = s;
                        if accept {
                            tracker.track(
                                presence.session_id,
                                stream.clone(),
                                presence.user_id,
                                nakama_core::PresenceMeta::new(presence.username.clone()),
                            );
                            joined.push(presence);
                            let _ = respond.send(Ok(()));
                        } else {
                            let _ = respond.send(Err(reason.unwrap_or_else(|| "rejected".to_string())));
                        }
                    }
                    Some(Inbound::Leave { presence }) => {
                        tracker.untrack(presence.session_id, &stream);
                        left.push(presence);
                    }
                    Some(Inbound::Data { message }) => {
                        messages.push(message);
                    }
                    Some(Inbound::Terminate) | None => {
                        *lifecycle.write().unwrap() = MatchLifecycle::Terminating;
                        let grace = config.match_.terminate_grace_sec;
                        let _ = handler.match_terminate(&ctx, &dispatcher, state, grace).await;
                        let _ = tokio::time::timeout(
                            Duration::from_secs(grace as u64),
                            dispatcher.flush_deferred(),
                        )
                        .await;
                        *lifecycle.write().unwrap() = MatchLifecycle::Dead;
                        on_terminate();
                        return;
                    }
                }
            }
        }
    }
}
