//! Demo process wiring every `nakama-*` crate into a running realtime
//! server. The accept loop follows the teacher's
//! `valence_network::connect::do_accept_loop` shape (bind, loop on
//! `TcpListener::accept`, spawn one task per connection); the binary's
//! logging/shutdown sequence follows the `rusty-timer` server's
//! `main.rs`. Everything in between — handshake, auth, pipeline wiring —
//! is this core's own.

mod echo_match;
mod time_rpc;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nakama_core::Config;
use nakama_hooks::HookPipeline;
use nakama_match::{MatchHandlerRegistry, MatchRegistry};
use nakama_matchmaker::Matchmaker;
use nakama_pipeline::{
    NoopNotificationDelivery, NoopPersistence, Pipeline, PipelineDeps, RpcRegistry,
    TracingMetricsSink,
};
use nakama_registry::Registry;
use nakama_router::Router;
use nakama_session::{extract_bearer_token, AuthProvider, NoopAuthProvider, SessionHandle, WsSession};
use nakama_tracker::Tracker;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use echo_match::EchoMatch;
use time_rpc::TimeRpc;

fn load_config() -> anyhow::Result<Config> {
    match env::var("NAKAMA_CONFIG_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(Config::from_toml_str(&raw)?)
        }
        Err(_) => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = Arc::new(load_config()?);
    let node: Arc<str> = Arc::from(env::var("NAKAMA_NODE").unwrap_or_else(|_| "node-a".to_string()));

    let tracker = Arc::new(Tracker::new());
    let registry = Arc::new(Registry::new());
    let router = Arc::new(Router::new(tracker.clone(), registry.clone()));

    let match_handlers = Arc::new(MatchHandlerRegistry::new());
    match_handlers.register("echo", Arc::new(EchoMatch));
    let match_registry = MatchRegistry::new(
        match_handlers,
        router.clone(),
        tracker.clone(),
        config.clone(),
        node.clone(),
    );

    let matchmaker = Matchmaker::new(config.matchmaker.max_tickets);

    let mut rpc = RpcRegistry::new();
    rpc.register("time", Arc::new(TimeRpc));

    let pipeline = Pipeline::new(PipelineDeps {
        node: node.clone(),
        registry: registry.clone(),
        tracker: tracker.clone(),
        router: router.clone(),
        match_registry: match_registry.clone(),
        matchmaker: matchmaker.clone(),
        hooks: Arc::new(HookPipeline::new()),
        rpc,
        persistence: Arc::new(NoopPersistence),
        notifications: Arc::new(NoopNotificationDelivery),
        metrics: Arc::new(TracingMetricsSink),
        matchmaker_match_module: Some("echo".to_string()),
    });

    let auth: Arc<dyn AuthProvider> = Arc::new(NoopAuthProvider::new(config.session.token_expiry_sec));

    spawn_matchmaker_tick(pipeline.clone(), config.matchmaker.interval_ms);

    let bind_addr: SocketAddr = env::var("NAKAMA_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7350".to_string())
        .parse()?;
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "nakama-server listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(%e, "failed to accept connection");
                        continue;
                    }
                };
                let config = config.clone();
                let auth = auth.clone();
                let pipeline = pipeline.clone();
                let registry = registry.clone();
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, config, auth, pipeline, registry, tracker).await;
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

fn spawn_matchmaker_tick(pipeline: Arc<Pipeline>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            pipeline.run_matchmaker_tick().await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Handshake query-string fields captured by the `accept_hdr_async`
/// callback, read back once the handshake completes.
#[derive(Clone)]
struct HandshakeParams {
    token: Option<String>,
    format: nakama_proto::WireFormat,
    lang: String,
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<Config>,
    auth: Arc<dyn AuthProvider>,
    pipeline: Arc<Pipeline>,
    registry: Arc<Registry>,
    tracker: Arc<Tracker>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(%e, %peer_addr, "failed to set TCP_NODELAY");
    }

    let captured = Arc::new(std::sync::Mutex::new(HandshakeParams {
        token: None,
        format: nakama_proto::WireFormat::Json,
        lang: "en".to_string(),
    }));
    let captured_for_callback = captured.clone();

    let callback = move |request: &Request, response: Response| {
        let mut params = captured_for_callback.lock().unwrap();
        params.token = extract_bearer_token(request);
        if let Some(query) = request.uri().query() {
            for pair in query.split('&') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                match key {
                    "format" => {
                        if let Some(f) = nakama_proto::WireFormat::from_query_param(value) {
                            params.format = f;
                        }
                    }
                    "lang" => params.lang = value.to_string(),
                    _ => {}
                }
            }
        }
        Ok(response)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%e, %peer_addr, "websocket handshake failed");
            return;
        }
    };

    let params = Arc::try_unwrap(captured)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone());

    let Some(token) = params.token.clone() else {
        warn!(%peer_addr, "connection rejected: missing bearer token");
        return;
    };

    let authed = match auth.validate(&token).await {
        Ok(a) => a,
        Err(e) => {
            warn!(%e, %peer_addr, "connection rejected");
            return;
        }
    };

    let session_id = nakama_core::SessionId::new();
    let user_id = authed.user_id;
    let single_socket = config.session.single_socket;
    let registry_for_connect = registry.clone();
    let tracker_for_connect = tracker.clone();

    // Single-socket eviction must happen as soon as this session is
    // addressable, not after it closes — it races new-session accept
    // against this session's own lifetime, not against its teardown.
    let session = WsSession::run(
        ws_stream,
        session_id,
        authed.user_id,
        authed.username,
        params.lang,
        params.format,
        authed.expiry,
        peer_addr.ip(),
        peer_addr.port(),
        authed.vars,
        config.clone(),
        pipeline.clone(),
        move |session| {
            registry_for_connect.add(session.clone());
            tracker_for_connect.track(
                session.id(),
                nakama_core::Stream::notifications(user_id.0),
                user_id,
                nakama_core::PresenceMeta::new(session.username()),
            );
            if single_socket {
                let registry_for_single = registry_for_connect.clone();
                let tracker_for_single = tracker_for_connect.clone();
                tokio::spawn(async move {
                    registry_for_single.single_session(&tracker_for_single, user_id, session_id).await;
                });
            }
        },
    )
    .await;

    pipeline.cleanup_session(session.id(), session.user_id()).await;
}
