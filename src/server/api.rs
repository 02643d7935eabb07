use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use super::channel::ClientTransport;
use super::engine::{HmrEngine, SharedEngine};
use crate::config::ServerConfig;
use crate::error::HmrError;
use crate::graph::NodeSnapshot;
use crate::watcher::FsWatcher;

/// Server half of one websocket connection. Frames go through an unbounded
/// channel to the connection's writer task.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl ClientTransport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send_text(&self, text: String) -> crate::error::Result<()> {
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| HmrError::TransportClosed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.tx.send(Message::Close(None));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine<WsTransport>,
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let watcher = FsWatcher::from_config(&config);
    let (engine, _watcher) = HmrEngine::<WsTransport>::start(watcher)
        .with_context(|| format!("failed to watch {}", config.root.display()))?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, root = %config.root.display(), "hmr server listening");

    run(listener, engine, &config.root).await
}

/// Serve an existing engine on an already-bound listener.
pub async fn run(
    listener: tokio::net::TcpListener,
    engine: SharedEngine<WsTransport>,
    root: &Path,
) -> Result<()> {
    axum::serve(listener, router(engine, root.to_path_buf())).await?;
    Ok(())
}

pub fn router(engine: SharedEngine<WsTransport>, root: PathBuf) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(|| async { Json("OK") }))
        .route("/graph", get(get_graph).post(set_entry))
        .route("/reload", post(reload))
        .fallback_service(ServeDir::new(root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let open = Arc::new(AtomicBool::new(true));
    let client_id = Uuid::new_v4();

    state.engine.lock().add_client(
        client_id,
        WsTransport {
            tx,
            open: open.clone(),
        },
    );

    // Drain frames queued by broadcasts into the socket
    let writer_open = open.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
        writer_open.store(false, Ordering::Release);
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state.engine.lock().handle_inbound(client_id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                state.engine.lock().client_error(client_id, &e);
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    state.engine.lock().client_closed(client_id);
    debug!(client = %client_id, "connection finished");
    send_task.abort();
}

#[derive(Deserialize)]
struct GraphQuery {
    id: Option<String>,
}

async fn get_graph(
    State(state): State<AppState>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<Vec<NodeSnapshot>>, StatusCode> {
    let engine = state.engine.lock();
    match query.id.as_deref() {
        Some(id) => engine
            .graph()
            .snapshot(id)
            .map(|node| Json(vec![node]))
            .ok_or(StatusCode::NOT_FOUND),
        None => Ok(Json(engine.graph().snapshot_all())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetEntryRequest {
    id: String,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    hmr_enabled: bool,
}

async fn set_entry(
    State(state): State<AppState>,
    Json(request): Json<SetEntryRequest>,
) -> Json<Option<NodeSnapshot>> {
    let mut engine = state.engine.lock();
    engine.set_entry(&request.id, &request.imports, request.hmr_enabled);
    Json(engine.graph().snapshot(&request.id))
}

async fn reload(State(state): State<AppState>) -> Json<usize> {
    Json(state.engine.lock().reload_all())
}
