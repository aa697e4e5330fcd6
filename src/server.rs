//! HTTP/WebSocket surface (`axum::Router`): the `/cdp/<id>` and
//! `/extension` upgrade endpoints, the recording control endpoints, and
//! the liveness probes. Grounded on the pack's `channel-web` crate
//! (`WebSocketConnection::spawn` — split the socket, drive reads and
//! writes from one task via `tokio::select!`) and `autohands-api`'s
//! `InterfaceServer` for the bind/serve shape, since the teacher itself
//! is a gRPC service with no WebSocket surface of its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use axum::Json;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::client::ClientFrame;
use crate::extension::ExtensionFrame;
use crate::extension_protocol;
use crate::router::Router;
use crate::wire::{Envelope, CLOSE_PROTOCOL_ERROR};

const MISSED_PONG_LIMIT: u32 = 3;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    token: Option<String>,
    #[serde(rename = "extensionId")]
    #[allow(dead_code)]
    extension_id: Option<String>,
}

fn authorize(state: &AppState, token: &Option<String>) -> Result<(), Response> {
    match &state.router.auth_token {
        None => Ok(()),
        Some(expected) => match token {
            Some(got) if got == expected => Ok(()),
            _ => Err((StatusCode::UNAUTHORIZED, "invalid or missing token").into_response()),
        },
    }
}

/// Build the full relay `axum::Router`, to be handed to `axum::serve`.
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/version", get(version_handler))
        .route("/", head(health_probe))
        .route("/cdp/{client_id}", get(client_ws_handler))
        .route("/extension", get(extension_ws_handler))
        .route("/recording/start", post(recording_start))
        .route("/recording/stop", post(recording_stop))
        .route("/recording/cancel", post(recording_cancel))
        .route("/recording/status", get(recording_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn version_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": state.router.version,
        "extensionConnected": state.router.extension.is_connected().await,
    }))
}

async fn health_probe() -> StatusCode {
    StatusCode::OK
}

// ---- /cdp/<id> --------------------------------------------------------------------

async fn client_ws_handler(
    Path(client_path_label): Path<String>,
    Query(query): Query<AuthQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(resp) = authorize(&state, &query.token) {
        return resp;
    }
    if state.router.should_reject_new_client().await {
        return (StatusCode::SERVICE_UNAVAILABLE, state.router.reject_reason()).into_response();
    }
    ws.on_upgrade(move |socket| handle_client_socket(socket, client_path_label, state))
}

async fn handle_client_socket(socket: WebSocket, path_label: String, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();

    let client = state
        .router
        .clients
        .register(client_id.clone(), path_label, tx, state.router.client_backpressure_limit);

    info!(client = %client_id, "client connected");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let outbound = match &frame {
                    ClientFrame::Text(text) => Message::Text(text.clone().into()),
                    ClientFrame::Binary(data) => Message::Binary(data.clone()),
                    ClientFrame::Close { code, reason } => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: *code,
                                reason: reason.clone().into(),
                            })))
                            .await;
                        break;
                    }
                };
                if ws_tx.send(outbound).await.is_err() {
                    break;
                }
                client.note_sent(&frame);
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match Envelope::parse(&text) {
                        Ok(envelope) => state.router.handle_client_command(&client, envelope).await,
                        Err(err) => {
                            warn!(client = %client_id, %err, "malformed client frame");
                            client.fail(CLOSE_PROTOCOL_ERROR, err.to_string());
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        warn!(client = %client_id, "unexpected binary frame from a CDP client, ignoring");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(client = %client_id, %err, "client socket error");
                        break;
                    }
                }
            }
        }
    }

    state.router.on_client_disconnected(&client);
    info!(client = %client_id, "client disconnected");
}

// ---- /extension -------------------------------------------------------------------

async fn extension_ws_handler(
    Query(query): Query<AuthQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(resp) = authorize(&state, &query.token) {
        return resp;
    }
    ws.on_upgrade(move |socket| handle_extension_socket(socket, state))
}

async fn handle_extension_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ExtensionFrame>();

    let (generation, orphaned) = state.router.extension.bind(tx).await;
    state.router.on_extension_connected(orphaned).await;
    info!("extension connected");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let missed = state.router.extension.note_ping_sent();
                if missed > MISSED_PONG_LIMIT {
                    warn!(missed, "extension missed too many pongs, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                match frame {
                    ExtensionFrame::Text(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    ExtensionFrame::Close { code, reason } => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                            .await;
                        break;
                    }
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match Envelope::parse(&text) {
                        Ok(envelope) => state.router.handle_extension_inbound(envelope).await,
                        Err(err) => warn!(%err, "malformed extension frame"),
                    },
                    Some(Ok(Message::Binary(data))) => state.router.recordings.handle_binary(data),
                    Some(Ok(Message::Pong(_))) => state.router.extension.record_pong(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "extension socket error");
                        break;
                    }
                }
            }
        }
    }

    let orphaned = state.router.extension.unbind(generation).await;
    state.router.on_extension_disconnected(orphaned).await;
    info!("extension disconnected");
}

// ---- recording control endpoints ---------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingTarget {
    tab_id: Option<i64>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingStartRequest {
    #[serde(flatten)]
    target: RecordingTarget,
    output_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
}

fn resolve_or_400(router: &Router, target: &RecordingTarget) -> Result<i64, Response> {
    router
        .resolve_tab_id(target.tab_id, target.session_id.as_deref())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    success: false,
                    error: "no tabId/sessionId given and no tab is currently attached".to_string(),
                }),
            )
                .into_response()
        })
}

async fn recording_start(
    State(state): State<AppState>,
    Json(req): Json<RecordingStartRequest>,
) -> Response {
    let tab_id = match resolve_or_400(&state.router, &req.target) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let started_at = match state.router.recordings.start(tab_id, PathBuf::from(&req.output_path)) {
        Ok(t) => t,
        Err(err) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorBody { success: false, error: err.to_string() }),
            )
                .into_response()
        }
    };

    if let Err(err) = state
        .router
        .extension
        .send_control(extension_protocol::START_RECORDING, json!({ "tabId": tab_id }))
        .await
    {
        state.router.recordings.cancel(tab_id);
        return (
            StatusCode::BAD_GATEWAY,
            Json(ErrorBody { success: false, error: err.to_string() }),
        )
            .into_response();
    }

    Json(json!({ "success": true, "tabId": tab_id, "startedAt": started_at })).into_response()
}

async fn recording_stop(State(state): State<AppState>, Json(req): Json<RecordingTarget>) -> Response {
    let tab_id = match resolve_or_400(&state.router, &req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match state.router.recordings.stop(tab_id, state.router.extension.clone()).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "path": outcome.path,
            "size": outcome.size,
            "durationMs": outcome.duration.as_millis() as u64,
        }))
        .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { success: false, error: err.to_string() }),
        )
            .into_response(),
    }
}

async fn recording_cancel(State(state): State<AppState>, Json(req): Json<RecordingTarget>) -> Response {
    let tab_id = match resolve_or_400(&state.router, &req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let _ = state
        .router
        .extension
        .send_control(extension_protocol::CANCEL_RECORDING, json!({ "tabId": tab_id }))
        .await;
    let cancelled = state.router.recordings.cancel(tab_id);
    Json(json!({ "success": cancelled })).into_response()
}

async fn recording_status(State(state): State<AppState>, Query(req): Query<RecordingTarget>) -> Response {
    let tab_id = match resolve_or_400(&state.router, &req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    Json(json!({
        "recording": state.router.recordings.is_recording(tab_id),
        "startedAt": state.router.recordings.started_at(tab_id),
    }))
    .into_response()
}

// ---- bind/serve ---------------------------------------------------------------------

/// Bind and serve the relay, running until `shutdown` resolves. Mirrors
/// the teacher's `InterfaceServer::run` bind-then-serve shape, adapted
/// for `axum::serve`'s graceful shutdown hook.
pub async fn run(
    addr: SocketAddr,
    router: Arc<Router>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let app = build_router(AppState { router: router.clone() });
    let listener = TcpListener::bind(addr).await.map_err(crate::error::Error::from)?;
    info!(%addr, "listening");

    let maintenance_router = router.clone();
    let maintenance = tokio::spawn(async move {
        let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            tick.tick().await;
            maintenance_router.run_maintenance_tick();
        }
    });

    // Once the signal fires, tear down the relay's own state (detach every
    // client from every target, close client sockets, close the extension
    // link last) before letting `axum::serve` drain the listener.
    let teardown_router = router.clone();
    let shutdown_with_teardown = async move {
        shutdown.await;
        teardown_router.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_with_teardown)
        .await
        .map_err(crate::error::Error::from)?;

    maintenance.abort();
    Ok(())
}
