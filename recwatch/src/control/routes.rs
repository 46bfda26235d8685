//! Control-plane routes: registry commands, download commands, and the
//! outbound notification event stream.

use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::ApiError;
use super::AppState;
use crate::downloader::DownloadJob;
use crate::registry::Channel;
use crate::scheduler::ChannelOverview;

/// Heartbeat ping interval for event stream subscribers.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/channels", get(list_channels).post(add_channel))
        .route("/api/channels/{id}", delete(remove_channel))
        .route("/api/downloads", get(list_downloads).post(start_download))
        .route("/api/events/ws", get(events_ws))
        .with_state(state)
}

// DTOs

#[derive(Debug, Deserialize)]
pub struct AddChannelRequest {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Option<String>,
}

// Handlers

/// Snapshot of registered channels with their current session states.
async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelOverview>> {
    Json(state.scheduler.list_channels().await)
}

/// Register a channel and start monitoring it.
async fn add_channel(
    State(state): State<AppState>,
    Json(req): Json<AddChannelRequest>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let id = req.channel_id.trim();
    if id.is_empty() {
        return Err(ApiError::validation("channel_id must not be empty"));
    }

    let channel = state.scheduler.add_channel(id).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

/// Remove a channel. When the channel is recording, its capture subprocess
/// is terminated before this responds.
async fn remove_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    let removed = state.scheduler.remove_channel(&id).await?;
    Ok(Json(removed))
}

/// Snapshot of download jobs.
async fn list_downloads(State(state): State<AppState>) -> Json<Vec<DownloadJob>> {
    Json(state.downloads.jobs())
}

/// Start an archive download. Responds as soon as the job is accepted or
/// rejected; completion arrives later on the event stream.
async fn start_download(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Result<(StatusCode, Json<DownloadJob>), ApiError> {
    let job = state.downloads.start(&req.url, req.quality).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Upgrade to a WebSocket carrying every notification event as a JSON text
/// frame.
async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle an established event-stream connection.
///
/// The subscriber holds its own broadcast receiver: a slow consumer lags
/// and drops events for itself only, and a disconnected consumer costs
/// nothing. The consumer process restarting simply means a new socket and
/// a fresh subscription.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut event_rx = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.reset(); // skip the immediate first tick
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("event subscriber disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(_)) => {
                        // Inbound data frames are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        debug!("event stream socket error: {}", e);
                        break;
                    }
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("failed to encode notification event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(Utf8Bytes::from(payload))).await.is_err() {
                            debug!("event subscriber went away mid-send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("notification hub closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("event subscriber failed to answer ping, closing");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::control::ControlServer;
    use crate::downloader::{DownloadConfig, DownloadManager};
    use crate::notify::NotificationHub;
    use crate::probe::VideoInfo;
    use crate::registry::ChannelRegistry;
    use crate::scheduler::Scheduler;
    use crate::testkit::{FakeLauncher, ScriptedProber, ScriptedStatus, test_session_config};

    const VOD_URL: &str = "https://vod.example/video/7";

    struct ApiUnderTest {
        router: Router,
        prober: Arc<ScriptedProber>,
        _dir: tempfile::TempDir,
    }

    fn build(api_keys: Vec<String>) -> ApiUnderTest {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(ChannelRegistry::load(dir.path().join("channels.json")).unwrap());
        let prober = Arc::new(ScriptedProber::new(vec![ScriptedStatus::Offline]));
        let launcher = Arc::new(FakeLauncher::new());
        let hub = Arc::new(NotificationHub::new());

        let scheduler = Arc::new(Scheduler::new(
            registry,
            prober.clone(),
            launcher.clone(),
            hub.clone(),
            test_session_config(dir.path()),
            CancellationToken::new(),
        ));

        let save_root = dir.path().join("recordings");
        let downloads = Arc::new(DownloadManager::new(
            DownloadConfig {
                vod_template: "[{username}]{uploaded}_{escaped_title}.mp4".to_string(),
                time_format: "%y-%m-%d %H_%M_%S".to_string(),
                save_root,
                fallback_to_current_dir: true,
                fallback_dir: dir.path().join("fallback_recordings"),
                download_command: "fake-downloader".to_string(),
                default_quality: "best".to_string(),
            },
            prober.clone(),
            launcher,
            hub.clone(),
        ));

        let state = AppState {
            scheduler,
            downloads,
            hub,
        };
        let router = ControlServer::build_router(state, api_keys);

        ApiUnderTest {
            router,
            prober,
            _dir: dir,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_list_channels() {
        let t = build(Vec::new());

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/api/channels",
                serde_json::json!({"channel_id": "chan-a"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["id"], "chan-a");
        assert_eq!(body["display_name"], "CHAN-A");

        let response = t
            .router
            .clone()
            .oneshot(Request::get("/api/channels").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["state"], "idle");
    }

    #[tokio::test]
    async fn test_duplicate_add_conflicts() {
        let t = build(Vec::new());

        let add = || {
            post_json(
                "/api/channels",
                serde_json::json!({"channel_id": "chan-a"}),
            )
        };
        let response = t.router.clone().oneshot(add()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = t.router.clone().oneshot(add()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_add_unknown_channel_rejected() {
        let t = build(Vec::new());
        t.prober.unknown_channel("ghost");

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/api/channels",
                serde_json::json!({"channel_id": "ghost"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_remove_channel() {
        let t = build(Vec::new());

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/api/channels",
                serde_json::json!({"channel_id": "chan-a"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = t
            .router
            .clone()
            .oneshot(
                Request::delete("/api/channels/chan-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "chan-a");

        let response = t
            .router
            .clone()
            .oneshot(
                Request::delete("/api/channels/chan-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_rejected_and_accepted() {
        let t = build(Vec::new());

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/api/downloads",
                serde_json::json!({"url": "not a url"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        t.prober.set_video(
            VOD_URL,
            VideoInfo {
                title: "old stream".to_string(),
                channel_name: "Streamer".to_string(),
                uploaded_at: None,
                stream_started_at: None,
            },
        );

        let response = t
            .router
            .clone()
            .oneshot(post_json(
                "/api/downloads",
                serde_json::json!({"url": VOD_URL}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["source_url"], VOD_URL);

        let response = t
            .router
            .clone()
            .oneshot(Request::get("/api/downloads").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_ws_requires_upgrade_handshake() {
        let t = build(Vec::new());

        // Without the WebSocket upgrade headers the route refuses to serve
        // the request as plain HTTP.
        let response = t
            .router
            .clone()
            .oneshot(Request::get("/api/events/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let t = build(vec!["bot-key".to_string()]);

        let response = t
            .router
            .clone()
            .oneshot(Request::get("/api/channels").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t
            .router
            .clone()
            .oneshot(
                Request::get("/api/channels")
                    .header("X-API-Key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t
            .router
            .clone()
            .oneshot(
                Request::get("/api/channels")
                    .header("X-API-Key", "bot-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
