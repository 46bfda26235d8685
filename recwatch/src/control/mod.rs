//! Control-plane server.
//!
//! HTTP commands in (add/remove/list channel, start download), WebSocket
//! notification events out. Connection-level failures stay inside axum:
//! a dropped front-end connection never disturbs the scheduler, and the
//! listener keeps accepting new connections.

mod auth;
mod error;
mod routes;

pub use auth::ApiKeyAuth;
pub use error::{ApiError, ApiErrorResponse};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::downloader::DownloadManager;
use crate::error::{Error, Result};
use crate::notify::NotificationHub;
use crate::scheduler::Scheduler;

/// Shared application state handed to route handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub downloads: Arc<DownloadManager>,
    pub hub: Arc<NotificationHub>,
}

/// Control-plane server configuration.
#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub api_keys: Vec<String>,
}

/// The control-plane HTTP server.
pub struct ControlServer {
    config: ControlServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ControlServer {
    pub fn new(
        config: ControlServerConfig,
        state: AppState,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with auth, CORS and tracing layers.
    pub fn build_router(state: AppState, api_keys: Vec<String>) -> Router {
        let auth = ApiKeyAuth::new(api_keys);

        routes::create_router(state)
            .layer(middleware::from_fn(move |request, next| {
                let auth = auth.clone();
                async move { auth::api_key_auth(auth, request, next).await }
            }))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::Other(format!("invalid control-plane address: {}", e)))?;

        let router = Self::build_router(self.state.clone(), self.config.api_keys.clone());
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("control plane listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("control plane shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("control-plane server error: {}", e)))?;

        Ok(())
    }
}
