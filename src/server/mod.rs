//! HTTP surface of the panel
//!
//! Routes:
//! - `GET /` serves the UI page
//! - `GET /reload` and `GET /logs` stream command output as plain text
//! - `GET /get_settings`, `POST /check_secret`, `POST /save_settings` speak JSON
//!
//! Every request first passes the loopback gate in [`auth`].

pub mod auth;
pub mod settings_api;
pub mod streaming;

use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use crate::app::AppConfig;
use crate::settings::EnvFile;
use crate::subprocess::streaming::SessionSlot;
use crate::subprocess::SubprocessManager;
pub use auth::SharedSecret;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub processes: SubprocessManager,
    pub secret: SharedSecret,
    pub env: EnvFile,
    /// Holds the reload currently running when reloads are exclusive
    pub reload_slot: SessionSlot,
    /// Root execution context; every request's token is a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, processes: SubprocessManager) -> Self {
        Self {
            secret: SharedSecret::new(config.secret.clone()),
            env: EnvFile::new(&config.env_path),
            config: Arc::new(config),
            processes,
            reload_slot: SessionSlot::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every live session and let the server drain.
    pub fn shut_down(&self) {
        self.reload_slot.terminate();
        self.shutdown.cancel();
    }
}

pub fn router(state: AppState) -> Router {
    let ui = ServeFile::new(&state.config.ui_path);

    Router::new()
        .route("/", get_service(ui).fallback(not_found))
        .route("/reload", get(streaming::reload).fallback(not_found))
        .route("/logs", get(streaming::logs).fallback(not_found))
        .route(
            "/get_settings",
            get(settings_api::get_settings).fallback(not_found),
        )
        .route(
            "/check_secret",
            post(settings_api::check_secret).fallback(not_found),
        )
        .route(
            "/save_settings",
            post(settings_api::save_settings).fallback(not_found),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::loopback_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

/// Plain-text error body, newline terminated
pub(crate) fn plain_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        format!("{message}\n"),
    )
        .into_response()
}

async fn not_found() -> Response {
    plain_error(StatusCode::NOT_FOUND, "404 page not found")
}
