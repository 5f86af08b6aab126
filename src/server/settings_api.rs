//! JSON endpoints over the env file

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;

use super::auth::is_authorized;
use super::AppState;
use crate::settings::{SettingsError, SettingsUpdate};

/// Envelope shared by every JSON answer
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            msg: None,
            data: None,
        }
    }

    pub fn with_data(data: BTreeMap<String, String>) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
            data: None,
        }
    }
}

fn json(status: StatusCode, body: ApiResponse) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/json; charset=utf-8")],
        Json(body),
    )
        .into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("未授权")]
    Unauthorized,

    #[error("请求格式错误")]
    MalformedRequest,

    #[error("密钥错误")]
    WrongSecret,

    #[error("{0}")]
    InvalidValue(SettingsError),

    #[error("保存失败")]
    SaveFailed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::MalformedRequest | ApiError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            ApiError::WrongSecret => StatusCode::FORBIDDEN,
            ApiError::SaveFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json(self.status(), ApiResponse::failure(self.to_string()))
    }
}

/// A JSON object body; `null` counts as an empty object
fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    serde_json::from_slice::<Option<Map<String, Value>>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| {
            tracing::debug!("Rejected request body: {}", e);
            ApiError::MalformedRequest
        })
}

fn submitted_secret(data: &Map<String, Value>) -> &str {
    data.get("secret").and_then(Value::as_str).unwrap_or("")
}

pub async fn get_settings(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_authorized(&state.secret, peer.ip(), &headers) {
        tracing::warn!("Unauthorized settings read from {}", peer);
        return Err(ApiError::Unauthorized);
    }

    let settings = match state.env.settings().await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Could not read settings: {}", e);
            BTreeMap::new()
        }
    };
    Ok(json(StatusCode::OK, ApiResponse::with_data(settings)))
}

pub async fn check_secret(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let data = parse_object(&body)?;
    let response = if state.secret.accepts(submitted_secret(&data)) {
        ApiResponse::ok()
    } else {
        ApiResponse::failure(ApiError::WrongSecret.to_string())
    };
    Ok(json(StatusCode::OK, response))
}

pub async fn save_settings(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let data = parse_object(&body)?;
    if !state.secret.accepts(submitted_secret(&data)) {
        tracing::warn!("Settings change from {} rejected: wrong secret", peer);
        return Err(ApiError::WrongSecret);
    }

    let update = SettingsUpdate::from_json(&data).map_err(ApiError::InvalidValue)?;
    if update.is_empty() {
        return Ok(json(StatusCode::OK, ApiResponse::ok()));
    }

    state.env.apply(&update).await.map_err(|e| {
        tracing::error!("Saving settings failed: {}", e);
        ApiError::SaveFailed
    })?;

    if let Some(secret) = update.secret() {
        state.secret.set(Some(secret.to_string()));
        tracing::info!("Shared secret replaced");
    }
    Ok(json(StatusCode::OK, ApiResponse::ok()))
}
