//! `/reload` and `/logs`: command output streamed as a chunked plain-text body

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::{is_authorized, SharedSecret};
use super::{plain_error, AppState};
use crate::subprocess::streaming::{
    BodySink, SessionState, SlotLease, StreamSession, LINE_CHANNEL_CAPACITY,
};
use crate::subprocess::ProcessCommand;

/// Body of the 409 answer while another reload holds the slot
pub const RELOAD_BUSY: &str = "已有重载任务正在执行";

pub async fn reload(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if admit(&state.secret, peer, &headers, "/reload") == SessionState::Unauthorized {
        return plain_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let token = state.shutdown.child_token();
    let lease = if state.config.exclusive_reload {
        match state.reload_slot.try_acquire(&token) {
            Some(lease) => Some(lease),
            None => {
                tracing::info!("Refused reload from {}: another reload is running", peer);
                return plain_error(StatusCode::CONFLICT, RELOAD_BUSY);
            }
        }
    } else {
        None
    };

    stream_command(&state, state.config.reload_command(), token, lease, peer)
}

pub async fn logs(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if admit(&state.secret, peer, &headers, "/logs") == SessionState::Unauthorized {
        return plain_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let token = state.shutdown.child_token();
    stream_command(&state, state.config.logs_command(), token, None, peer)
}

/// Move a request out of `Idle`: `Authorized` or `Unauthorized`.
fn admit(secret: &SharedSecret, peer: SocketAddr, headers: &HeaderMap, path: &str) -> SessionState {
    let next = if is_authorized(secret, peer.ip(), headers) {
        SessionState::Authorized
    } else {
        SessionState::Unauthorized
    };

    if next == SessionState::Unauthorized {
        tracing::warn!("Unauthorized request for {} from {}", path, peer);
    }
    tracing::debug!("{} from {}: {:?} -> {:?}", path, peer, SessionState::Idle, next);
    next
}

/// Start `command` in a background session and answer with its live output.
///
/// The body stream owns a drop guard of `token`: when hyper drops the body
/// because the client went away, the session is cancelled and its child killed.
fn stream_command(
    state: &AppState,
    command: ProcessCommand,
    token: CancellationToken,
    lease: Option<SlotLease>,
    peer: SocketAddr,
) -> Response {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(LINE_CHANNEL_CAPACITY);
    let runner = state.processes.runner();
    tracing::info!("Streaming {} to {}", command.display(), peer);
    let session = StreamSession::new(command, token.clone());

    tokio::spawn(async move {
        let _lease = lease;
        let mut sink = BodySink::new(tx);
        let outcome = session.run(runner.as_ref(), &mut sink).await;
        tracing::debug!("Stream to {} ended: {:?}", peer, outcome);
    });

    let body = futures::stream::unfold(
        (rx, token.drop_guard()),
        |(mut rx, guard)| async move { rx.recv().await.map(|chunk| (chunk, (rx, guard))) },
    );

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::auth::SECRET_HEADER;
    use axum::http::HeaderValue;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn peer(ip: Ipv4Addr) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(ip, 40000))
    }

    #[test]
    fn test_admit_loopback_without_secret() {
        let secret = SharedSecret::new(None);
        let state = admit(&secret, peer(Ipv4Addr::LOCALHOST), &HeaderMap::new(), "/reload");
        assert_eq!(state, SessionState::Authorized);
    }

    #[test]
    fn test_admit_requires_matching_header_once_secret_set() {
        let secret = SharedSecret::new(Some("s3cret".to_string()));
        let client = peer(Ipv4Addr::new(192, 168, 1, 20));

        assert_eq!(
            admit(&secret, client, &HeaderMap::new(), "/logs"),
            SessionState::Unauthorized
        );

        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert_eq!(admit(&secret, client, &headers, "/logs"), SessionState::Authorized);
    }
}
