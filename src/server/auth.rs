//! Loopback gate and shared-secret checks

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};

use super::AppState;

/// Header carrying the shared secret on authorized requests
pub const SECRET_HEADER: &str = "x-mihomo-secret";

/// The live shared secret, replaceable while the server runs
#[derive(Debug, Clone, Default)]
pub struct SharedSecret(Arc<RwLock<Option<String>>>);

impl SharedSecret {
    pub fn new(secret: Option<String>) -> Self {
        let shared = Self::default();
        shared.set(secret);
        shared
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the secret; an empty string clears it
    pub fn set(&self, secret: Option<String>) {
        let secret = secret.filter(|s| !s.is_empty());
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = secret;
    }

    pub fn is_set(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether `candidate` passes a secret check: always true when no secret is set
    pub fn accepts(&self, candidate: &str) -> bool {
        match self.0.read().unwrap_or_else(PoisonError::into_inner).as_deref() {
            Some(secret) => candidate == secret,
            None => true,
        }
    }
}

pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Per-route check: loopback when no secret is configured, otherwise the
/// secret header must match.
pub fn is_authorized(secret: &SharedSecret, peer: IpAddr, headers: &HeaderMap) -> bool {
    match secret.get() {
        None => is_loopback(peer),
        Some(secret) => headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == secret),
    }
}

/// Server-wide check applied before routing
pub fn gate_allows(secret: &SharedSecret, peer: IpAddr) -> bool {
    secret.is_set() || is_loopback(peer)
}

/// Refuse every non-loopback request while no secret is configured.
pub async fn loopback_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !gate_allows(&state.secret, peer.ip()) {
        tracing::warn!(
            "Refused {} {} from {}: no secret configured",
            request.method(),
            request.uri().path(),
            peer
        );
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
    const REMOTE_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);

    fn with_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback(LOCAL));
        assert!(is_loopback(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 9))));
        assert!(is_loopback(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_loopback(IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped())));
        assert!(!is_loopback(REMOTE));
        assert!(!is_loopback(IpAddr::V6(REMOTE_V6)));
    }

    #[test]
    fn test_without_secret_only_loopback_is_authorized() {
        let secret = SharedSecret::new(None);
        assert!(is_authorized(&secret, LOCAL, &HeaderMap::new()));
        assert!(!is_authorized(&secret, REMOTE, &with_header("anything")));
        assert!(gate_allows(&secret, LOCAL));
        assert!(!gate_allows(&secret, REMOTE));
    }

    #[test]
    fn test_with_secret_header_must_match() {
        let secret = SharedSecret::new(Some("s3cret".into()));
        assert!(is_authorized(&secret, REMOTE, &with_header("s3cret")));
        assert!(!is_authorized(&secret, REMOTE, &with_header("wrong")));
        // Loopback alone is not enough once a secret exists
        assert!(!is_authorized(&secret, LOCAL, &HeaderMap::new()));
        assert!(gate_allows(&secret, REMOTE));
    }

    #[test]
    fn test_secret_replacement_is_live() {
        let secret = SharedSecret::new(Some("old".into()));
        let handle = secret.clone();
        handle.set(Some("new".into()));

        assert!(secret.accepts("new"));
        assert!(!secret.accepts("old"));

        handle.set(Some(String::new()));
        assert!(!secret.is_set());
        assert!(secret.accepts("whatever"));
    }
}
