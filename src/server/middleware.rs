//! Inbound auth and request identity.
//!
//! Every /api route requires the shared X-API-KEY secret. User identity is
//! conveyed by X-User-Id / X-User-Email headers populated by the gateway;
//! the client IP is resolved from forwarded headers in documented order.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use super::AppState;
use crate::models::RequestUser;

/// Reject requests without the shared secret; attach the typed identity.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("X-API-KEY")
        .and_then(|v| v.to_str().ok());

    if provided != Some(state.settings.backend_api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    let user = request_user(request.headers(), request.extensions().get::<ConnectInfo<SocketAddr>>());
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Build the typed identity record from headers.
fn request_user(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> RequestUser {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    RequestUser {
        id: header("X-User-Id"),
        email: header("X-User-Email"),
        is_api_key: true,
        premium: header("X-User-Premium").as_deref() == Some("true"),
        client_ip: client_ip(headers, peer),
    }
}

/// Resolve the caller's IP: Cloudflare, first X-Forwarded-For hop,
/// X-Real-IP, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(ip) = header("CF-Connecting-IP") {
        return ip.to_string();
    }
    if let Some(forwarded) = header("X-Forwarded-For") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(ip) = header("X-Real-IP") {
        return ip.to_string();
    }
    peer.map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_client_ip_priority_order() {
        let all = headers(&[
            ("CF-Connecting-IP", "1.1.1.1"),
            ("X-Forwarded-For", "2.2.2.2, 9.9.9.9"),
            ("X-Real-IP", "3.3.3.3"),
        ]);
        assert_eq!(client_ip(&all, None), "1.1.1.1");

        let forwarded = headers(&[
            ("X-Forwarded-For", "2.2.2.2, 9.9.9.9"),
            ("X-Real-IP", "3.3.3.3"),
        ]);
        assert_eq!(client_ip(&forwarded, None), "2.2.2.2");

        let real = headers(&[("X-Real-IP", "3.3.3.3")]);
        assert_eq!(client_ip(&real, None), "3.3.3.3");

        assert_eq!(client_ip(&headers(&[]), None), "unknown");
    }

    #[test]
    fn test_request_user_extraction() {
        let map = headers(&[
            ("X-User-Id", "u-7"),
            ("X-User-Email", "u@example.com"),
            ("X-User-Premium", "true"),
        ]);
        let user = request_user(&map, None);
        assert_eq!(user.id.as_deref(), Some("u-7"));
        assert_eq!(user.email.as_deref(), Some("u@example.com"));
        assert!(user.premium);
        assert!(user.is_api_key);
        assert_eq!(user.rate_identifier(), "user:u-7");
    }

    #[test]
    fn test_blank_headers_read_as_absent() {
        let map = headers(&[("X-User-Id", "  ")]);
        let user = request_user(&map, None);
        assert!(user.id.is_none());
    }
}
