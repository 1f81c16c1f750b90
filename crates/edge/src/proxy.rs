//! Reverse-proxy plumbing: client identity, header preparation,
//! upstream URL building and the forwarded call itself.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// First `X-Forwarded-For` value, else the transport peer address.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// The upstream identity claim, when the edge's upstream attached one.
pub fn extract_user_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
}

/// Correlation id from the request, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Copy request headers for the upstream call: drop `Host` and
/// `Content-Length`, pin the correlation id, and append the peer to
/// `X-Forwarded-For`.
pub fn prepare_headers(
    request_headers: &HeaderMap,
    correlation: &str,
    peer: Option<SocketAddr>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in request_headers {
        if name == axum::http::header::HOST
            || name == axum::http::header::CONTENT_LENGTH
            || HOP_BY_HOP.contains(&name.as_str())
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Ok(value) = HeaderValue::from_str(correlation) {
        headers.insert(HeaderName::from_static("x-correlation-id"), value);
    }

    if let Some(peer) = peer {
        let peer_ip = peer.ip().to_string();
        let forwarded = match request_headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) if !existing.is_empty() => format!("{existing}, {peer_ip}"),
            _ => peer_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    headers
}

/// Strip hop-by-hop headers from an upstream response.
pub fn sanitize_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// `http://{host}:{port}/{tail}` with the original query preserved.
pub fn build_upstream_url(host: &str, port: u16, tail: &str, query: Option<&str>) -> String {
    let path = tail.trim_start_matches('/');
    match query {
        Some(query) if !query.is_empty() => format!("http://{host}:{port}/{path}?{query}"),
        _ => format!("http://{host}:{port}/{path}"),
    }
}

/// Forward the request with a streamed body and an explicit deadline.
pub async fn forward(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Body,
    timeout: Duration,
) -> Result<reqwest::Response, ProxyError> {
    let stream = body.into_data_stream();
    let result = client
        .request(method, url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(stream))
        .timeout(timeout)
        .send()
        .await;

    result.map_err(|e| {
        if e.is_timeout() {
            error!(url, timeout_ms = timeout.as_millis() as u64, "upstream timed out");
            ProxyError::Timeout(timeout)
        } else {
            error!(url, error = %e, "upstream transport error");
            ProxyError::Transport(e.to_string())
        }
    })
}
