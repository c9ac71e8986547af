//! Forwarding handler.
//!
//! Every request received on a proxy port is rewritten toward the current
//! node on the port the request arrived on: the inbound port is parsed from
//! the `Host` header, the target is always plain `http://<ip>:<port>`, and
//! bodies are streamed in both directions. Hop-by-hop request headers are
//! dropped; everything else passes through untouched.
//!
//! Consequence of the hop-by-hop stripping: WebSocket upgrades do not survive
//! this proxy, since `Connection`/`Upgrade` never reach the node.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

use crate::cluster::NodeSelector;

/// Overall deadline for one forwarded exchange, dial included.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Port assumed when the Host header carries none.
pub const DEFAULT_INBOUND_PORT: u16 = 80;

/// Headers that apply to a single transport connection and must not be
/// forwarded by an intermediary.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
];

/// Shared state for the forwarding handler: the node selector and one
/// connection-pooling upstream client.
#[derive(Clone)]
pub struct ProxyState {
    selector: Arc<NodeSelector>,
    client: reqwest::Client,
}

impl ProxyState {
    pub fn new(selector: Arc<NodeSelector>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .expect("failed to create upstream HTTP client");

        Self { selector, client }
    }
}

/// The router served on every proxy port: a local text health endpoint, and
/// forwarding for everything else.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(proxy_health))
        .fallback(forward)
        .with_state(state)
}

/// Text health for a proxy port. Reports the node this port forwards to.
async fn proxy_health(State(state): State<ProxyState>) -> Response {
    match state.selector.current_ip().await {
        Ok(ip) => (StatusCode::OK, format!("OK: Forwarding to node {}\n", ip)).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("UNHEALTHY: {}\n", err),
        )
            .into_response(),
    }
}

/// Forward one request to the current node, preserving the inbound port.
async fn forward(State(state): State<ProxyState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body_present = has_body(&parts.headers);

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());
    let port = port_from_host(host);

    let ip = match state.selector.current_ip().await {
        Ok(ip) => ip,
        Err(err) => {
            warn!(error = %err, "cannot forward, no target node");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "failed to resolve target node",
            );
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("http://{}:{}{}", ip, port, path_and_query);

    debug!(method = %parts.method, uri = %parts.uri, %target, "proxying request");

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if should_forward(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    // A bodyless request must stay bodyless: wrapping an empty stream would
    // force chunked encoding onto the upstream hop.
    let mut upstream_req = state.client.request(parts.method, &target).headers(headers);
    if body_present {
        upstream_req = upstream_req.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let upstream = upstream_req.send().await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(err) => {
            // Single-shot semantics: a transport error becomes a 502, is not
            // retried, and does not feed the failover counter.
            warn!(%target, error = %err, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, "failed to reach target node");
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers().iter() {
            response_headers.append(name.clone(), value.clone());
        }
    }

    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "failed to assemble upstream response");
            error_response(StatusCode::BAD_GATEWAY, "invalid upstream response")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, format!("{}\n", message)).into_response()
}

/// Whether the inbound request carries a body worth streaming upstream.
fn has_body(headers: &HeaderMap) -> bool {
    match headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
    {
        Some(len) => len != "0",
        None => headers.contains_key(header::TRANSFER_ENCODING),
    }
}

/// Whether a request header is copied onto the upstream request. Hop-by-hop
/// headers are dropped per RFC 7230; `Host` and `Content-Length` are derived
/// by the client from the target URL and the streamed body.
fn should_forward(name: &HeaderName) -> bool {
    if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
        return false;
    }
    *name != header::HOST && *name != header::CONTENT_LENGTH
}

/// The port a request arrived on, taken from the last `:`-separated segment
/// of the Host value. Bracketed IPv6 literals without a port have colons but
/// no port segment. Defaults to 80.
fn port_from_host(host: Option<&str>) -> u16 {
    let Some(host) = host else {
        return DEFAULT_INBOUND_PORT;
    };
    let Some(colon) = host.rfind(':') else {
        return DEFAULT_INBOUND_PORT;
    };
    if let Some(bracket) = host.rfind(']') {
        if colon < bracket {
            return DEFAULT_INBOUND_PORT;
        }
    }
    host[colon + 1..]
        .parse()
        .unwrap_or(DEFAULT_INBOUND_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_host_forms() {
        assert_eq!(port_from_host(None), 80);
        assert_eq!(port_from_host(Some("proxy")), 80);
        assert_eq!(port_from_host(Some("proxy:30001")), 30001);
        assert_eq!(port_from_host(Some("10.20.0.5:8443")), 8443);
        assert_eq!(port_from_host(Some("proxy:")), 80);
        assert_eq!(port_from_host(Some("proxy:notaport")), 80);
        assert_eq!(port_from_host(Some("proxy:99999")), 80);
    }

    #[test]
    fn test_port_from_ipv6_host() {
        assert_eq!(port_from_host(Some("[::1]")), 80);
        assert_eq!(port_from_host(Some("[::1]:30001")), 30001);
        assert_eq!(port_from_host(Some("[2001:db8::1]:8080")), 8080);
        assert_eq!(port_from_host(Some("[2001:db8::1]")), 80);
    }

    #[test]
    fn test_hop_by_hop_headers_stripped_case_insensitively() {
        // HeaderName normalizes to lowercase, so any inbound casing lands in
        // the strip set.
        for raw in [
            "Connection",
            "UPGRADE",
            "Proxy-Connection",
            "proxy-authenticate",
            "PROXY-AUTHORIZATION",
            "TE",
            "Trailers",
            "TrAnSfEr-EnCoDiNg",
        ] {
            let name = HeaderName::from_bytes(raw.as_bytes()).unwrap();
            assert!(!should_forward(&name), "{raw} must be stripped");
        }
    }

    #[test]
    fn test_end_to_end_headers_forwarded() {
        for raw in ["accept", "authorization", "x-request-id", "content-type"] {
            let name = HeaderName::from_bytes(raw.as_bytes()).unwrap();
            assert!(should_forward(&name), "{raw} must be forwarded");
        }
    }

    #[test]
    fn test_host_and_content_length_recomputed() {
        assert!(!should_forward(&header::HOST));
        assert!(!should_forward(&header::CONTENT_LENGTH));
    }

    #[test]
    fn test_has_body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "0".parse().unwrap());
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        assert!(has_body(&headers));

        headers.remove(header::CONTENT_LENGTH);
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert!(has_body(&headers));
    }
}
