//! Reverse proxy to the protected application.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use http::HeaderName;

use crate::{auth::ErrorResponse, config::ConfigError};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    upstream: String,
}

/// Router that forwards every request to `upstream`.
pub fn proxy_router(client: reqwest::Client, upstream: &str) -> Result<Router, ConfigError> {
    let parsed = url::Url::parse(upstream).map_err(|e| {
        ConfigError::Validation(format!("invalid downstream URL '{upstream}': {e}"))
    })?;
    let upstream = parsed.as_str().trim_end_matches('/').to_string();

    Ok(Router::new()
        .fallback(proxy_handler)
        .with_state(ProxyState { client, upstream }))
}

#[tracing::instrument(name = "proxy", skip_all, fields(method = %request.method(), path = %request.uri().path()))]
async fn proxy_handler(State(proxy): State<ProxyState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", proxy.upstream, path_and_query);

    let mut headers = strip_hop_by_hop(parts.headers);
    if let Some(host) = headers.remove(header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host);
    }

    let upstream_response = proxy
        .client
        .request(parts.method, &target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let upstream_response = match upstream_response {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Downstream request failed");
            let body = ErrorResponse::new(
                "server_error",
                "bad_gateway",
                "The protected application is unavailable",
            );
            return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
        }
    };

    let status = upstream_response.status();
    let headers = strip_hop_by_hop(upstream_response.headers().clone());

    let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    // Headers named in Connection are hop-by-hop too
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().chain(listed.iter()) {
        headers.remove(name);
    }
    headers
}
