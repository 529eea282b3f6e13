//! Per-request authorization decision in front of the downstream handler.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use http::{HeaderMap, HeaderName};
use tower_cookies::Cookies;

use crate::{
    AppState,
    auth::{
        AuthError, CallbackParams, OriginMarker, SessionCredentialStore, oauth::safe_origin,
    },
};

/// Identity of the authorized user, forwarded downstream.
pub const USERNAME_HEADER: HeaderName = HeaderName::from_static("x-iyo-username");

/// Serialized JWT claims, forwarded downstream when payload forwarding is on.
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-iyo-token");

/// Target of the per-request access log.
const ACCESS_LOG_TARGET: &str = "iyo_gateway::access";

/// Authorize a request against the configured path policies.
///
/// Control paths (callback, logout, login) are answered here; everything else
/// is either forwarded, redirected into the login flow or rejected.
pub async fn authorize_middleware(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Identity headers only ever come from this middleware
    request.headers_mut().remove(USERNAME_HEADER);
    request.headers_mut().remove(TOKEN_HEADER);

    let oauth = &state.config.oauth;
    let session = SessionCredentialStore::new(&cookies, &oauth.session);
    let origin = OriginMarker::new(&cookies, &oauth.session);
    let path = request.uri().path().to_string();

    if matches_route(&path, Some(state.callback_path.as_ref())) {
        let params = Query::<CallbackParams>::try_from_uri(request.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();
        return match state.oauth.callback(&cookies, params).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };
    }

    if matches_route(&path, oauth.logout_url.as_deref()) {
        session.clear();
        request.headers_mut().remove(header::AUTHORIZATION);
        tracing::info!("User logged out");
        return Redirect::temporary("/").into_response();
    }

    if matches_route(&path, oauth.login_url.as_deref()) {
        let referer = wants_redirect_back(request.uri().query())
            .then(|| same_origin_referer(request.headers()))
            .flatten();
        if let Some(referer) = &referer {
            origin.save(referer);
        }
        let target = safe_origin(referer.or_else(|| origin.peek()));
        return match state.oauth.start_login(strip_query(&target)) {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };
    }

    if matches_route(&path, oauth.login_page.as_deref()) {
        let authenticated = bearer_token(request.headers())
            .or_else(|| session.get())
            .is_some_and(|token| state.validator.verify_token(&token).is_ok());
        if authenticated {
            return Redirect::temporary("/").into_response();
        }

        if wants_redirect_back(request.uri().query())
            && let Some(referer) = same_origin_referer(request.headers())
        {
            origin.save(&referer);
        }
        return next.run(request).await;
    }

    if oauth
        .allow_extensions
        .iter()
        .any(|ext| path.ends_with(ext.as_str()))
    {
        return next.run(request).await;
    }

    let Some(policy) = state.policies.match_path(&path) else {
        return next.run(request).await;
    };

    let Some(token) = bearer_token(request.headers()).or_else(|| session.get()) else {
        if let Some(api_base) = &oauth.api_base_path
            && path.starts_with(api_base.as_str())
        {
            return AuthError::MissingCredentials.into_response();
        }

        let requested = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path.as_str());
        origin.save(requested);

        return match &oauth.login_page {
            Some(login_page) => Redirect::temporary(login_page).into_response(),
            None => match state.oauth.start_login(&path) {
                Ok(response) => response,
                Err(e) => e.into_response(),
            },
        };
    };

    let claims = match state.validator.verify(policy, &token) {
        Ok(claims) => claims,
        Err(e) => {
            if e.clears_session() {
                session.clear();
            }
            return e.into_response();
        }
    };

    let username = claims.username.clone().unwrap_or_default();
    // UTF-8 identities travel as raw header bytes
    match HeaderValue::from_bytes(username.as_bytes()) {
        Ok(value) => {
            request.headers_mut().insert(USERNAME_HEADER, value);
        }
        Err(_) => tracing::warn!("Username is not a valid header value, not forwarding it"),
    }

    if oauth.forward_payload {
        let payload = serde_json::to_string(&claims.raw)
            .ok()
            .and_then(|json| HeaderValue::from_bytes(json.as_bytes()).ok());
        match payload {
            Some(value) => {
                request.headers_mut().insert(TOKEN_HEADER, value);
            }
            None => tracing::warn!("Claim payload is not a valid header value, not forwarding it"),
        }
    }

    tracing::info!(
        target: ACCESS_LOG_TARGET,
        method = %request.method(),
        path = %path,
        username = %username,
        "Authorized request"
    );

    next.run(request).await
}

/// Token from `Authorization: Bearer <token>`, prefix matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let prefix = value.get(..7)?;
    if !prefix.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = value[7..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// `?redirect=back` or a bare `?redirect_back` asks to return to the referer after login.
fn wants_redirect_back(query: Option<&str>) -> bool {
    query.is_some_and(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .any(|(k, v)| (k == "redirect" && v == "back") || k == "redirect_back")
    })
}

/// Path and query of the `Referer` header when it points at this host.
fn same_origin_referer(headers: &HeaderMap) -> Option<String> {
    let referer = headers.get(header::REFERER)?.to_str().ok()?;
    if referer.starts_with('/') {
        return Some(safe_origin(Some(referer.to_string())));
    }

    let url = url::Url::parse(referer).ok()?;
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let referer_host = match url.port() {
        Some(port) => format!("{}:{port}", url.host_str()?),
        None => url.host_str()?.to_string(),
    };
    if !referer_host.eq_ignore_ascii_case(host) {
        tracing::debug!(referer = %referer, "Ignoring cross-origin referer");
        return None;
    }

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Some(path)
}

/// `path` is `route` itself or lies beneath it.
fn matches_route(path: &str, route: Option<&str>) -> bool {
    let Some(route) = route else {
        return false;
    };
    match path.strip_prefix(route) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || route.ends_with('/'),
        None => false,
    }
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}
