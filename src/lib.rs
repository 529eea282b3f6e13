//! Authorization gateway protecting URL paths with an OAuth2 login flow.
//!
//! Requests under a protected prefix must carry a JWT issued by the identity
//! provider, either in the session cookie set after login or as a bearer
//! token. Authorized requests are forwarded to the downstream handler with
//! the user's identity in `X-Iyo-Username`.

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};
use tower_cookies::CookieManagerLayer;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod auth;
pub mod config;
pub mod middleware;
#[cfg(feature = "server")]
pub mod observability;
pub mod routes;

#[cfg(test)]
mod tests;

use auth::{JwtValidator, OAuthFlowController, PathPolicyRegistry, TokenExchangeClient};
use config::{ConfigError, DownstreamConfig, GatewayConfig};

/// Shared, read-only state built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub policies: Arc<PathPolicyRegistry>,
    pub validator: Arc<JwtValidator>,
    pub oauth: Arc<OAuthFlowController>,
    /// Client for IdP calls, bounded by the configured request timeout.
    pub http_client: reqwest::Client,
    /// Path component of the OAuth2 redirect URL.
    pub callback_path: Arc<str>,
}

impl AppState {
    /// Build the authorization engine from a validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let http_client = config.server.http_client.build_client().map_err(|e| {
            ConfigError::Validation(format!("failed to build HTTP client: {e}"))
        })?;

        let policies = Arc::new(PathPolicyRegistry::from_config(&config.oauth)?);
        let validator = Arc::new(JwtValidator::new(config.oauth.jwt_public_key.as_deref())?);
        let oauth = Arc::new(OAuthFlowController::new(
            Arc::clone(&policies),
            TokenExchangeClient::new(http_client.clone()),
            Arc::clone(&validator),
            config.oauth.session.clone(),
        ));
        let callback_path = Arc::from(config.oauth.callback_path()?);

        if policies.is_empty() {
            tracing::warn!("No protected paths configured, every request is forwarded");
        }

        Ok(Self {
            config: Arc::new(config),
            policies,
            validator,
            oauth,
            http_client,
            callback_path,
        })
    }
}

/// Wrap `downstream` in the authorization layer and add the health endpoint.
pub fn build_router(state: AppState, downstream: Router) -> Router {
    let protected = downstream.layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::authorize_middleware,
    ));

    Router::new()
        .route("/healthz", get(routes::health::health_check))
        .fallback_service(protected)
        .with_state(state)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Build the full application with the configured downstream.
pub fn build_app(state: AppState) -> Result<Router, ConfigError> {
    let downstream = match &state.config.server.downstream {
        DownstreamConfig::Proxy { url } => {
            let client = state.config.server.http_client.build_proxy_client().map_err(|e| {
                ConfigError::Validation(format!("failed to build proxy HTTP client: {e}"))
            })?;
            routes::proxy_router(client, url)?
        }
        DownstreamConfig::Static { path } => Router::new().fallback_service(ServeDir::new(path)),
    };
    Ok(build_router(state, downstream))
}
