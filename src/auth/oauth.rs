//! OAuth2 authorization-code flow: login redirect and callback handling.

use std::sync::Arc;

use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use tower_cookies::Cookies;

use super::{
    AuthError,
    exchange::TokenExchangeClient,
    jwt::JwtValidator,
    policy::{PathPolicy, PathPolicyRegistry},
    session::{OriginMarker, SessionCredentialStore},
};
use crate::config::SessionConfig;

/// Query parameters the IdP sends to the callback path.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Drives the login redirect and the callback exchange.
pub struct OAuthFlowController {
    registry: Arc<PathPolicyRegistry>,
    exchange: TokenExchangeClient,
    validator: Arc<JwtValidator>,
    session: SessionConfig,
}

impl OAuthFlowController {
    pub fn new(
        registry: Arc<PathPolicyRegistry>,
        exchange: TokenExchangeClient,
        validator: Arc<JwtValidator>,
        session: SessionConfig,
    ) -> Self {
        Self {
            registry,
            exchange,
            validator,
            session,
        }
    }

    /// IdP authorization URL for a login started under `policy`.
    pub fn authorization_url(&self, policy: &PathPolicy) -> Result<url::Url, AuthError> {
        let client = &policy.client;
        let mut url = url::Url::parse(&client.auth_url)
            .map_err(|e| AuthError::Internal(format!("invalid auth_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", &client.redirect_url)
            .append_pair("scope", &client.scopes.join(","))
            .append_pair("state", &policy.prefix);
        Ok(url)
    }

    /// Redirect (307) to the IdP for the policy covering `request_path`.
    ///
    /// Paths outside protected scope log in under the broadest policy.
    pub fn start_login(&self, request_path: &str) -> Result<Response, AuthError> {
        let policy = self
            .registry
            .match_path(request_path)
            .or_else(|| self.registry.fallback())
            .ok_or_else(|| AuthError::Internal("no protected paths configured".into()))?;

        let url = self.authorization_url(policy)?;
        tracing::debug!(path = %request_path, state = %policy.prefix, "Redirecting to identity provider");
        Ok(Redirect::temporary(url.as_str()).into_response())
    }

    /// Complete a login: exchange the code, store the session, replay the origin.
    #[tracing::instrument(skip_all, fields(state = params.state.as_deref().unwrap_or_default()))]
    pub async fn callback(
        &self,
        cookies: &Cookies,
        params: CallbackParams,
    ) -> Result<Response, AuthError> {
        if let Some(error) = &params.error {
            tracing::warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or_default(),
                "Identity provider returned an error"
            );
            return Err(AuthError::InvalidCallback);
        }

        let (Some(code), Some(state)) = (
            params.code.filter(|c| !c.is_empty()),
            params.state.filter(|s| !s.is_empty()),
        ) else {
            tracing::debug!("Callback without code or state");
            return Err(AuthError::InvalidCallback);
        };

        let Some(client) = self.registry.by_state(&state) else {
            tracing::warn!(state = %state, "Callback state does not match a protected path");
            return Err(AuthError::UnknownState);
        };

        let token = self.exchange.exchange(client, &code, &state).await?;

        // Never store a credential the gateway itself would reject
        let claims = self.validator.verify_token(&token.jwt).map_err(|e| {
            AuthError::Exchange(format!("identity provider issued an unusable token: {e}"))
        })?;

        let expiry = token.expires_in.unwrap_or(self.session.duration_secs);
        SessionCredentialStore::new(cookies, &self.session).set(&token.jwt, expiry);

        let origin = safe_origin(OriginMarker::new(cookies, &self.session).take());
        tracing::info!(
            username = claims.username.as_deref().unwrap_or_default(),
            state = %state,
            redirect = %origin,
            "User logged in"
        );

        Ok(Redirect::temporary(&origin).into_response())
    }
}

/// Saved origin if it is a local path, else `/`.
pub(crate) fn safe_origin(origin: Option<String>) -> String {
    match origin {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && !path.chars().any(char::is_control) =>
        {
            path
        }
        _ => "/".to_string(),
    }
}
