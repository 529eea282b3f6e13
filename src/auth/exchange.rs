//! Authorization-code and JWT exchange with the IdP.

use serde::Deserialize;

use super::{AuthError, policy::OAuthClientConfig};
use crate::config::ORGANIZATION_SCOPE_PREFIX;

/// Access-token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Result of a completed exchange.
#[derive(Clone)]
pub struct ExchangedToken {
    pub jwt: String,
    /// Lifetime reported by the token endpoint, if any.
    pub expires_in: Option<u64>,
    /// Scopes the user granted at the IdP.
    pub granted_scope: Option<String>,
}

impl std::fmt::Debug for ExchangedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangedToken")
            .field("jwt", &"****")
            .field("expires_in", &self.expires_in)
            .field("granted_scope", &self.granted_scope)
            .finish()
    }
}

/// Turns an authorization code into a signed JWT.
///
/// Timeouts come from the shared client; no call is retried.
#[derive(Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
}

impl TokenExchangeClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    #[tracing::instrument(skip_all, fields(state = %state))]
    pub async fn exchange(
        &self,
        client: &OAuthClientConfig,
        code: &str,
        state: &str,
    ) -> Result<ExchangedToken, AuthError> {
        let token = self.fetch_access_token(client, code, state).await?;
        let jwt = self.fetch_jwt(client, &token.access_token).await?;

        Ok(ExchangedToken {
            jwt,
            expires_in: token.expires_in,
            granted_scope: token.scope,
        })
    }

    async fn fetch_access_token(
        &self,
        client: &OAuthClientConfig,
        code: &str,
        state: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&client.token_url)
            .header(http::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", client.redirect_url.as_str()),
                ("state", state),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(format!("invalid token endpoint response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(AuthError::Exchange(
                "token endpoint returned an empty access token".into(),
            ));
        }

        tracing::debug!(
            granted_scope = token.scope.as_deref().unwrap_or_default(),
            expires_in = ?token.expires_in,
            "Exchanged authorization code for access token"
        );
        Ok(token)
    }

    /// Request a JWT, trying each organization scope in order before a
    /// scope-less request.
    async fn fetch_jwt(
        &self,
        client: &OAuthClientConfig,
        access_token: &str,
    ) -> Result<String, AuthError> {
        let organization_scopes = client
            .scopes
            .iter()
            .filter(|scope| scope.starts_with(ORGANIZATION_SCOPE_PREFIX));

        for scope in organization_scopes {
            match self.request_jwt(client, access_token, Some(scope)).await {
                Ok(jwt) => return Ok(jwt),
                Err(e) => {
                    // Membership may simply not exist; try the next one
                    tracing::debug!(scope = %scope, error = %e, "Scoped JWT request failed");
                }
            }
        }

        self.request_jwt(client, access_token, None).await
    }

    async fn request_jwt(
        &self,
        client: &OAuthClientConfig,
        access_token: &str,
        scope: Option<&str>,
    ) -> Result<String, AuthError> {
        let mut request = self
            .http
            .get(&client.jwt_url)
            .header(http::header::AUTHORIZATION, format!("token {access_token}"));
        if let Some(scope) = scope {
            request = request.query(&[("scope", scope)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Exchange(format!("JWT endpoint request failed: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::Exchange(format!("JWT endpoint returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Exchange(format!("failed to read JWT response: {e}")))?;
        let jwt = body.trim();
        if jwt.is_empty() {
            return Err(AuthError::Exchange("JWT endpoint returned an empty body".into()));
        }

        Ok(jwt.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, method, path, query_param, query_param_is_missing},
    };

    use super::*;

    fn client_config(server: &MockServer, scopes: &[&str]) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "gateway".into(),
            client_secret: "s3cret".into(),
            redirect_url: "https://example.com/_iyo_callback".into(),
            auth_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            jwt_url: format!("{}/jwt", server.uri()),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("client_id=gateway"))
            .and(body_string_contains("client_secret=s3cret"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("state=%2Fprivate"))
            .and(body_string_contains(
                "redirect_uri=https%3A%2F%2Fexample.com%2F_iyo_callback",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "token_type": "bearer",
                "scope": "user:memberof:acme",
                "expires_in": 7200,
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_exchange_with_organization_scope() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .and(header("authorization", "token at-123"))
            .and(query_param("scope", "user:memberof:acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string("scoped.jwt.value\n"))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let token = exchange
            .exchange(&client_config(&server, &["user:memberof:acme"]), "abc", "/private")
            .await
            .unwrap();

        assert_eq!(token.jwt, "scoped.jwt.value");
        assert_eq!(token.expires_in, Some(7200));
        assert_eq!(token.granted_scope.as_deref(), Some("user:memberof:acme"));
    }

    #[tokio::test]
    async fn test_failed_memberships_skipped() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .and(query_param("scope", "user:memberof:acme"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .and(query_param("scope", "user:memberof:globex"))
            .respond_with(ResponseTemplate::new(200).set_body_string("globex.jwt.value"))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let token = exchange
            .exchange(
                &client_config(
                    &server,
                    &["user:memberof:acme", "user:email", "user:memberof:globex"],
                ),
                "abc",
                "/private",
            )
            .await
            .unwrap();

        assert_eq!(token.jwt, "globex.jwt.value");
    }

    #[tokio::test]
    async fn test_falls_back_to_scopeless_request() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .and(query_param("scope", "user:memberof:acme"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .and(query_param_is_missing("scope"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain.jwt.value"))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let token = exchange
            .exchange(&client_config(&server, &["user:memberof:acme"]), "abc", "/private")
            .await
            .unwrap();

        assert_eq!(token.jwt, "plain.jwt.value");
    }

    #[tokio::test]
    async fn test_jwt_endpoint_failure() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let result = exchange
            .exchange(&client_config(&server, &[]), "abc", "/private")
            .await;

        assert!(matches!(result, Err(AuthError::Exchange(_))));
    }

    #[tokio::test]
    async fn test_token_endpoint_rejects_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("never.used.jwt"))
            .expect(0)
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let result = exchange
            .exchange(&client_config(&server, &[]), "bad", "/private")
            .await;

        assert!(matches!(result, Err(AuthError::Exchange(msg)) if msg.contains("400")));
    }

    #[tokio::test]
    async fn test_token_endpoint_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let exchange = TokenExchangeClient::new(reqwest::Client::new());
        let result = exchange
            .exchange(&client_config(&server, &[]), "abc", "/private")
            .await;

        assert!(matches!(result, Err(AuthError::Exchange(_))));
    }

    #[tokio::test]
    async fn test_slow_idp_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-123"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let exchange = TokenExchangeClient::new(http);
        let result = exchange
            .exchange(&client_config(&server, &[]), "abc", "/private")
            .await;

        assert!(matches!(result, Err(AuthError::Exchange(_))));
    }
}
