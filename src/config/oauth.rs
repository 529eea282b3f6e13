use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Authorization endpoint used when `auth_url` is omitted.
pub const DEFAULT_AUTH_URL: &str = "https://itsyou.online/v1/oauth/authorize";

/// Access-token endpoint used when `token_url` is omitted.
pub const DEFAULT_TOKEN_URL: &str = "https://itsyou.online/v1/oauth/access_token";

/// JWT-issuing endpoint used when `jwt_url` is omitted.
pub const DEFAULT_JWT_URL: &str = "https://itsyou.online/v1/oauth/jwt";

/// Scope prefix the IdP uses for organization membership.
pub const ORGANIZATION_SCOPE_PREFIX: &str = "user:memberof:";

// ─────────────────────────────────────────────────────────────────────────────
// OAuth2 client
// ─────────────────────────────────────────────────────────────────────────────

/// OAuth2 client and path protection configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthConfig {
    /// Client ID registered with the IdP.
    pub client_id: String,

    /// Client secret registered with the IdP.
    pub client_secret: String,

    /// Absolute redirect URL registered with the IdP.
    /// Its path component is served as the OAuth2 callback endpoint.
    pub redirect_url: String,

    /// IdP authorization endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// IdP access-token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// IdP JWT-issuing endpoint.
    #[serde(default = "default_jwt_url")]
    pub jwt_url: String,

    /// Page rendered by the downstream application for unauthenticated users.
    /// When unset, unauthenticated browsers are sent straight to the IdP.
    #[serde(default)]
    pub login_page: Option<String>,

    /// Path that starts the IdP redirect, typically linked from `login_page`.
    #[serde(default)]
    pub login_url: Option<String>,

    /// Path that clears the session cookie.
    #[serde(default)]
    pub logout_url: Option<String>,

    /// Requests below this prefix get a 401 instead of a login redirect.
    #[serde(default)]
    pub api_base_path: Option<String>,

    /// Scopes requested at login in addition to the ones protected paths need.
    #[serde(default)]
    pub extra_scopes: Vec<String>,

    /// Forward the full JWT claim payload downstream in `X-Iyo-Token`.
    #[serde(default)]
    pub forward_payload: bool,

    /// File extensions served without authorization (e.g. `css`, `.js`).
    #[serde(default)]
    pub allow_extensions: Vec<String>,

    /// PEM-encoded public key used to verify JWTs.
    /// Defaults to the IdP's published ES384 key.
    #[serde(default)]
    pub jwt_public_key: Option<String>,

    /// Protected path prefixes.
    #[serde(default)]
    pub protect: Vec<ProtectedPathConfig>,

    /// Session cookie configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .field("redirect_url", &self.redirect_url)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("jwt_url", &self.jwt_url)
            .field("login_page", &self.login_page)
            .field("login_url", &self.login_url)
            .field("logout_url", &self.logout_url)
            .field("api_base_path", &self.api_base_path)
            .field("extra_scopes", &self.extra_scopes)
            .field("forward_payload", &self.forward_payload)
            .field("allow_extensions", &self.allow_extensions)
            .field("jwt_public_key", &self.jwt_public_key.as_ref().map(|_| "<pem>"))
            .field("protect", &self.protect)
            .field("session", &self.session)
            .finish()
    }
}

impl OAuthConfig {
    pub(super) fn validate(&mut self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_url", &self.redirect_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "oauth.{name} is required"
                )));
            }
        }

        // A root callback would swallow every request to `/`
        if self.callback_path()? == "/" {
            return Err(ConfigError::Validation(format!(
                "oauth.redirect_url '{}' must include a callback path",
                self.redirect_url
            )));
        }

        for (name, value) in [
            ("login_page", &self.login_page),
            ("login_url", &self.login_url),
            ("logout_url", &self.logout_url),
            ("api_base_path", &self.api_base_path),
        ] {
            if let Some(path) = value
                && !path.starts_with('/')
            {
                return Err(ConfigError::Validation(format!(
                    "oauth.{name} must be an absolute path starting with '/', got '{path}'"
                )));
            }
        }

        let mut seen = HashSet::new();
        for entry in &self.protect {
            if !entry.path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "oauth.protect path must start with '/', got '{}'",
                    entry.path
                )));
            }
            if !seen.insert(entry.path.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "oauth.protect path '{}' is configured more than once",
                    entry.path
                )));
            }
        }

        // Normalize so suffix checks can compare against ".ext" directly
        self.allow_extensions = self
            .allow_extensions
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty() && *ext != ".")
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.to_string()
                } else {
                    format!(".{ext}")
                }
            })
            .collect();

        self.session.validate()
    }

    /// Path component of `redirect_url`, served as the OAuth2 callback.
    pub fn callback_path(&self) -> Result<String, ConfigError> {
        let url = url::Url::parse(&self.redirect_url).map_err(|e| {
            ConfigError::Validation(format!(
                "oauth.redirect_url '{}' is not an absolute URL: {e}",
                self.redirect_url
            ))
        })?;
        Ok(url.path().to_string())
    }
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_jwt_url() -> String {
    DEFAULT_JWT_URL.to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Protected paths
// ─────────────────────────────────────────────────────────────────────────────

/// A protected path prefix and the identities allowed below it.
///
/// An entry with no restrictions only requires a valid session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtectedPathConfig {
    /// Path prefix. Also used as the OAuth2 `state` value, so it must be unique.
    pub path: String,

    /// Organizations the user must be a member of.
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Usernames allowed to access the path. Empty means any user.
    #[serde(default)]
    pub usernames: Vec<String>,

    /// Additional raw scopes the token must carry.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ProtectedPathConfig {
    /// Scopes a token must carry for this path, in configuration order.
    pub fn required_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .organizations
            .iter()
            .map(|org| format!("{ORGANIZATION_SCOPE_PREFIX}{org}"))
            .collect();
        for scope in &self.scopes {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        scopes
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session cookie
// ─────────────────────────────────────────────────────────────────────────────

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the cookie carrying the JWT.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Name of the transient cookie holding the originally requested path.
    #[serde(default = "default_origin_cookie")]
    pub origin_cookie_name: String,

    /// Session lifetime in seconds when the token endpoint omits `expires_in`.
    #[serde(default = "default_session_duration")]
    pub duration_secs: u64,

    /// Secure cookie (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Hide the cookie from scripts.
    #[serde(default = "default_true")]
    pub http_only: bool,

    /// SameSite cookie attribute.
    #[serde(default)]
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            origin_cookie_name: default_origin_cookie(),
            duration_secs: default_session_duration(),
            secure: true,
            http_only: true,
            same_site: SameSite::default(),
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() || self.origin_cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "oauth.session cookie names cannot be empty".into(),
            ));
        }
        if self.cookie_name == self.origin_cookie_name {
            return Err(ConfigError::Validation(
                "oauth.session.cookie_name and origin_cookie_name must differ".into(),
            ));
        }
        Ok(())
    }
}

fn default_session_cookie() -> String {
    "caddyoauth".to_string()
}

fn default_origin_cookie() -> String {
    "origin".to_string()
}

fn default_session_duration() -> u64 {
    86400 // 1 day
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}
