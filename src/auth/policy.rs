//! Protected path policies and their lookup.

use std::{collections::HashSet, sync::Arc};

use crate::config::{ConfigError, OAuthConfig};

/// OAuth2 client settings shared by every protected path.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub jwt_url: String,
    /// Scopes requested at login, in order and without duplicates.
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .field("redirect_url", &self.redirect_url)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("jwt_url", &self.jwt_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Authorization rule bound to a path prefix.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    /// Path prefix. Doubles as the OAuth2 `state` value for logins started here.
    pub prefix: String,
    pub client: Arc<OAuthClientConfig>,
    /// Allowed identities; empty means any authenticated user.
    pub usernames: HashSet<String>,
    /// Scopes the token must carry; empty means no scope requirement.
    pub required_scopes: Vec<String>,
}

impl PathPolicy {
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Ordered set of path policies, matched by longest prefix.
#[derive(Debug, Clone)]
pub struct PathPolicyRegistry {
    // Sorted by prefix length, longest first
    policies: Vec<PathPolicy>,
}

impl PathPolicyRegistry {
    /// Build a registry from already-constructed policies.
    ///
    /// Fails if two policies register the same prefix, since the prefix is
    /// also the callback correlation key.
    pub fn new(mut policies: Vec<PathPolicy>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for policy in &policies {
            if !seen.insert(policy.prefix.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "protected path '{}' is registered more than once",
                    policy.prefix
                )));
            }
        }

        // Stable sort keeps configuration order among equal-length prefixes
        policies.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self { policies })
    }

    /// Build the registry from the `[oauth]` configuration section.
    ///
    /// All policies share one client whose requested scopes are the union of
    /// every path's required scopes followed by `extra_scopes`.
    pub fn from_config(config: &OAuthConfig) -> Result<Self, ConfigError> {
        let mut scopes: Vec<String> = Vec::new();
        let required = config
            .protect
            .iter()
            .flat_map(|entry| entry.required_scopes())
            .chain(config.extra_scopes.iter().cloned());
        for scope in required {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        let client = Arc::new(OAuthClientConfig {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            jwt_url: config.jwt_url.clone(),
            scopes,
        });

        let policies = config
            .protect
            .iter()
            .map(|entry| PathPolicy {
                prefix: entry.path.clone(),
                client: Arc::clone(&client),
                usernames: entry.usernames.iter().cloned().collect(),
                required_scopes: entry.required_scopes(),
            })
            .collect();

        Self::new(policies)
    }

    /// Policy with the longest prefix matching `path`.
    pub fn match_path(&self, path: &str) -> Option<&PathPolicy> {
        self.policies.iter().find(|policy| policy.matches(path))
    }

    /// Client configuration for a callback `state` value.
    pub fn by_state(&self, state: &str) -> Option<&Arc<OAuthClientConfig>> {
        self.policies
            .iter()
            .find(|policy| policy.prefix == state)
            .map(|policy| &policy.client)
    }

    /// Any registered policy, used when a login is started outside protected scope.
    pub fn fallback(&self) -> Option<&PathPolicy> {
        self.policies.last()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }
}
