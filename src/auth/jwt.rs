//! JWT verification against the IdP's fixed ES384 public key.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::{AuthError, policy::PathPolicy};
use crate::config::ConfigError;

/// Public key the IdP signs its JWTs with.
pub const DEFAULT_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAES5X8XrfKdx9gYayFITc89wad4usrk0n2
7MjiGYvqalizeSWTHEpnd7oea9IQ8T5oJjMVH5cc0H5tFSKilFFeh//wngxIyny6
6+Vq5t5B0V0Ehy01+2ceEon2Y0XDkIKv
-----END PUBLIC KEY-----
";

/// The `scope` claim: an array of strings, or a single comma or space
/// separated string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeClaim {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl ScopeClaim {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ScopeClaim::None => Vec::new(),
            ScopeClaim::Single(s) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            ScopeClaim::Multiple(v) => v,
        }
    }
}

/// Typed view of the claims this gateway reads.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    globalid: Option<String>,
    #[serde(default)]
    scope: ScopeClaim,
}

/// Identity and permissions derived from a verified JWT.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationClaims {
    /// `username`, falling back to `globalid`.
    pub username: Option<String>,
    pub scopes: Vec<String>,
    /// The complete verified claim set.
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizationClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Verifies session JWTs and evaluates path policies against their claims.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a validator for `public_key_pem`, or the IdP's key when `None`.
    pub fn new(public_key_pem: Option<&str>) -> Result<Self, ConfigError> {
        let pem = public_key_pem.unwrap_or(DEFAULT_PUBLIC_KEY);
        let key = DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
            ConfigError::Validation(format!("oauth.jwt_public_key is not a valid EC key: {e}"))
        })?;

        // Only the header algorithm configured here is accepted
        let mut validation = Validation::new(Algorithm::ES384);
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self { key, validation })
    }

    /// Verify signature and expiry, then parse the claims.
    pub fn verify_token(&self, token: &str) -> Result<AuthorizationClaims, AuthError> {
        let data = decode::<serde_json::Map<String, serde_json::Value>>(
            token,
            &self.key,
            &self.validation,
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;

        let raw = data.claims;
        let claims: TokenClaims = serde_json::from_value(serde_json::Value::Object(raw.clone()))
            .map_err(|e| {
                tracing::warn!(error = %e, "JWT claims have an unexpected shape");
                AuthError::InvalidToken
            })?;

        let username = claims
            .username
            .filter(|u| !u.is_empty())
            .or(claims.globalid.filter(|g| !g.is_empty()));

        Ok(AuthorizationClaims {
            username,
            scopes: claims.scope.into_vec(),
            raw,
        })
    }

    /// Verify `token` and check it against `policy`.
    ///
    /// Username and scope restrictions must both hold when configured.
    pub fn verify(
        &self,
        policy: &PathPolicy,
        token: &str,
    ) -> Result<AuthorizationClaims, AuthError> {
        let claims = self.verify_token(token)?;

        if !policy.usernames.is_empty() {
            let Some(username) = claims.username.as_deref() else {
                tracing::warn!(path = %policy.prefix, "JWT has no username or globalid claim");
                return Err(AuthError::InvalidToken);
            };
            if !policy.usernames.contains(username) {
                tracing::info!(
                    path = %policy.prefix,
                    username = %username,
                    "User not allowed on protected path"
                );
                return Err(AuthError::Forbidden);
            }
        }

        if let Some(missing) = policy
            .required_scopes
            .iter()
            .find(|scope| !claims.has_scope(scope))
        {
            tracing::info!(
                path = %policy.prefix,
                username = claims.username.as_deref().unwrap_or_default(),
                missing_scope = %missing,
                "Token lacks a required scope"
            );
            return Err(AuthError::Forbidden);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use jsonwebtoken::{EncodingKey, Header, encode};
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        auth::policy::OAuthClientConfig,
        tests::{
            OTHER_P384_PRIVATE_KEY, P256_PRIVATE_KEY, TEST_PUBLIC_KEY, mint_token, now_secs,
        },
    };

    fn validator() -> JwtValidator {
        JwtValidator::new(Some(TEST_PUBLIC_KEY)).unwrap()
    }

    fn policy(usernames: &[&str], scopes: &[&str]) -> PathPolicy {
        PathPolicy {
            prefix: "/private".into(),
            client: Arc::new(OAuthClientConfig {
                client_id: "gateway".into(),
                client_secret: "s3cret".into(),
                redirect_url: "https://example.com/_iyo_callback".into(),
                auth_url: "https://idp.example.com/authorize".into(),
                token_url: "https://idp.example.com/token".into(),
                jwt_url: "https://idp.example.com/jwt".into(),
                scopes: vec![],
            }),
            usernames: usernames.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            required_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_public_key_parses() {
        assert!(JwtValidator::new(None).is_ok());
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        let err = JwtValidator::new(Some("not a pem")).err().unwrap();
        assert!(err.to_string().contains("jwt_public_key"));
    }

    #[test]
    fn test_valid_token() {
        let token = mint_token(json!({
            "username": "alice",
            "scope": ["user:memberof:acme", "user:email"],
            "exp": now_secs() + 3600,
            "iss": "itsyouonline",
        }));

        let claims = validator().verify_token(&token).unwrap();
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert!(claims.has_scope("user:memberof:acme"));
        assert_eq!(claims.raw["iss"], "itsyouonline");
    }

    #[test]
    fn test_globalid_fallback() {
        let token = mint_token(json!({
            "globalid": "acme",
            "exp": now_secs() + 3600,
        }));

        let claims = validator().verify_token(&token).unwrap();
        assert_eq!(claims.username.as_deref(), Some("acme"));
        assert!(claims.scopes.is_empty());
    }

    #[test]
    fn test_scope_string_form() {
        let token = mint_token(json!({
            "username": "alice",
            "scope": "user:memberof:acme,user:email",
            "exp": now_secs() + 3600,
        }));

        let claims = validator().verify_token(&token).unwrap();
        assert_eq!(claims.scopes, vec!["user:memberof:acme", "user:email"]);
    }

    #[test]
    fn test_expired_token() {
        let token = mint_token(json!({
            "username": "alice",
            "exp": now_secs() - 10,
        }));

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_missing_exp_rejected() {
        let token = mint_token(json!({ "username": "alice" }));

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_malformed_scope_claim_rejected() {
        let token = mint_token(json!({
            "username": "alice",
            "scope": {"admin": true},
            "exp": now_secs() + 3600,
        }));

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let claims = json!({ "username": "alice", "exp": now_secs() + 3600 });
        let key = EncodingKey::from_ec_pem(OTHER_P384_PRIVATE_KEY.as_bytes()).unwrap();
        let token = encode(&Header::new(Algorithm::ES384), &claims, &key).unwrap();

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_es256_rejected() {
        let claims = json!({ "username": "alice", "exp": now_secs() + 3600 });
        let key = EncodingKey::from_ec_pem(P256_PRIVATE_KEY.as_bytes()).unwrap();
        let token = encode(&Header::new(Algorithm::ES256), &claims, &key).unwrap();

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_hs256_with_public_key_as_secret_rejected() {
        let claims = json!({ "username": "alice", "exp": now_secs() + 3600 });
        let key = EncodingKey::from_secret(TEST_PUBLIC_KEY.as_bytes());
        let token = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();

        assert!(matches!(
            validator().verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validator().verify_token("not.a.jwt"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[rstest]
    #[case::unrestricted(&[], &[], "bob", &[], true)]
    #[case::username_allowed(&["alice", "bob"], &[], "bob", &[], true)]
    #[case::username_denied(&["alice"], &[], "bob", &[], false)]
    #[case::scope_present(&[], &["user:memberof:acme"], "bob", &["user:memberof:acme", "user:email"], true)]
    #[case::scope_missing(&[], &["user:memberof:acme"], "bob", &["user:email"], false)]
    #[case::all_scopes_required(&[], &["user:memberof:acme", "user:admin"], "bob", &["user:memberof:acme"], false)]
    #[case::both_satisfied(&["bob"], &["user:admin"], "bob", &["user:admin"], true)]
    #[case::username_ok_scope_missing(&["bob"], &["user:admin"], "bob", &[], false)]
    #[case::scope_ok_username_denied(&["alice"], &["user:admin"], "bob", &["user:admin"], false)]
    fn test_policy_evaluation(
        #[case] usernames: &[&str],
        #[case] required: &[&str],
        #[case] username: &str,
        #[case] granted: &[&str],
        #[case] allowed: bool,
    ) {
        let token = mint_token(json!({
            "username": username,
            "scope": granted,
            "exp": now_secs() + 3600,
        }));

        let result = validator().verify(&policy(usernames, required), &token);
        if allowed {
            assert_eq!(result.unwrap().username.as_deref(), Some(username));
        } else {
            assert!(matches!(result, Err(AuthError::Forbidden)), "{result:?}");
        }
    }

    #[test]
    fn test_restricted_usernames_require_identity() {
        let token = mint_token(json!({
            "scope": ["user:admin"],
            "exp": now_secs() + 3600,
        }));

        assert!(matches!(
            validator().verify(&policy(&["alice"], &[]), &token),
            Err(AuthError::InvalidToken)
        ));
    }
}
