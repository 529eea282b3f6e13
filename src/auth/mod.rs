//! Authorization engine: path policies, the OAuth2 login flow, JWT
//! verification and the session cookie.

mod error;
pub mod exchange;
pub mod jwt;
pub mod oauth;
pub mod policy;
pub mod session;

pub use error::{AuthError, ErrorInfo, ErrorResponse};
pub use exchange::{ExchangedToken, TokenExchangeClient};
pub use jwt::{AuthorizationClaims, JwtValidator, ScopeClaim};
pub use oauth::{CallbackParams, OAuthFlowController};
pub use policy::{OAuthClientConfig, PathPolicy, PathPolicyRegistry};
pub use session::{OriginMarker, SessionCredentialStore};
