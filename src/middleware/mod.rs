mod authorize;

pub use authorize::{TOKEN_HEADER, USERNAME_HEADER, authorize_middleware};
