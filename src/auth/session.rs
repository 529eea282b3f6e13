//! Cookie-backed session credential and login origin marker.

use tower_cookies::{
    Cookie, Cookies,
    cookie::{
        SameSite as CookieSameSite,
        time::{Duration as CookieDuration, OffsetDateTime},
    },
};

use crate::config::{SameSite, SessionConfig};

fn cookie_same_site(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

/// Reads and writes the session cookie carrying the JWT.
pub struct SessionCredentialStore<'a> {
    cookies: &'a Cookies,
    config: &'a SessionConfig,
}

impl<'a> SessionCredentialStore<'a> {
    pub fn new(cookies: &'a Cookies, config: &'a SessionConfig) -> Self {
        Self { cookies, config }
    }

    /// Store `token` for `expiry_secs` seconds.
    ///
    /// A zero expiry also pins `Expires` to the epoch so clients that ignore
    /// `Max-Age` drop the cookie too.
    pub fn set(&self, token: &str, expiry_secs: u64) {
        let max_age = i64::try_from(expiry_secs).unwrap_or(i64::MAX);
        let mut cookie: Cookie<'static> =
            Cookie::build((self.config.cookie_name.clone(), token.to_string()))
                .path("/")
                .http_only(self.config.http_only)
                .secure(self.config.secure)
                .same_site(cookie_same_site(self.config.same_site))
                .max_age(CookieDuration::seconds(max_age))
                .build();
        if expiry_secs == 0 {
            cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        }

        self.cookies.add(cookie);
    }

    /// Current credential, or `None` when absent or cleared.
    pub fn get(&self) -> Option<String> {
        self.cookies
            .get(&self.config.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn clear(&self) {
        self.set("", 0);
    }
}

/// Transient cookie remembering the path a user asked for before logging in.
pub struct OriginMarker<'a> {
    cookies: &'a Cookies,
    config: &'a SessionConfig,
}

impl<'a> OriginMarker<'a> {
    pub fn new(cookies: &'a Cookies, config: &'a SessionConfig) -> Self {
        Self { cookies, config }
    }

    pub fn save(&self, path: &str) {
        let cookie: Cookie<'static> =
            Cookie::build((self.config.origin_cookie_name.clone(), path.to_string()))
                .path("/")
                .http_only(true)
                .secure(self.config.secure)
                .same_site(CookieSameSite::Lax)
                .build();
        self.cookies.add(cookie);
    }

    /// Saved path without consuming it.
    pub fn peek(&self) -> Option<String> {
        self.cookies
            .get(&self.config.origin_cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Consume the saved path, clearing the cookie.
    pub fn take(&self) -> Option<String> {
        let origin = self.peek();

        let mut removal: Cookie<'static> =
            Cookie::build((self.config.origin_cookie_name.clone(), ""))
                .path("/")
                .http_only(true)
                .secure(self.config.secure)
                .same_site(CookieSameSite::Lax)
                .max_age(CookieDuration::ZERO)
                .build();
        removal.set_expires(OffsetDateTime::UNIX_EPOCH);
        self.cookies.add(removal);

        origin
    }
}
