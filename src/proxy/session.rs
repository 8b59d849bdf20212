//! Session translation between the browser cookie and the backend bearer
//! credential.
//!
//! The browser only ever holds the credential inside an `HttpOnly` cookie.
//! [`SessionTranslator`] reads it back out on every proxied request and,
//! when a login response carries an `access_token`, turns it into a
//! cookie-setting instruction.

use std::fmt;
use std::time::Duration;

use axum::http::header::{COOKIE, InvalidHeaderValue};
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use serde::Deserialize;

use crate::config::GatewayConfig;

/// Opaque bearer token proving identity to the backend.
///
/// `Debug` is redacted so the credential never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Builds the `Authorization: Bearer …` header value.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeaderValue`] if the token contains bytes that are
    /// not allowed in a header value.
    pub fn bearer_header(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A login session issued through the gateway.
#[derive(Debug, Clone)]
pub struct Session {
    credential: Credential,
    issued_at: DateTime<Utc>,
    ttl: Duration,
}

impl Session {
    /// Starts a session now.
    #[must_use]
    pub fn issue(credential: Credential, ttl: Duration) -> Self {
        Self {
            credential,
            issued_at: Utc::now(),
            ttl,
        }
    }

    /// The backend credential.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// When the session was issued.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Session lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// When the session cookie expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Login response fields the gateway looks at.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Translates between the session cookie and the bearer credential.
#[derive(Debug, Clone)]
pub struct SessionTranslator {
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl SessionTranslator {
    /// Creates a translator for the named cookie.
    #[must_use]
    pub fn new(cookie_name: impl Into<String>, ttl: Duration, secure: bool) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            ttl,
            secure,
        }
    }

    /// Creates a translator from gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.session_cookie_name.clone(),
            config.session_ttl,
            config.session_cookie_secure,
        )
    }

    /// Name of the session cookie.
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Turns a raw cookie value into a credential.
    ///
    /// Never fails: missing, empty or malformed values yield `None`.
    #[must_use]
    pub fn translate_inbound(&self, cookie_value: Option<&str>) -> Option<Credential> {
        let value = cookie_value?;
        let well_formed = !value.is_empty()
            && value
                .bytes()
                .all(|b| b.is_ascii_graphic() && !matches!(b, b'"' | b',' | b';' | b'\\'));
        well_formed.then(|| Credential(value.to_string()))
    }

    /// Finds the session cookie among the request's `Cookie` headers.
    #[must_use]
    pub fn credential_from_headers(&self, headers: &HeaderMap) -> Option<Credential> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == self.cookie_name)
            .and_then(|cookie| self.translate_inbound(Some(cookie.value())))
    }

    /// Inspects a login response body for an `access_token`.
    ///
    /// The presence of a well-formed token is treated as a successful
    /// login. Returns the new session and the cookie that carries it.
    #[must_use]
    pub fn capture_login(&self, body: &[u8]) -> Option<(Session, Cookie<'static>)> {
        let response: LoginResponse = serde_json::from_slice(body).ok()?;
        let credential = self.translate_inbound(response.access_token.as_deref())?;
        let session = Session::issue(credential, self.ttl);
        let cookie = self.session_cookie(&session);
        Some((session, cookie))
    }

    /// `HttpOnly`, `SameSite=Lax`, root-path cookie carrying the session.
    #[must_use]
    pub fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        let max_age = i64::try_from(session.ttl().as_secs()).unwrap_or(i64::MAX);
        Cookie::build((self.cookie_name.clone(), session.credential().expose().to_string()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure)
            .max_age(cookie::time::Duration::seconds(max_age))
            .build()
    }

    /// Cookie instruction that removes the session cookie.
    #[must_use]
    pub fn logout_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.cookie_name.clone(), String::new()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .secure(self.secure)
            .build();
        cookie.make_removal();
        cookie
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn translator() -> SessionTranslator {
        SessionTranslator::new("access_token", Duration::from_secs(7200), false)
    }

    #[test]
    fn translate_inbound_accepts_tokens() {
        let credential = translator().translate_inbound(Some("eyJhbGciOi.abc-DEF_123"));
        assert_eq!(
            credential.as_ref().map(Credential::expose),
            Some("eyJhbGciOi.abc-DEF_123")
        );
    }

    #[test]
    fn translate_inbound_rejects_missing_and_malformed() {
        let t = translator();
        assert!(t.translate_inbound(None).is_none());
        assert!(t.translate_inbound(Some("")).is_none());
        assert!(t.translate_inbound(Some("two words")).is_none());
        assert!(t.translate_inbound(Some("line\nbreak")).is_none());
        assert!(t.translate_inbound(Some("semi;colon")).is_none());
    }

    #[test]
    fn credential_from_headers_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; access_token=abc"));
        let credential = translator().credential_from_headers(&headers);
        assert_eq!(credential.as_ref().map(Credential::expose), Some("abc"));
    }

    #[test]
    fn credential_from_headers_without_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        assert!(translator().credential_from_headers(&headers).is_none());
        assert!(translator().credential_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn capture_login_issues_http_only_cookie() {
        let Some((session, cookie)) = translator().capture_login(br#"{"access_token":"abc","token_type":"bearer"}"#)
        else {
            panic!("token should be captured");
        };
        assert_eq!(session.credential().expose(), "abc");
        assert_eq!(cookie.name(), "access_token");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::hours(2)));

        let header = cookie.to_string();
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Max-Age=7200"));
    }

    #[test]
    fn capture_login_without_token() {
        let t = translator();
        assert!(t.capture_login(br#"{"detail":"Incorrect username or password"}"#).is_none());
        assert!(t.capture_login(br#"{"access_token":""}"#).is_none());
        assert!(t.capture_login(br#"{"access_token":42}"#).is_none());
        assert!(t.capture_login(b"<html>").is_none());
    }

    #[test]
    fn logout_cookie_expires_immediately() {
        let cookie = translator().logout_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(cookie::time::Duration::ZERO));
        assert!(cookie.to_string().contains("Max-Age=0"));
    }

    #[test]
    fn session_expiry_follows_ttl() {
        let Some(credential) = translator().translate_inbound(Some("abc")) else {
            panic!("valid credential");
        };
        let session = Session::issue(credential, Duration::from_secs(7200));
        assert_eq!(session.expires_at() - session.issued_at(), chrono::Duration::hours(2));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let Some(credential) = translator().translate_inbound(Some("secret")) else {
            panic!("valid credential");
        };
        assert!(!format!("{credential:?}").contains("secret"));
    }
}
