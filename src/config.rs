//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;
use crate::feed::backoff::BackoffConfig;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Base URL of the backend REST API. Requests are sent to
    /// `{backend_base_url}/api/{path}`.
    pub backend_base_url: Url,

    /// Timeout for establishing a TCP connection to the backend.
    pub backend_connect_timeout: Duration,

    /// Base URL of the upstream price stream (`ws://` or `wss://`).
    pub upstream_ws_base: Url,

    /// Proxied path that issues credentials (relative to the proxy prefix).
    pub login_path: String,

    /// Proxied path that ends the session.
    pub logout_path: String,

    /// Name of the session cookie.
    pub session_cookie_name: String,

    /// Session cookie lifetime.
    pub session_ttl: Duration,

    /// Whether the session cookie carries the `Secure` attribute.
    pub session_cookie_secure: bool,

    /// Reconnect backoff for upstream feeds.
    pub feed_backoff: BackoffConfig,

    /// Upstream WebSocket handshake timeout.
    pub feed_handshake_timeout: Duration,

    /// Outbound tick queue capacity per downstream session.
    pub session_queue_capacity: usize,

    /// Emit logs as JSON instead of human-readable text.
    pub log_json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            backend_base_url: default_url("http://localhost:8000"),
            backend_connect_timeout: Duration::from_secs(10),
            upstream_ws_base: default_url("ws://localhost:8000"),
            login_path: "token".to_string(),
            logout_path: "logout".to_string(),
            session_cookie_name: "access_token".to_string(),
            session_ttl: Duration::from_secs(2 * 60 * 60),
            session_cookie_secure: false,
            feed_backoff: BackoffConfig::default(),
            feed_handshake_timeout: Duration::from_secs(10),
            session_queue_capacity: 256,
            log_json: false,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or a numeric value
    /// cannot be parsed. Calls `dotenvy::dotenv().ok()` to optionally load
    /// a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `LISTEN_ADDR`,
    /// `BACKEND_BASE_URL` or `UPSTREAM_WS_BASE` is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    key: "LISTEN_ADDR",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            Err(_) => defaults.listen_addr,
        };

        let backend_base_url = parse_url_env("BACKEND_BASE_URL", defaults.backend_base_url)?;
        let upstream_ws_base = parse_url_env("UPSTREAM_WS_BASE", defaults.upstream_ws_base)?;

        let feed_backoff = BackoffConfig {
            base_delay: Duration::from_millis(parse_env(
                "FEED_BACKOFF_BASE_MS",
                duration_ms(defaults.feed_backoff.base_delay),
            )),
            max_delay: Duration::from_millis(parse_env(
                "FEED_BACKOFF_MAX_MS",
                duration_ms(defaults.feed_backoff.max_delay),
            )),
            jitter: sanitize_jitter(
                parse_env("FEED_BACKOFF_JITTER", defaults.feed_backoff.jitter),
                defaults.feed_backoff.jitter,
            ),
        };

        Ok(Self {
            listen_addr,
            backend_base_url,
            backend_connect_timeout: Duration::from_secs(parse_env(
                "BACKEND_CONNECT_TIMEOUT_SECS",
                defaults.backend_connect_timeout.as_secs(),
            )),
            upstream_ws_base,
            login_path: parse_path_env("LOGIN_PATH", defaults.login_path),
            logout_path: parse_path_env("LOGOUT_PATH", defaults.logout_path),
            session_cookie_name: std::env::var("SESSION_COOKIE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.session_cookie_name),
            session_ttl: Duration::from_secs(parse_env(
                "SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
            session_cookie_secure: parse_env_bool(
                "SESSION_COOKIE_SECURE",
                defaults.session_cookie_secure,
            ),
            feed_backoff,
            feed_handshake_timeout: Duration::from_secs(parse_env(
                "FEED_HANDSHAKE_TIMEOUT_SECS",
                defaults.feed_handshake_timeout.as_secs(),
            )),
            session_queue_capacity: parse_env(
                "SESSION_QUEUE_CAPACITY",
                defaults.session_queue_capacity,
            )
            .max(1),
            log_json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
        })
    }
}

/// Parses a compile-time constant URL used for defaults.
fn default_url(raw: &'static str) -> Url {
    // The literals passed here are valid absolute URLs.
    Url::parse(raw).unwrap_or_else(|_| unreachable!("invalid default url {raw}"))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parses an environment variable as a URL.
fn parse_url_env(key: &'static str, default: Url) -> Result<Url, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Reads a proxied path, trimming surrounding slashes.
fn parse_path_env(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw == "1" || raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Clamps a jitter fraction into `[0, 1]`. `f64::from_str` accepts
/// `"NaN"` and `"inf"`, which fall back to `default`.
fn sanitize_jitter(raw: f64, default: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        default
    }
}
