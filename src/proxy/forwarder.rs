//! Request forwarding to the backend REST API.
//!
//! [`RequestForwarder`] mirrors an inbound request to
//! `{backend}/api/{path}`, injecting the bearer credential recovered from
//! the session cookie, and streams the backend response back with its
//! session headers scrubbed. Login and logout responses are special-cased
//! to set and clear the gateway's own session cookie.

use axum::body::Body;
use axum::http::header::{
    AUTHORIZATION, CONTENT_TYPE, HOST, HeaderName, SET_COOKIE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::Url;

use super::session::SessionTranslator;
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Connection-scoped headers never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// An inbound request to forward.
#[derive(Debug)]
pub struct ForwardRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the proxy prefix, without a leading slash.
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    /// Inbound headers, including `Cookie`.
    pub headers: HeaderMap,
    /// Inbound body, streamed to the backend.
    pub body: Body,
}

/// How a forwarded request's response is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Login,
    Logout,
    Plain,
}

/// Forwards requests to the backend with credential translation.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    client: reqwest::Client,
    backend_base: Url,
    translator: SessionTranslator,
    login_path: String,
    logout_path: String,
}

impl RequestForwarder {
    /// Builds a forwarder from gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.backend_connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client: {e}")))?;
        Ok(Self::new(
            client,
            config.backend_base_url.clone(),
            SessionTranslator::from_config(config),
            config.login_path.clone(),
            config.logout_path.clone(),
        ))
    }

    /// Creates a forwarder around an existing client.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        backend_base: Url,
        translator: SessionTranslator,
        login_path: impl Into<String>,
        logout_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            backend_base,
            translator,
            login_path: login_path.into(),
            logout_path: logout_path.into(),
        }
    }

    /// The session translator used for cookies.
    #[must_use]
    pub const fn translator(&self) -> &SessionTranslator {
        &self.translator
    }

    /// Backend URL for a proxied path and query.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if the result is not a
    /// valid URL, or if dot segments (plain or percent-encoded) resolve it
    /// outside the backend's `/api/` tree.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Result<Url, GatewayError> {
        let base = self.backend_base.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let raw = match query {
            Some(q) if !q.is_empty() => format!("{base}/api/{path}?{q}"),
            _ => format!("{base}/api/{path}"),
        };
        let url = Url::parse(&raw).map_err(|e| GatewayError::InvalidRequest(format!("bad proxy path: {e}")))?;
        let api_root = format!("{}/api/", self.backend_base.path().trim_end_matches('/'));
        if !url.path().starts_with(&api_root) {
            return Err(GatewayError::InvalidRequest(format!(
                "proxy path escapes {api_root}: {path}"
            )));
        }
        Ok(url)
    }

    /// Forwards a request and returns the response for the browser.
    ///
    /// Never retries. Backend error statuses pass through unchanged;
    /// transport failures become `502 Bad Gateway` with an empty body.
    pub async fn forward(&self, request: ForwardRequest) -> Response {
        let method = request.method.clone();
        let path = request.path.clone();
        match self.try_forward(request).await {
            Ok(response) => {
                tracing::debug!(%method, path = %path, status = response.status().as_u16(), "proxied");
                response
            }
            Err(e) => {
                tracing::warn!(%method, path = %path, error = %e, "proxy request failed");
                e.into_response()
            }
        }
    }

    async fn try_forward(&self, request: ForwardRequest) -> Result<Response, GatewayError> {
        let route = self.route(&request.method, &request.path);
        let url = self.target_url(&request.path, request.query.as_deref())?;

        let mut headers = scrub_headers(&request.headers, &HOST);
        match self.translator.credential_from_headers(&request.headers) {
            Some(credential) => {
                let value = credential
                    .bearer_header()
                    .map_err(|e| GatewayError::Internal(format!("bearer header: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => tracing::trace!(path = %request.path, "no session cookie; forwarding unauthenticated"),
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if request.method != Method::GET && request.method != Method::HEAD {
            builder = builder.body(reqwest::Body::wrap_stream(request.body.into_data_stream()));
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(e.to_string()))?;

        match route {
            Route::Login => self.finish_login(upstream).await,
            Route::Logout => {
                let mut response = stream_response(upstream);
                let cookie = self.translator.logout_cookie();
                response
                    .headers_mut()
                    .append(SET_COOKIE, cookie_header(&cookie.to_string())?);
                tracing::info!("logout forwarded; session cookie cleared");
                Ok(response)
            }
            Route::Plain => Ok(stream_response(upstream)),
        }
    }

    fn route(&self, method: &Method, path: &str) -> Route {
        if method != Method::POST {
            return Route::Plain;
        }
        let path = path.trim_matches('/');
        if path == self.login_path {
            Route::Login
        } else if path == self.logout_path {
            Route::Logout
        } else {
            Route::Plain
        }
    }

    /// Buffers the login response to look for an issued credential.
    async fn finish_login(&self, upstream: reqwest::Response) -> Result<Response, GatewayError> {
        let status = upstream.status();
        let headers = scrub_headers(upstream.headers(), &SET_COOKIE);
        let body = upstream
            .bytes()
            .await
            .map_err(|e| GatewayError::BackendUnavailable(e.to_string()))?;

        if let Some((session, cookie)) = self.translator.capture_login(&body) {
            tracing::info!(
                backend_status = status.as_u16(),
                expires_at = %session.expires_at(),
                "login captured; session cookie issued"
            );
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = StatusCode::OK;
            let out = response.headers_mut();
            out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            out.insert(SET_COOKIE, cookie_header(&cookie.to_string())?);
            return Ok(response);
        }

        tracing::debug!(backend_status = status.as_u16(), "login response without access_token");
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Streams a backend response back without buffering.
fn stream_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = scrub_headers(upstream.headers(), &SET_COOKIE);
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Copies `headers` without `drop` and hop-by-hop headers.
fn scrub_headers(headers: &HeaderMap, drop: &HeaderName) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == drop || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn cookie_header(raw: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(raw).map_err(|e| GatewayError::Internal(format!("set-cookie header: {e}")))
}
