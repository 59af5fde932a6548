//! HTTP transport for the remote JSON API
//!
//! This module handles all HTTP requests for the archiver, including:
//! - Building HTTP clients with the configured user agent and proxy
//! - GET requests against the anonymous or authenticated API root
//! - Rate-limit header extraction
//! - Error classification
//!
//! Nothing here retries; the scheduler decides what happens after a failure.

use crate::config::{ApiConfig, ProxyConfig};
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single API request
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request timed out: {url}")]
    Timeout { url: String },

    #[error("Rate limited by {url}")]
    RateLimited {
        url: String,
        /// How long the remote asked us to wait, if it said
        reset: Option<Duration>,
    },

    #[error("Authentication required for {url} (HTTP {status})")]
    AuthRequired { url: String, status: u16 },

    #[error("Server error for {url} (HTTP {status})")]
    ServerError { url: String, status: u16 },

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Unexpected HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Returns true if the same request may succeed when sent again
    ///
    /// `RateLimited` is not counted here: it is always retried after a cooldown
    /// and never consumes a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::ServerError { .. }
        )
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Quota information the API attaches to its responses
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHint {
    /// Requests left in the current window (`x-ratelimit-remaining`)
    pub remaining: Option<f64>,

    /// Time until the window resets (`retry-after`, else `x-ratelimit-reset`)
    pub reset: Option<Duration>,
}

impl RateLimitHint {
    /// Reads the quota headers of a response
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
        };

        Self {
            remaining: number("x-ratelimit-remaining"),
            reset: number("retry-after")
                .or_else(|| number("x-ratelimit-reset"))
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    /// Returns true if the quota for the current window is used up
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_some_and(|r| r < 1.0)
    }
}

/// A GET request relative to the API root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path starting with `/`, e.g. `/r/rust/new.json`
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Adds a query parameter
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// A decoded API response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub url: String,
    pub body: Value,
    pub rate_limit: RateLimitHint,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `api` - User agent and timeout settings
/// * `proxy` - Optional proxy; certificate checks are only relaxed when one is set
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. unparseable proxy URI)
///
/// # Example
///
/// ```no_run
/// use thread_archiver::config::{ApiConfig, ProxyConfig};
/// use thread_archiver::crawler::build_http_client;
///
/// let client = build_http_client(&ApiConfig::default(), &ProxyConfig::default()).unwrap();
/// ```
pub fn build_http_client(api: &ApiConfig, proxy: &ProxyConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(api.user_agent.clone())
        .timeout(Duration::from_secs(api.timeout))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(url) = &proxy.url {
        builder = builder.proxy(Proxy::all(url.as_str())?);
        if !proxy.reject_unauthorized_tls {
            tracing::warn!("TLS certificate validation disabled for proxied requests");
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build()
}

/// Maps a non-success status to its transport error
pub(crate) fn classify_status(url: &str, status: StatusCode, headers: &HeaderMap) -> TransportError {
    let url = url.to_string();
    let code = status.as_u16();

    match status {
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited {
            url,
            reset: RateLimitHint::from_headers(headers).reset,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::AuthRequired { url, status: code }
        }
        StatusCode::NOT_FOUND => TransportError::NotFound { url },
        s if s.is_server_error() => TransportError::ServerError { url, status: code },
        _ => TransportError::Status { url, status: code },
    }
}

/// Sends API requests against one root, optionally authenticated
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    base_url: String,
    bearer: Option<String>,
}

impl Fetcher {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            bearer: None,
        }
    }

    /// Sends `Authorization: bearer <token>` on every request
    pub fn with_bearer(mut self, token: String) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Full URL for an API path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Sends one GET request and decodes its JSON body
    ///
    /// # Error mapping
    ///
    /// | Condition | Error |
    /// |-----------|-------|
    /// | HTTP 429 | `RateLimited` (with reset hint) |
    /// | HTTP 401/403 | `AuthRequired` |
    /// | HTTP 404 | `NotFound` |
    /// | HTTP 5xx | `ServerError` |
    /// | other non-2xx | `Status` |
    /// | timeout | `Timeout` |
    /// | connection failure | `Network` |
    /// | body is not JSON | `Decode` |
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path);
        tracing::trace!("GET {} {:?}", url, request.query);

        let mut builder = self
            .client
            .get(&url)
            .query(&request.query)
            .query(&[("raw_json", "1")]);
        if let Some(token) = &self.bearer {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(&url, status, response.headers()));
        }

        let rate_limit = RateLimitHint::from_headers(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let body = serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        Ok(ApiResponse {
            url,
            body,
            rate_limit,
        })
    }
}
