//! HTTP Client Adapter for OAuth2
//!
//! This module provides the HTTP client adapter that bridges reqwest with the
//! oauth2 crate's `AsyncHttpClient` trait. Every outbound call of a login
//! attempt that goes through the oauth2 crate (the code exchange) runs here.
//!
//! ## Security Configuration
//!
//! The adapter is configured to:
//! - NOT follow redirects (SSRF protection per OAuth2 security guidance)
//! - Use rustls for TLS (no OpenSSL dependency)
//! - Always apply a request timeout (no unbounded waits)

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use oauth2::AsyncHttpClient;
use oauth2::http::{self, HeaderValue, StatusCode};

/// Type alias for the HTTP request used by oauth2
pub type HttpRequest = http::Request<Vec<u8>>;
/// Type alias for the HTTP response used by oauth2
pub type HttpResponse = http::Response<Vec<u8>>;

/// Default timeout for outbound provider calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Coarse classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// The request exceeded its timeout
    Timeout,
    /// DNS resolution or connection establishment failed
    Connect,
    /// Anything else (TLS after connect, body decoding, ...)
    Other,
}

/// Classify a reqwest error
pub fn classify_reqwest_error(error: &reqwest::Error) -> TransportFault {
    if error.is_timeout() {
        TransportFault::Timeout
    } else if error.is_connect() {
        TransportFault::Connect
    } else {
        TransportFault::Other
    }
}

/// HTTP client adapter for oauth2 using reqwest
#[derive(Clone)]
pub struct OAuth2HttpClient {
    inner: reqwest::Client,
}

impl OAuth2HttpClient {
    /// Create a new OAuth2 HTTP client with security-hardened defaults
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the client cannot be built
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a specific request timeout
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the client cannot be built
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { inner })
    }

    /// Create from an existing reqwest client
    ///
    /// # Warning
    /// Ensure the client is configured with `redirect::Policy::none()` and a
    /// timeout.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    /// The underlying reqwest client, for calls made outside the oauth2 crate
    pub fn reqwest(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Execute an HTTP request and convert to oauth2 response format
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OAuth2HttpError> {
        let (parts, body) = request.into_parts();

        let url = parts.uri.to_string();
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| OAuth2HttpError::InvalidHeader(format!("Invalid method: {}", parts.method)))?;

        let mut req_builder = self.inner.request(method, &url);

        for (name, value) in parts.headers.iter() {
            req_builder = req_builder.header(name.as_str(), value.as_bytes());
        }

        let response = req_builder.body(body).send().await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|_| OAuth2HttpError::InvalidHeader("Invalid status code".to_string()))?;

        let mut builder = http::Response::builder().status(status);

        for (name, value) in response.headers().iter() {
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| OAuth2HttpError::InvalidHeader(e.to_string()))?;
            builder = builder.header(name.as_str(), header_value);
        }

        let body_bytes = response.bytes().await?;

        builder
            .body(body_bytes.to_vec())
            .map_err(|e| OAuth2HttpError::InvalidHeader(e.to_string()))
    }
}

impl std::fmt::Debug for OAuth2HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2HttpClient")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

/// Error type for HTTP client operations
#[derive(Debug)]
pub enum OAuth2HttpError {
    /// Request execution failed
    Request(reqwest::Error),

    /// Invalid header value
    InvalidHeader(String),
}

impl OAuth2HttpError {
    /// Transport classification of this error
    pub fn fault(&self) -> TransportFault {
        match self {
            Self::Request(e) => classify_reqwest_error(e),
            Self::InvalidHeader(_) => TransportFault::Other,
        }
    }
}

impl std::fmt::Display for OAuth2HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(e) => write!(f, "HTTP request failed: {e}"),
            Self::InvalidHeader(msg) => write!(f, "Invalid header value: {msg}"),
        }
    }
}

impl StdError for OAuth2HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OAuth2HttpError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e)
    }
}

/// Future type for the OAuth2 HTTP client
pub type OAuth2HttpFuture<'c> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, OAuth2HttpError>> + Send + 'c>>;

impl<'c> AsyncHttpClient<'c> for OAuth2HttpClient {
    type Error = OAuth2HttpError;
    type Future = OAuth2HttpFuture<'c>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(async move { self.execute(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(OAuth2HttpClient::new().is_ok());
        assert!(OAuth2HttpClient::with_timeout(Duration::from_millis(250)).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = OAuth2HttpError::InvalidHeader("test".to_string());
        assert!(err.to_string().contains("Invalid header value"));
        assert_eq!(err.fault(), TransportFault::Other);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_fault() {
        let client = OAuth2HttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        let err = client
            .reqwest()
            .get("http://127.0.0.1:1/unreachable")
            .send()
            .await
            .unwrap_err();
        assert_eq!(classify_reqwest_error(&err), TransportFault::Connect);
    }
}
