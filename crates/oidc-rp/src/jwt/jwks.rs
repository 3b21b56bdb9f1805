//! JWKS (JSON Web Key Set) fetching and caching
//!
//! The provider publishes its ID token signing keys at `jwks_uri`. Keys are
//! fetched on first use and cached with a TTL (default 10 minutes). There is
//! no rotation logic beyond the TTL: an unknown `kid` fails verification.
//!
//! # Security Considerations
//!
//! - HTTPS required for JWKS endpoints (HTTP only for loopback hosts)
//! - Redirects are not followed
//! - Requests always carry a timeout

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use jsonwebtoken::jwk::JwkSet;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::oauth2::http_client::{TransportFault, classify_reqwest_error};

/// Default cache TTL
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

/// JWKS fetch errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JwksError {
    /// The JWKS URI is not acceptable
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for loopback): {0}")]
    InsecureUri(String),

    /// The request timed out
    #[error("JWKS request timed out: {0}")]
    Timeout(String),

    /// The endpoint could not be reached
    #[error("Failed to connect to JWKS endpoint: {0}")]
    Connect(String),

    /// The endpoint answered with a non-success status or the request failed
    #[error("JWKS fetch failed: {0}")]
    Http(String),

    /// The body is not a JWK set
    #[error("Invalid JWKS format: {0}")]
    InvalidJson(String),
}

impl JwksError {
    /// Whether the failure was caused by the transport
    pub fn fault(&self) -> TransportFault {
        match self {
            Self::Timeout(_) => TransportFault::Timeout,
            Self::Connect(_) => TransportFault::Connect,
            _ => TransportFault::Other,
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        match classify_reqwest_error(&error) {
            TransportFault::Timeout => Self::Timeout(error.to_string()),
            TransportFault::Connect => Self::Connect(error.to_string()),
            TransportFault::Other => Self::Http(error.to_string()),
        }
    }
}

/// JWKS cache entry with metadata
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: Arc<JwkSet>,
    cached_at: SystemTime,
    ttl: Duration,
}

impl CachedJwks {
    fn is_valid(&self) -> bool {
        match SystemTime::now().duration_since(self.cached_at) {
            Ok(age) => age < self.ttl,
            Err(_) => false, // Clock went backwards, invalidate
        }
    }
}

/// JWKS client for fetching and caching one provider's key set
///
/// # Example
///
/// ```rust,no_run
/// # use oidc_rp::jwt::JwksClient;
/// # tokio_test::block_on(async {
/// let client = JwksClient::new("https://idp.example/jwks", reqwest::Client::new());
///
/// let jwks = client.get_jwks().await?;
/// if let Some(key) = jwks.find("key-id-123") {
///     // Use key for verification
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct JwksClient {
    jwks_uri: String,
    cache: Arc<RwLock<Option<CachedJwks>>>,
    http_client: reqwest::Client,
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a JWKS client with the default TTL
    ///
    /// The HTTP client should have a timeout and no redirect following.
    pub fn new(jwks_uri: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self::with_ttl(jwks_uri, http_client, DEFAULT_JWKS_TTL)
    }

    /// Create a JWKS client with a custom cache TTL
    pub fn with_ttl(
        jwks_uri: impl Into<String>,
        http_client: reqwest::Client,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            cache: Arc::new(RwLock::new(None)),
            http_client,
            cache_ttl,
        }
    }

    /// Get JWKS (from cache or fetch if needed)
    ///
    /// # Errors
    ///
    /// Returns [`JwksError`] if the endpoint is unreachable or the response
    /// is not a JWK set
    pub async fn get_jwks(&self) -> Result<Arc<JwkSet>, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.is_valid()
            {
                debug!(jwks_uri = %self.jwks_uri, "Using cached JWKS");
                return Ok(Arc::clone(&cached.jwks));
            }
        }

        self.fetch_and_cache().await
    }

    /// Fetch JWKS from endpoint and update cache
    async fn fetch_and_cache(&self) -> Result<Arc<JwkSet>, JwksError> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        if !is_acceptable_jwks_uri(&self.jwks_uri) {
            return Err(JwksError::InsecureUri(self.jwks_uri.clone()));
        }

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
                JwksError::from_reqwest(e)
            })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(JwksError::Http(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let body = response.bytes().await.map_err(JwksError::from_reqwest)?;
        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            JwksError::InvalidJson(e.to_string())
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );

        let jwks = Arc::new(jwks);
        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks: Arc::clone(&jwks),
            cached_at: SystemTime::now(),
            ttl: self.cache_ttl,
        });

        Ok(jwks)
    }

    /// Get the JWKS endpoint URI
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Clear the cache
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }
}

fn is_acceptable_jwks_uri(uri: &str) -> bool {
    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };
    match parsed.scheme() {
        "https" => true,
        "http" => matches!(
            parsed.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        ),
        _ => false,
    }
}

/// JWKS clients keyed by `jwks_uri`
///
/// Shared by every attempt of a relying party so the key cache outlives a
/// single callback.
#[derive(Debug, Clone)]
pub struct JwksCache {
    clients: Arc<RwLock<HashMap<String, Arc<JwksClient>>>>,
    http_client: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create an empty cache whose clients use `http_client`
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            http_client,
            ttl: DEFAULT_JWKS_TTL,
        }
    }

    /// Set the TTL for clients created from now on
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get or create the client for a JWKS URI
    pub async fn client(&self, jwks_uri: &str) -> Arc<JwksClient> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(jwks_uri) {
                return Arc::clone(client);
            }
        }

        let mut clients = self.clients.write().await;
        Arc::clone(clients.entry(jwks_uri.to_string()).or_insert_with(|| {
            Arc::new(JwksClient::with_ttl(
                jwks_uri,
                self.http_client.clone(),
                self.ttl,
            ))
        }))
    }
}
