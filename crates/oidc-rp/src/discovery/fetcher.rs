//! # Discovery Document Fetcher
//!
//! HTTP fetcher for OpenID Connect Discovery 1.0 documents with a
//! process-wide, per-issuer cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{DiscoveryError, ProviderMetadata, ResolvedProvider};
use crate::oauth2::http_client::{TransportFault, classify_reqwest_error};

/// Discovery fetcher errors
#[derive(Debug, Error)]
pub enum FetcherError {
    /// The request did not complete within the configured timeout
    #[error("Discovery request timed out: {0}")]
    Timeout(String),

    /// DNS resolution or TCP/TLS connection failed
    #[error("Failed to connect to discovery endpoint: {0}")]
    Connect(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Response size limit exceeded
    #[error("Response size limit exceeded")]
    ResponseTooLarge,

    /// Invalid JSON response
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    /// Discovery validation failed
    #[error("Discovery validation failed: {0}")]
    ValidationFailed(#[from] DiscoveryError),

    /// Invalid issuer URL
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),
}

impl FetcherError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        match classify_reqwest_error(&error) {
            TransportFault::Timeout => Self::Timeout(error.to_string()),
            TransportFault::Connect => Self::Connect(error.to_string()),
            TransportFault::Other => Self::HttpError(format!("Request failed: {}", error)),
        }
    }
}

/// Configuration for discovery fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum response size in bytes (default: 64KB)
    pub max_response_size: usize,

    /// Request timeout (default: 5 seconds)
    pub request_timeout: Duration,

    /// User agent for HTTP requests
    pub user_agent: String,

    /// Require https issuers (default: true). Only loopback test servers
    /// should turn this off.
    pub require_https: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_response_size: 64 * 1024, // 64 KB
            request_timeout: Duration::from_secs(5),
            user_agent: format!("oidc-rp/{}", env!("CARGO_PKG_VERSION")),
            require_https: true,
        }
    }
}

/// Discovery document fetcher
///
/// Fetches and caches OpenID Connect provider metadata with:
/// - Per-issuer cache held for the lifetime of the fetcher
/// - Whole-record replacement on refresh (readers never see a partial update)
/// - Response size limits
/// - Request timeouts
/// - No redirect following
///
/// One fetcher is meant to be shared process-wide (`Arc<DiscoveryFetcher>`).
pub struct DiscoveryFetcher {
    /// HTTP client
    client: reqwest::Client,

    /// Configuration
    config: FetcherConfig,

    /// Metadata cache
    cache: Arc<DashMap<String, Arc<ResolvedProvider>>>,
}

impl std::fmt::Debug for DiscoveryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryFetcher")
            .field("config", &self.config)
            .field("cached_issuers", &self.cache.len())
            .finish()
    }
}

impl DiscoveryFetcher {
    /// Create a new discovery fetcher with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails
    pub fn new() -> Result<Self, FetcherError> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new discovery fetcher with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails
    pub fn with_config(config: FetcherConfig) -> Result<Self, FetcherError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none()) // Don't follow redirects (security)
            .build()
            .map_err(|e| FetcherError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Resolve provider metadata, serving from cache when possible
    ///
    /// # Errors
    ///
    /// Returns [`FetcherError`] if the document cannot be fetched or is invalid
    pub async fn resolve(&self, issuer: &str) -> Result<Arc<ResolvedProvider>, FetcherError> {
        if let Some(cached) = self.cached(issuer) {
            debug!(issuer = %issuer, "Returning cached discovery metadata");
            return Ok(cached);
        }
        self.fetch(issuer).await
    }

    /// Fetch provider metadata from the network and refresh the cache
    ///
    /// # Errors
    ///
    /// Returns [`FetcherError`] if the document cannot be fetched or is invalid
    pub async fn fetch(&self, issuer: &str) -> Result<Arc<ResolvedProvider>, FetcherError> {
        let issuer_url = url::Url::parse(issuer)
            .map_err(|e| FetcherError::InvalidIssuer(format!("Invalid URL: {}", e)))?;

        if self.config.require_https && issuer_url.scheme() != "https" {
            return Err(FetcherError::InvalidIssuer(
                "Issuer MUST use https scheme".to_string(),
            ));
        }

        let discovery_url = Self::discovery_url(issuer);
        info!(issuer = %issuer, discovery_url = %discovery_url, "Fetching discovery document");

        let response = self
            .client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| {
                warn!(issuer = %issuer, error = %e, "Discovery request failed");
                FetcherError::from_reqwest(e)
            })?;

        if !response.status().is_success() {
            return Err(FetcherError::HttpError(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.config.max_response_size as u64
        {
            return Err(FetcherError::ResponseTooLarge);
        }

        let body = response.bytes().await.map_err(FetcherError::from_reqwest)?;

        if body.len() > self.config.max_response_size {
            return Err(FetcherError::ResponseTooLarge);
        }

        let metadata: ProviderMetadata = serde_json::from_slice(&body)
            .map_err(|e| FetcherError::InvalidJson(format!("Failed to parse JSON: {}", e)))?;

        let resolved = Arc::new(ResolvedProvider::new(
            metadata,
            issuer,
            self.config.require_https,
        )?);

        debug!(issuer = %issuer, "Caching discovery metadata");
        self.cache.insert(issuer.to_string(), Arc::clone(&resolved));

        Ok(resolved)
    }

    /// Build the OIDC Discovery URL
    ///
    /// The well-known suffix is appended to the issuer's path:
    /// `https://example.com/tenant` → `https://example.com/tenant/.well-known/openid-configuration`
    pub fn discovery_url(issuer: &str) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        )
    }

    /// Cached metadata for an issuer, if any
    pub fn cached(&self, issuer: &str) -> Option<Arc<ResolvedProvider>> {
        self.cache.get(issuer).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the cached document of one issuer
    pub fn invalidate(&self, issuer: &str) {
        if self.cache.remove(issuer).is_some() {
            debug!(issuer = %issuer, "Discovery cache entry invalidated");
        }
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cached issuers
    pub fn cached_issuers(&self) -> usize {
        self.cache.len()
    }

    /// The fetcher configuration
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}
