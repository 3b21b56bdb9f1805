//! # Provider Discovery
//!
//! Support for OpenID Connect Discovery 1.0.
//!
//! ## Overview
//!
//! When discovery is enabled, the relying party never builds an authorization
//! request or calls the token endpoint with statically configured endpoints:
//! the endpoint set is taken, as a whole, from the provider's discovery
//! document. A failed fetch or an invalid document aborts the attempt; there
//! is no fallback to stale or default endpoints.
//!
//! ## Security Features
//!
//! - **Issuer binding**: the document's `issuer` must equal the configured issuer
//! - **Size Limits**: Response size capped at 64KB (configurable)
//! - **Timeouts**: 5-second request timeout (configurable)
//! - **No Redirects**: Redirect following disabled for security
//! - **HTTPS Only**: Issuer URLs must use HTTPS scheme
//!
//! ## Caching Strategy
//!
//! - Per-issuer cache kept for the lifetime of the fetcher
//! - Refreshed only on explicit invalidation, or on every request under
//!   [`DiscoveryPolicy::FetchPerRequest`](crate::config::DiscoveryPolicy)
//! - Entries are `Arc`s replaced whole, so concurrent readers never observe a
//!   half-updated record
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use oidc_rp::discovery::DiscoveryFetcher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = DiscoveryFetcher::new()?;
//! let provider = fetcher.resolve("https://accounts.google.com").await?;
//!
//! let endpoints = provider.endpoints();
//! println!("token endpoint: {:?}", endpoints.token_endpoint);
//! # Ok(())
//! # }
//! ```

mod fetcher;
mod types;

pub use fetcher::{DiscoveryFetcher, FetcherConfig, FetcherError};
pub use types::{DiscoveryError, ProviderMetadata, ResolvedProvider};
