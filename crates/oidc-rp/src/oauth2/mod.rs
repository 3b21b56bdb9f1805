//! OAuth 2.0 plumbing for the Authorization Code flow
//!
//! ## Submodules
//!
//! - `client` - authorization URL builder and code exchange on the oauth2 crate
//! - `http_client` - reqwest adapter with timeout and no redirect following
//! - `validation` - redirect URI and one-time value checks

pub mod client;
pub mod http_client;
pub mod validation;

pub use client::{AuthorizationRequest, ExchangeError, OidcClient, TokenSet};
pub use http_client::OAuth2HttpClient;
pub use validation::{one_time_values_match, validate_redirect_uri};
