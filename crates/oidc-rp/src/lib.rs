//! # OIDC RP - OpenID Connect Relying Party
//!
//! The client side of the OpenID Connect Authorization Code flow: send the
//! browser to the provider, validate what comes back, exchange the code for
//! tokens, verify the ID token and hand the host a normalized [`Identity`].
//!
//! ## Design Principles
//!
//! - **Fail closed**: every check either passes or ends the attempt
//! - **One-time values**: `state` and `nonce` are single-use and are removed
//!   from the session on every terminal outcome
//! - **Issuer binding**: discovered metadata and ID tokens must name the
//!   configured issuer exactly
//! - **Bounded I/O**: every outbound request carries the configured timeout
//!
//! ## Architecture
//!
//! - [`config`] - Relying party configuration
//! - [`discovery`] - OpenID Connect Discovery with a per-issuer cache
//! - [`session`] - Session access and the state/nonce manager
//! - [`oauth2`] - Authorization request builder and token exchange client
//! - [`callback`] - Callback parameter validation
//! - [`jwt`] - ID token verification and JWKS retrieval
//! - [`userinfo`] - UserInfo endpoint client
//! - [`identity`] - Projection of claims into an [`Identity`]
//! - [`flow`] - The [`RelyingParty`] tying it together
//! - [`error`] - Flow errors and their classification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oidc_rp::{CallbackParameters, MemorySession, OidcConfig, RelyingParty};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OidcConfig::new(
//!     "https://idp.example/",
//!     "my-client",
//!     "https://app.example/auth/oidc/callback",
//! )
//! .with_client_secret("s3cret")
//! .with_scopes(["openid", "email", "profile"]);
//!
//! let rp = RelyingParty::new(config)?;
//! let mut session = MemorySession::new();
//!
//! // Request phase: redirect the browser
//! let redirect = rp.authorize(&mut session).await?;
//! println!("Location: {}", redirect.url());
//!
//! // Callback phase: the provider redirected back
//! let params = CallbackParameters::from_query("code=abc&state=xyz");
//! match rp.callback(&params, &mut session).await {
//!     Ok(outcome) => match outcome.identity() {
//!         Some(identity) => println!("Signed in as {}", identity.uid),
//!         None => println!("401 Unauthorized"),
//!     },
//!     Err(failure) => println!("Login failed: {}", failure.kind),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Standards Compliance
//!
//! - **OpenID Connect Core 1.0** - Authorization Code flow, ID token validation
//! - **OpenID Connect Discovery 1.0** - Provider metadata
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 7517** - JSON Web Key (JWK)
//! - **RFC 7519** - JSON Web Token (JWT)
//! - **RFC 7523** - JWT client authentication

pub mod callback;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod identity;
pub mod jwt;
pub mod oauth2;
pub mod session;
pub mod userinfo;

#[doc(inline)]
pub use callback::CallbackParameters;

#[doc(inline)]
pub use config::{ClientAuthMethod, ConfigError, DiscoveryPolicy, OidcConfig, ProviderEndpoints};

#[doc(inline)]
pub use error::{CallbackError, FailureKind, FlowError, FlowFailure};

#[doc(inline)]
pub use flow::{AuthorizationRedirect, CallbackOutcome, RelyingParty};

#[doc(inline)]
pub use identity::{Credentials, Identity, IdentityInfo};

#[doc(inline)]
pub use session::{MemorySession, SessionStore};
