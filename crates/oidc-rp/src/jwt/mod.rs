//! ID token infrastructure
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │         IdTokenVerifier             │
//! │  - algorithm allow-list             │
//! │  - key selection (secret/static/JWKS)│
//! │  - iss / aud / azp / nonce / iat    │
//! └─────────────────────────────────────┘
//!          │                  │
//!   ┌──────┴──────┐    ┌─────┴──────┐
//!   │ jsonwebtoken│    │  JwksCache │
//!   │ (signature, │    │ (TTL cache │
//!   │  exp / nbf) │    │  per URI)  │
//!   └─────────────┘    └────────────┘
//! ```
//!
//! # Modules
//!
//! - `verifier` - ID token verification producing [`VerifiedClaims`]
//! - `jwks` - JWKS fetching & caching

pub mod jwks;
pub mod verifier;

pub use jwks::{JwksCache, JwksClient, JwksError};
pub use verifier::{IdTokenVerifier, VerificationError, VerifiedClaims};

use serde::{Deserialize, Serialize};

/// The `aud` claim: a single string or an array of strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "client"`
    Single(String),
    /// `"aud": ["client", "other"]`
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether `value` is one of the audiences
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(aud) => aud == value,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == value),
        }
    }

    /// Number of audiences
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Multiple(auds) => auds.len(),
        }
    }

    /// Whether there is no audience at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registered claims of an OpenID Connect ID token
///
/// Profile claims are not typed here; they stay in the raw claim map of
/// [`VerifiedClaims`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,

    /// Subject, the stable user identifier at the issuer
    pub sub: String,

    /// Audience
    pub aud: Audience,

    /// Expiration Time - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Issued At - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Not Before - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Nonce echoed from the authorization request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authorized party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Time of the end-user authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<u64>,

    /// Authentication context class reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
}
