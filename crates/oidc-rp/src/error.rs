//! Flow errors and their classification
//!
//! Every failure of a login attempt ends up as a [`FlowError`]. The host only
//! needs the coarse [`FailureKind`] to pick a response; the error itself is
//! kept for logging.
//!
//! A callback whose `state` does not match is not an error: it is answered
//! with a 401 directly (see [`CallbackOutcome::Unauthorized`]).
//!
//! [`CallbackOutcome::Unauthorized`]: crate::flow::CallbackOutcome::Unauthorized

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::discovery::FetcherError;
use crate::jwt::{JwksError, VerificationError};
use crate::oauth2::ExchangeError;
use crate::oauth2::http_client::TransportFault;
use crate::userinfo::UserInfoError;

/// Error reported by the provider in the callback parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CallbackError {
    /// OAuth error code (`access_denied`, ...)
    pub error: String,
    /// Human readable description
    pub description: Option<String>,
    /// Page with more information
    pub uri: Option<String>,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            Some(self.error.as_str()),
            self.description.as_deref(),
            self.uri.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        f.write_str(&parts.join(" | "))
    }
}

/// Any failure of a login attempt
#[derive(Debug, Error)]
pub enum FlowError {
    /// Provider metadata could not be resolved
    #[error("Discovery failed for {issuer}: {source}")]
    DiscoveryFailed {
        /// Issuer being resolved
        issuer: String,
        /// Underlying failure
        #[source]
        source: FetcherError,
    },

    /// The provider redirected back with an error
    #[error("Provider returned an error: {0}")]
    Callback(CallbackError),

    /// An outbound request exceeded the configured timeout
    #[error("Request to the provider timed out: {0}")]
    Timeout(String),

    /// The provider could not be reached
    #[error("Failed to connect to the provider: {0}")]
    Connection(String),

    /// The token endpoint did not return usable tokens
    #[error("Token exchange failed: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenExchangeFailed {
        /// OAuth error code or a local reason
        error: String,
        /// Human readable description
        description: Option<String>,
    },

    /// The ID token failed verification
    #[error("ID token verification failed: {0}")]
    TokenVerificationFailed(#[from] VerificationError),

    /// The callback carried a valid state but no code
    #[error("Callback is missing the authorization code")]
    MissingAuthorizationCode,

    /// The UserInfo request failed or returned another subject
    #[error("UserInfo request failed: {0}")]
    UserInfo(#[from] UserInfoError),

    /// The configuration cannot drive a flow
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
}

/// Caller-visible classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The login attempt is rejected
    InvalidCredentials,
    /// A provider call timed out
    Timeout,
    /// The provider could not be reached
    FailedToConnect,
}

impl FailureKind {
    /// Stable name, suitable for a failure redirect query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::Timeout => "timeout",
            Self::FailedToConnect => "failed_to_connect",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transport_kind(fault: TransportFault) -> Option<FailureKind> {
    match fault {
        TransportFault::Timeout => Some(FailureKind::Timeout),
        TransportFault::Connect => Some(FailureKind::FailedToConnect),
        TransportFault::Other => None,
    }
}

impl FlowError {
    /// Classify the error for the host
    ///
    /// Transport-caused failures of discovery, key fetching and UserInfo are
    /// classified by their cause; everything else is invalid credentials.
    pub fn kind(&self) -> FailureKind {
        let transport = match self {
            Self::Timeout(_) => Some(FailureKind::Timeout),
            Self::Connection(_) => Some(FailureKind::FailedToConnect),
            Self::DiscoveryFailed { source, .. } => match source {
                FetcherError::Timeout(_) => Some(FailureKind::Timeout),
                FetcherError::Connect(_) => Some(FailureKind::FailedToConnect),
                _ => None,
            },
            Self::TokenVerificationFailed(VerificationError::KeySet(e)) => transport_kind(e.fault()),
            Self::UserInfo(e) => transport_kind(e.fault()),
            _ => None,
        };
        transport.unwrap_or(FailureKind::InvalidCredentials)
    }
}

impl From<ExchangeError> for FlowError {
    fn from(error: ExchangeError) -> Self {
        match error {
            ExchangeError::Timeout(message) => Self::Timeout(message),
            ExchangeError::Connect(message) => Self::Connection(message),
            ExchangeError::Rejected { error, description } => {
                Self::TokenExchangeFailed { error, description }
            }
            ExchangeError::MissingIdToken => Self::TokenExchangeFailed {
                error: "missing_id_token".to_string(),
                description: Some(ExchangeError::MissingIdToken.to_string()),
            },
            other => Self::TokenExchangeFailed {
                error: "invalid_response".to_string(),
                description: Some(other.to_string()),
            },
        }
    }
}

impl From<JwksError> for FlowError {
    fn from(error: JwksError) -> Self {
        Self::TokenVerificationFailed(VerificationError::KeySet(error))
    }
}

/// A failed attempt as handed to the host
///
/// Produced by the single failure handler, after the session has been
/// cleared of the attempt's state and nonce.
#[derive(Debug, Error)]
#[error("{kind}: {error}")]
pub struct FlowFailure {
    /// Classification
    pub kind: FailureKind,
    /// Underlying error
    #[source]
    pub error: FlowError,
}

impl From<FlowError> for FlowFailure {
    fn from(error: FlowError) -> Self {
        Self {
            kind: error.kind(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_error_display() {
        let err = CallbackError {
            error: "access_denied".to_string(),
            description: Some("User denied access".to_string()),
            uri: None,
        };
        assert_eq!(err.to_string(), "access_denied | User denied access");

        let bare = CallbackError {
            error: "access_denied".to_string(),
            description: None,
            uri: Some("https://idp.example/help".to_string()),
        };
        assert_eq!(bare.to_string(), "access_denied | https://idp.example/help");
    }

    #[test]
    fn test_exchange_errors_keep_transport_cause() {
        let timeout: FlowError = ExchangeError::Timeout("slow".into()).into();
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let connect: FlowError = ExchangeError::Connect("refused".into()).into();
        assert_eq!(connect.kind(), FailureKind::FailedToConnect);

        let rejected: FlowError = ExchangeError::Rejected {
            error: "invalid_grant".into(),
            description: None,
        }
        .into();
        assert_eq!(rejected.kind(), FailureKind::InvalidCredentials);
        assert!(matches!(rejected, FlowError::TokenExchangeFailed { ref error, .. } if error == "invalid_grant"));

        let missing: FlowError = ExchangeError::MissingIdToken.into();
        assert_eq!(missing.kind(), FailureKind::InvalidCredentials);
    }

    #[test]
    fn test_discovery_classification() {
        let timeout = FlowError::DiscoveryFailed {
            issuer: "https://idp.example/".into(),
            source: FetcherError::Timeout("slow".into()),
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let invalid = FlowError::DiscoveryFailed {
            issuer: "https://idp.example/".into(),
            source: FetcherError::InvalidJson("eof".into()),
        };
        assert_eq!(invalid.kind(), FailureKind::InvalidCredentials);
    }

    #[test]
    fn test_verification_classification() {
        let forged: FlowError = VerificationError::NonceMismatch.into();
        assert_eq!(forged.kind(), FailureKind::InvalidCredentials);

        let keys: FlowError = JwksError::Connect("refused".into()).into();
        assert_eq!(keys.kind(), FailureKind::FailedToConnect);
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(FailureKind::InvalidCredentials.to_string(), "invalid_credentials");
        assert_eq!(FailureKind::Timeout.as_str(), "timeout");
        assert_eq!(FailureKind::FailedToConnect.as_str(), "failed_to_connect");
    }
}
