//! # Provider Discovery Types
//!
//! Types for OpenID Connect Discovery 1.0 provider metadata.

use std::collections::HashMap;
use std::time::SystemTime;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::ProviderEndpoints;

/// Provider metadata errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Invalid issuer URL
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("Invalid field value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// Issuer mismatch between configuration and document
    #[error("Issuer in document ({document}) does not match expected issuer ({expected})")]
    IssuerMismatch { document: String, expected: String },
}

/// OpenID Connect Provider Metadata
///
/// The document served at `{issuer}/.well-known/openid-configuration`.
/// Only the fields the relying party acts on are typed; everything else is
/// kept in `additional_fields`.
///
/// ## Example
///
/// ```json
/// {
///   "issuer": "https://idp.example/",
///   "authorization_endpoint": "https://idp.example/authorize",
///   "token_endpoint": "https://idp.example/token",
///   "userinfo_endpoint": "https://idp.example/userinfo",
///   "jwks_uri": "https://idp.example/jwks",
///   "response_types_supported": ["code"],
///   "subject_types_supported": ["public"],
///   "id_token_signing_alg_values_supported": ["RS256"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderMetadata {
    /// REQUIRED. The provider's issuer identifier
    pub issuer: String,

    /// REQUIRED. URL of the authorization endpoint
    pub authorization_endpoint: String,

    /// URL of the token endpoint. Required for the code flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// RECOMMENDED. URL of the UserInfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// REQUIRED. URL of the provider's JWK Set document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// JSON array of supported scope values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// REQUIRED. JSON array of supported response_type values
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// JSON array of supported response_mode values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modes_supported: Option<Vec<String>>,

    /// REQUIRED. JSON array of supported subject identifier types
    #[serde(default)]
    pub subject_types_supported: Vec<String>,

    /// REQUIRED. JSON array of JWS signing algorithms for ID Tokens
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// JSON array of client authentication methods at the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// RECOMMENDED. JSON array of supported claim names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims_supported: Option<Vec<String>>,

    /// URL of the end-session endpoint (RP-initiated logout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Additional metadata fields
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Validate the document against the issuer it was fetched for
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if validation fails
    pub fn validate(&self, expected_issuer: &str, require_https: bool) -> Result<(), DiscoveryError> {
        let issuer_url = Url::parse(&self.issuer)
            .map_err(|e| DiscoveryError::InvalidIssuer(format!("Invalid issuer URL: {}", e)))?;

        if require_https && issuer_url.scheme() != "https" {
            return Err(DiscoveryError::InvalidIssuer(
                "Issuer MUST use https scheme".to_string(),
            ));
        }

        // OIDC Discovery 1.0 section 4.3: exact match
        if self.issuer != expected_issuer {
            return Err(DiscoveryError::IssuerMismatch {
                document: self.issuer.clone(),
                expected: expected_issuer.to_string(),
            });
        }

        validate_endpoint("authorization_endpoint", &self.authorization_endpoint)?;

        let token_endpoint = self
            .token_endpoint
            .as_deref()
            .ok_or_else(|| DiscoveryError::MissingField("token_endpoint".to_string()))?;
        validate_endpoint("token_endpoint", token_endpoint)?;

        let jwks_uri = self
            .jwks_uri
            .as_deref()
            .ok_or_else(|| DiscoveryError::MissingField("jwks_uri".to_string()))?;
        validate_endpoint("jwks_uri", jwks_uri)?;

        if let Some(ref userinfo_endpoint) = self.userinfo_endpoint {
            validate_endpoint("userinfo_endpoint", userinfo_endpoint)?;
        }

        if !self.response_types_supported.is_empty()
            && !self.response_types_supported.iter().any(|t| t == "code")
        {
            return Err(DiscoveryError::InvalidField {
                field: "response_types_supported".to_string(),
                reason: "provider does not support the authorization code flow".to_string(),
            });
        }

        Ok(())
    }

    /// ID token algorithms advertised by the provider that can be verified
    ///
    /// Unknown names and `none` are dropped.
    pub fn id_token_algorithms(&self) -> Vec<Algorithm> {
        self.id_token_signing_alg_values_supported
            .iter()
            .filter_map(|name| name.parse::<Algorithm>().ok())
            .collect()
    }
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), DiscoveryError> {
    Url::parse(value).map_err(|e| DiscoveryError::InvalidField {
        field: field.to_string(),
        reason: format!("Invalid URL: {}", e),
    })?;
    Ok(())
}

/// Discovery result that passed validation
///
/// Shared behind an `Arc`; a refresh replaces the whole record.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    metadata: ProviderMetadata,
    fetched_at: SystemTime,
}

impl ResolvedProvider {
    /// Validate `metadata` for `issuer` and wrap it
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if validation fails
    pub fn new(
        metadata: ProviderMetadata,
        issuer: &str,
        require_https: bool,
    ) -> Result<Self, DiscoveryError> {
        metadata.validate(issuer, require_https)?;
        Ok(Self {
            metadata,
            fetched_at: SystemTime::now(),
        })
    }

    /// The validated document
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// The issuer
    pub fn issuer(&self) -> &str {
        &self.metadata.issuer
    }

    /// When the document was fetched
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    /// Endpoints to use in place of the statically configured ones
    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            authorization_endpoint: Some(self.metadata.authorization_endpoint.clone()),
            token_endpoint: self.metadata.token_endpoint.clone(),
            userinfo_endpoint: self.metadata.userinfo_endpoint.clone(),
            jwks_uri: self.metadata.jwks_uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> ProviderMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example/",
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": "https://idp.example/token",
            "userinfo_endpoint": "https://idp.example/userinfo",
            "jwks_uri": "https://idp.example/jwks",
            "response_types_supported": ["code", "id_token"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256", "ES256", "none"],
            "frontchannel_logout_supported": true
        }))
        .unwrap()
    }

    #[test]
    fn test_metadata_validation_success() {
        let metadata = document();
        assert!(metadata.validate("https://idp.example/", true).is_ok());
        assert_eq!(
            metadata.additional_fields.get("frontchannel_logout_supported"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn test_metadata_validation_requires_https() {
        let mut metadata = document();
        metadata.issuer = "http://idp.example/".to_string();
        assert!(matches!(
            metadata.validate("http://idp.example/", true),
            Err(DiscoveryError::InvalidIssuer(_))
        ));
        assert!(metadata.validate("http://idp.example/", false).is_ok());
    }

    #[test]
    fn test_issuer_must_match_exactly() {
        let metadata = document();
        assert!(matches!(
            metadata.validate("https://idp.example", true),
            Err(DiscoveryError::IssuerMismatch { .. })
        ));
        assert!(matches!(
            metadata.validate("https://attacker.example/", true),
            Err(DiscoveryError::IssuerMismatch { .. })
        ));
    }

    #[test]
    fn test_token_endpoint_required() {
        let mut metadata = document();
        metadata.token_endpoint = None;
        assert_eq!(
            metadata.validate("https://idp.example/", true),
            Err(DiscoveryError::MissingField("token_endpoint".to_string()))
        );
    }

    #[test]
    fn test_jwks_uri_required() {
        let mut metadata = document();
        metadata.jwks_uri = None;
        assert_eq!(
            metadata.validate("https://idp.example/", true),
            Err(DiscoveryError::MissingField("jwks_uri".to_string()))
        );
    }

    #[test]
    fn test_invalid_endpoint_url() {
        let mut metadata = document();
        metadata.authorization_endpoint = "not a url".to_string();
        assert!(matches!(
            metadata.validate("https://idp.example/", true),
            Err(DiscoveryError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_code_flow_must_be_supported() {
        let mut metadata = document();
        metadata.response_types_supported = vec!["id_token".to_string()];
        assert!(matches!(
            metadata.validate("https://idp.example/", true),
            Err(DiscoveryError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_advertised_algorithms_skip_none() {
        assert_eq!(
            document().id_token_algorithms(),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
    }

    #[test]
    fn test_resolved_endpoints() {
        let resolved = ResolvedProvider::new(document(), "https://idp.example/", true).unwrap();
        let endpoints = resolved.endpoints();
        assert_eq!(
            endpoints.token_endpoint.as_deref(),
            Some("https://idp.example/token")
        );
        assert_eq!(
            endpoints.userinfo_endpoint.as_deref(),
            Some("https://idp.example/userinfo")
        );
        assert_eq!(endpoints.jwks_uri.as_deref(), Some("https://idp.example/jwks"));
        assert_eq!(resolved.issuer(), "https://idp.example/");
    }
}
