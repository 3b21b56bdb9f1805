//! Relying Party Configuration
//!
//! This module contains the configuration surface of the relying party: client
//! credentials, the provider's issuer and (optionally) its endpoints, the
//! authorization request parameters and the verification policy.
//!
//! Configuration can be deserialized (every optional field has a serde default)
//! or built in code:
//!
//! ```rust
//! use oidc_rp::config::{ClientAuthMethod, OidcConfig};
//!
//! let config = OidcConfig::new(
//!     "https://idp.example/",
//!     "my-client",
//!     "https://app.example/auth/oidc/callback",
//! )
//! .with_client_secret("s3cret")
//! .with_scopes(["openid", "email", "profile"])
//! .with_client_auth_method(ClientAuthMethod::ClientSecretPost);
//!
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::JwkSet;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::oauth2::validation::validate_redirect_uri;

/// Configuration validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is empty
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    /// A field holds a value the relying party cannot work with
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// How the relying party treats cached discovery documents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPolicy {
    /// Fetch once per issuer and reuse until invalidated
    #[default]
    CachePerIssuer,
    /// Fetch on every authorization request and every callback
    FetchPerRequest,
}

/// Client authentication method used at the token endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// HTTP Basic authentication with client id and secret
    #[default]
    ClientSecretBasic,
    /// Client id and secret in the form body
    ClientSecretPost,
    /// HS256 client assertion signed with the client secret
    ClientSecretJwt,
    /// RS256 client assertion signed with a private key
    PrivateKeyJwt,
}

impl ClientAuthMethod {
    /// Registered name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretJwt => "client_secret_jwt",
            Self::PrivateKeyJwt => "private_key_jwt",
        }
    }
}

/// Provider endpoints
///
/// When discovery is enabled these are overwritten, as a whole, by the values
/// fetched from the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Authorization endpoint (browser redirect target)
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// UserInfo endpoint
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// JWK Set document
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

/// OpenID Connect relying party configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Client identifier issued by the provider
    pub client_id: String,
    /// Client secret (empty for clients that authenticate with a private key)
    #[serde(
        default = "empty_secret",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Issuer identifier, compared exactly against the `iss` claim
    pub issuer: String,
    /// Resolve endpoints through the discovery document
    #[serde(default = "default_true")]
    pub discovery: bool,
    /// Discovery caching policy
    #[serde(default)]
    pub discovery_policy: DiscoveryPolicy,
    /// Statically configured endpoints (required when discovery is off)
    #[serde(default)]
    pub endpoints: ProviderEndpoints,
    /// Accepted ID token signing algorithms. Empty means "negotiate from discovery"
    #[serde(default)]
    pub signing_algorithms: Vec<Algorithm>,
    /// Static verification keys, used instead of the provider's JWKS
    #[serde(default)]
    pub jwk_signing_keys: Option<JwkSet>,
    /// Static PEM public key, used instead of the provider's JWKS
    #[serde(default)]
    pub public_key_pem: Option<String>,
    /// Requested scopes; `openid` is always sent first
    #[serde(default = "default_scope")]
    pub scope: Vec<String>,
    /// Response type. Only `code` is supported
    #[serde(default = "default_response_type")]
    pub response_type: String,
    /// Response mode (`query`, `form_post`, ...)
    #[serde(default)]
    pub response_mode: Option<String>,
    /// Display hint
    #[serde(default)]
    pub display: Option<String>,
    /// Prompt hint
    #[serde(default)]
    pub prompt: Option<String>,
    /// Hosted-domain restriction
    #[serde(default)]
    pub hd: Option<String>,
    /// Maximum authentication age in seconds
    #[serde(default)]
    pub max_age: Option<u64>,
    /// Preferred UI locales
    #[serde(default)]
    pub ui_locales: Option<String>,
    /// Previously issued ID token passed as a hint
    #[serde(default)]
    pub id_token_hint: Option<String>,
    /// Login hint
    #[serde(default)]
    pub login_hint: Option<String>,
    /// Requested ACR values
    #[serde(default)]
    pub acr_values: Option<String>,
    /// Send (and later require) a nonce
    #[serde(default = "default_true")]
    pub send_nonce: bool,
    /// Repeat the requested scope in the token request
    #[serde(default = "default_true")]
    pub send_scope_to_token_endpoint: bool,
    /// Token endpoint client authentication
    #[serde(default)]
    pub client_auth_method: ClientAuthMethod,
    /// PEM private key for `private_key_jwt`
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub client_assertion_key_pem: Option<SecretString>,
    /// Fetch the UserInfo endpoint after verification
    #[serde(default = "default_true")]
    pub fetch_userinfo: bool,
    /// Outbound request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Clock skew tolerance for temporal claims, in seconds
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// How long a fetched provider key set is reused, in seconds
    #[serde(default = "default_jwks_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_true() -> bool {
    true
}

fn default_scope() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_response_type() -> String {
    "code".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_clock_skew_secs() -> u64 {
    60
}

fn default_jwks_cache_ttl_secs() -> u64 {
    600
}

// Custom serialization for SecretString
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

fn serialize_optional_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}

impl OidcConfig {
    /// Create a configuration with defaults for everything but the essentials
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: empty_secret(),
            redirect_uri: redirect_uri.into(),
            issuer: issuer.into(),
            discovery: true,
            discovery_policy: DiscoveryPolicy::default(),
            endpoints: ProviderEndpoints::default(),
            signing_algorithms: Vec::new(),
            jwk_signing_keys: None,
            public_key_pem: None,
            scope: default_scope(),
            response_type: default_response_type(),
            response_mode: None,
            display: None,
            prompt: None,
            hd: None,
            max_age: None,
            ui_locales: None,
            id_token_hint: None,
            login_hint: None,
            acr_values: None,
            send_nonce: true,
            send_scope_to_token_endpoint: true,
            client_auth_method: ClientAuthMethod::default(),
            client_assertion_key_pem: None,
            fetch_userinfo: true,
            request_timeout_ms: default_request_timeout_ms(),
            clock_skew_secs: default_clock_skew_secs(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl_secs(),
        }
    }

    /// Set the client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = SecretString::new(secret.into());
        self
    }

    /// Disable discovery and use the given endpoints
    pub fn with_static_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.discovery = false;
        self.endpoints = endpoints;
        self
    }

    /// Set the discovery caching policy
    pub fn with_discovery_policy(mut self, policy: DiscoveryPolicy) -> Self {
        self.discovery_policy = policy;
        self
    }

    /// Set the requested scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict accepted ID token algorithms
    pub fn with_signing_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.signing_algorithms = algorithms;
        self
    }

    /// Verify ID tokens against a static JWK set
    pub fn with_jwk_signing_keys(mut self, keys: JwkSet) -> Self {
        self.jwk_signing_keys = Some(keys);
        self
    }

    /// Set the token endpoint client authentication method
    pub fn with_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.client_auth_method = method;
        self
    }

    /// Set the PEM private key used for `private_key_jwt`
    pub fn with_client_assertion_key(mut self, pem: impl Into<String>) -> Self {
        self.client_assertion_key_pem = Some(SecretString::new(pem.into()));
        self
    }

    /// Enable or disable the UserInfo request
    pub fn with_userinfo(mut self, enabled: bool) -> Self {
        self.fetch_userinfo = enabled;
        self
    }

    /// Set the outbound request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Outbound request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Clock skew tolerance
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Set how long a fetched key set is reused; zero refetches every time
    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Key set cache lifetime
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    /// Whether a client secret was configured
    pub fn has_client_secret(&self) -> bool {
        !self.client_secret.expose_secret().is_empty()
    }

    /// Requested scopes as an ordered set that always starts with `openid`
    pub fn requested_scopes(&self) -> Vec<String> {
        let mut scopes = vec!["openid".to_string()];
        for scope in &self.scope {
            let scope = scope.trim();
            if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("issuer"));
        }
        url::Url::parse(&self.issuer).map_err(|e| ConfigError::Invalid {
            field: "issuer",
            reason: e.to_string(),
        })?;

        if self.response_type != "code" {
            return Err(ConfigError::Invalid {
                field: "response_type",
                reason: format!(
                    "only the authorization code flow is supported, got '{}'",
                    self.response_type
                ),
            });
        }

        validate_redirect_uri(&self.redirect_uri).map_err(|reason| ConfigError::Invalid {
            field: "redirect_uri",
            reason,
        })?;

        if !self.discovery {
            if self.endpoints.authorization_endpoint.is_none() {
                return Err(ConfigError::Missing("endpoints.authorization_endpoint"));
            }
            if self.endpoints.token_endpoint.is_none() {
                return Err(ConfigError::Missing("endpoints.token_endpoint"));
            }
            let has_static_keys =
                self.jwk_signing_keys.is_some() || self.public_key_pem.is_some();
            let hmac_only = !self.signing_algorithms.is_empty()
                && self.signing_algorithms.iter().all(is_hmac);
            if self.endpoints.jwks_uri.is_none() && !has_static_keys && !hmac_only {
                return Err(ConfigError::Missing("endpoints.jwks_uri"));
            }
        }

        match self.client_auth_method {
            ClientAuthMethod::ClientSecretJwt if !self.has_client_secret() => {
                return Err(ConfigError::Missing("client_secret"));
            }
            ClientAuthMethod::PrivateKeyJwt if self.client_assertion_key_pem.is_none() => {
                return Err(ConfigError::Missing("client_assertion_key_pem"));
            }
            _ => {}
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "a request timeout is mandatory".to_string(),
            });
        }

        Ok(())
    }
}

/// Whether an algorithm is a shared-secret MAC
pub(crate) fn is_hmac(algorithm: &Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> OidcConfig {
        OidcConfig::new(
            "https://idp.example/",
            "client-1",
            "https://app.example/callback",
        )
    }

    #[test]
    fn test_defaults_from_json() {
        let config: OidcConfig = serde_json::from_value(serde_json::json!({
            "client_id": "client-1",
            "redirect_uri": "https://app.example/callback",
            "issuer": "https://idp.example/",
        }))
        .unwrap();

        assert!(config.discovery);
        assert!(config.send_nonce);
        assert!(config.send_scope_to_token_endpoint);
        assert!(config.fetch_userinfo);
        assert_eq!(config.response_type, "code");
        assert_eq!(config.scope, vec!["openid"]);
        assert_eq!(config.client_auth_method, ClientAuthMethod::ClientSecretBasic);
        assert_eq!(config.discovery_policy, DiscoveryPolicy::CachePerIssuer);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.jwks_cache_ttl(), Duration::from_secs(600));
        assert!(!config.has_client_secret());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_json_surface() {
        let config: OidcConfig = serde_json::from_value(serde_json::json!({
            "client_id": "client-1",
            "client_secret": "s3cret",
            "redirect_uri": "https://app.example/callback",
            "issuer": "https://idp.example/",
            "discovery": false,
            "discovery_policy": "fetch_per_request",
            "endpoints": {
                "authorization_endpoint": "https://idp.example/authorize",
                "token_endpoint": "https://idp.example/token",
                "jwks_uri": "https://idp.example/jwks"
            },
            "signing_algorithms": ["RS256", "ES256"],
            "scope": ["openid", "email"],
            "prompt": "login",
            "max_age": 300,
            "client_auth_method": "client_secret_post",
            "send_scope_to_token_endpoint": false,
            "jwks_cache_ttl_secs": 30
        }))
        .unwrap();

        assert!(config.has_client_secret());
        assert_eq!(config.discovery_policy, DiscoveryPolicy::FetchPerRequest);
        assert_eq!(
            config.signing_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert_eq!(config.max_age, Some(300));
        assert_eq!(config.client_auth_method, ClientAuthMethod::ClientSecretPost);
        assert_eq!(config.jwks_cache_ttl(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = base().with_client_secret("super-secret-value");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-value"));
    }

    #[test]
    fn test_requested_scopes_always_start_with_openid() {
        let config = base().with_scopes(["email", "openid", "profile", "email", " "]);
        assert_eq!(config.requested_scopes(), vec!["openid", "email", "profile"]);

        let config = base().with_scopes(Vec::<String>::new());
        assert_eq!(config.requested_scopes(), vec!["openid"]);
    }

    #[test]
    fn test_rejects_non_code_response_type() {
        let mut config = base();
        config.response_type = "id_token".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "response_type",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_missing_static_endpoints() {
        let config = base().with_static_endpoints(ProviderEndpoints {
            authorization_endpoint: Some("https://idp.example/authorize".to_string()),
            ..Default::default()
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing("endpoints.token_endpoint"))
        );
    }

    #[test]
    fn test_hmac_only_config_needs_no_jwks() {
        let config = base()
            .with_client_secret("s3cret")
            .with_signing_algorithms(vec![Algorithm::HS256])
            .with_static_endpoints(ProviderEndpoints {
                authorization_endpoint: Some("https://idp.example/authorize".to_string()),
                token_endpoint: Some("https://idp.example/token".to_string()),
                ..Default::default()
            });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jwt_client_auth_requires_key_material() {
        let config = base().with_client_auth_method(ClientAuthMethod::PrivateKeyJwt);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing("client_assertion_key_pem"))
        );

        let config = base().with_client_auth_method(ClientAuthMethod::ClientSecretJwt);
        assert_eq!(config.validate(), Err(ConfigError::Missing("client_secret")));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = base().with_request_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_redirect_uri() {
        for redirect_uri in [
            "http://evil.example/cb",
            "https://app.example/auth/../admin/callback",
        ] {
            let config = OidcConfig::new("https://idp.example/", "client-1", redirect_uri);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    field: "redirect_uri",
                    ..
                })
            ));
        }
    }
}
