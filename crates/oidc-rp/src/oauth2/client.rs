//! OpenID Connect client on top of the oauth2 crate
//!
//! Two operations of the Authorization Code flow live here:
//! - building the authorization redirect URL (no network call)
//! - exchanging the authorization code at the token endpoint
//!
//! Both are driven by an `oauth2::Client` configured per attempt from the
//! resolved [`ProviderEndpoints`], so a discovery refresh never mixes old and
//! new endpoints inside one attempt.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, ExtraTokenFields, RedirectUrl, RequestTokenError, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::http_client::{OAuth2HttpClient, TransportFault};
use crate::config::{ClientAuthMethod, OidcConfig, ProviderEndpoints};

/// `client_assertion_type` for JWT client authentication (RFC 7523)
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a client assertion, in seconds
const CLIENT_ASSERTION_LIFETIME_SECS: u64 = 60;

/// Extra token response field carrying the ID token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    /// The signed ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

/// Token response of an OpenID Connect provider
pub type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type CodeFlowClient = oauth2::Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Token exchange errors
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The token request exceeded the configured timeout
    #[error("Token request timed out: {0}")]
    Timeout(String),

    /// The token endpoint could not be reached
    #[error("Failed to connect to token endpoint: {0}")]
    Connect(String),

    /// The token endpoint answered with an OAuth error
    #[error("Token endpoint rejected the code: {error}")]
    Rejected {
        /// OAuth error code
        error: String,
        /// Human readable description
        description: Option<String>,
    },

    /// The response could not be parsed or the request failed otherwise
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The response carried no ID token
    #[error("Token response does not contain an id_token")]
    MissingIdToken,

    /// The client assertion could not be built
    #[error("Failed to build client assertion: {0}")]
    Assertion(String),

    /// An endpoint URL is missing or malformed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Tokens returned by a successful code exchange
#[derive(Clone, Serialize)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,
    /// Signed ID token (not yet verified)
    pub id_token: String,
    /// Refresh token, if issued
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: Option<u64>,
    /// Granted scope, space separated
    pub scope: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenSet {
    fn from_response(response: OidcTokenResponse) -> Result<Self, ExchangeError> {
        let id_token = response
            .extra_fields()
            .id_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(ExchangeError::MissingIdToken)?;

        Ok(Self {
            access_token: response.access_token().secret().clone(),
            id_token,
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in().map(|d| d.as_secs()),
            scope: response.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
        })
    }
}

/// An authorization request, immutable once built
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    url: Url,
    state: String,
    nonce: Option<String>,
    scopes: Vec<String>,
}

impl AuthorizationRequest {
    /// Redirect target at the provider's authorization endpoint
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The `state` sent with the request
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The `nonce` sent with the request, if nonces are enabled
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Requested scopes in request order
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Consume into the redirect URL
    pub fn into_url(self) -> Url {
        self.url
    }
}

/// Per-attempt OpenID Connect client
pub struct OidcClient<'a> {
    config: &'a OidcConfig,
    inner: CodeFlowClient,
    token_endpoint: String,
    http_client: &'a OAuth2HttpClient,
}

impl fmt::Debug for OidcClient<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcClient")
            .field("client_id", &self.config.client_id)
            .field("token_endpoint", &self.token_endpoint)
            .field("auth_method", &self.config.client_auth_method)
            .finish()
    }
}

impl<'a> OidcClient<'a> {
    /// Configure a client for the given endpoints
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidEndpoint`] if an endpoint is missing
    /// or is not a valid URL
    pub fn new(
        config: &'a OidcConfig,
        endpoints: &ProviderEndpoints,
        http_client: &'a OAuth2HttpClient,
    ) -> Result<Self, ExchangeError> {
        let authorization_endpoint = endpoints
            .authorization_endpoint
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidEndpoint("no authorization endpoint".into()))?;
        let token_endpoint = endpoints
            .token_endpoint
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidEndpoint("no token endpoint".into()))?;

        let auth_url = AuthUrl::new(authorization_endpoint.to_string())
            .map_err(|e| ExchangeError::InvalidEndpoint(format!("authorization endpoint: {e}")))?;
        let token_url = TokenUrl::new(token_endpoint.to_string())
            .map_err(|e| ExchangeError::InvalidEndpoint(format!("token endpoint: {e}")))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| ExchangeError::InvalidEndpoint(format!("redirect uri: {e}")))?;

        let mut inner: CodeFlowClient = oauth2::Client::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        // JWT methods authenticate with an assertion only; the secret must
        // not also be sent.
        inner = match config.client_auth_method {
            ClientAuthMethod::ClientSecretBasic if config.has_client_secret() => inner
                .set_client_secret(ClientSecret::new(
                    config.client_secret.expose_secret().clone(),
                ))
                .set_auth_type(AuthType::BasicAuth),
            ClientAuthMethod::ClientSecretPost if config.has_client_secret() => inner
                .set_client_secret(ClientSecret::new(
                    config.client_secret.expose_secret().clone(),
                ))
                .set_auth_type(AuthType::RequestBody),
            _ => inner.set_auth_type(AuthType::RequestBody),
        };

        Ok(Self {
            config,
            inner,
            token_endpoint: token_endpoint.to_string(),
            http_client,
        })
    }

    /// Build the authorization request for a fresh `state` and `nonce`
    ///
    /// Optional parameters are only added when configured with a non-empty
    /// value.
    pub fn authorization_request(&self, state: String, nonce: Option<String>) -> AuthorizationRequest {
        let scopes = self.config.requested_scopes();
        let csrf = state.clone();

        let mut request = self
            .inner
            .authorize_url(move || CsrfToken::new(csrf))
            .add_scopes(scopes.iter().cloned().map(Scope::new));

        if let Some(ref nonce) = nonce {
            request = request.add_extra_param("nonce", nonce.clone());
        }

        let max_age = self.config.max_age.map(|age| age.to_string());
        let optional = [
            ("response_mode", self.config.response_mode.as_deref()),
            ("display", self.config.display.as_deref()),
            ("prompt", self.config.prompt.as_deref()),
            ("hd", self.config.hd.as_deref()),
            ("max_age", max_age.as_deref()),
            ("ui_locales", self.config.ui_locales.as_deref()),
            ("id_token_hint", self.config.id_token_hint.as_deref()),
            ("login_hint", self.config.login_hint.as_deref()),
            ("acr_values", self.config.acr_values.as_deref()),
        ];
        for (name, value) in optional {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                request = request.add_extra_param(name, value.to_string());
            }
        }

        let (url, _) = request.url();
        AuthorizationRequest {
            url,
            state,
            nonce,
            scopes,
        }
    }

    /// Exchange an authorization code for tokens
    ///
    /// Not retried. A timeout or connection failure is reported as such,
    /// distinct from a rejection by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError`] describing the failure
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, ExchangeError> {
        let mut request = self
            .inner
            .exchange_code(AuthorizationCode::new(code.to_string()));

        if self.config.send_scope_to_token_endpoint {
            request = request.add_extra_param("scope", self.config.requested_scopes().join(" "));
        }

        match self.config.client_auth_method {
            ClientAuthMethod::ClientSecretJwt | ClientAuthMethod::PrivateKeyJwt => {
                let assertion = self.client_assertion()?;
                request = request
                    .add_extra_param("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
                    .add_extra_param("client_assertion", assertion);
            }
            ClientAuthMethod::ClientSecretBasic | ClientAuthMethod::ClientSecretPost => {}
        }

        debug!(
            token_endpoint = %self.token_endpoint,
            auth_method = self.config.client_auth_method.as_str(),
            "Exchanging authorization code"
        );

        let response = request
            .request_async(self.http_client)
            .await
            .map_err(|e| {
                let error = classify_request_error(e);
                warn!(token_endpoint = %self.token_endpoint, error = %error, "Token exchange failed");
                error
            })?;

        let tokens = TokenSet::from_response(response)?;
        info!(token_endpoint = %self.token_endpoint, "Authorization code exchanged");
        Ok(tokens)
    }

    /// Signed client assertion for the JWT client authentication methods
    fn client_assertion(&self) -> Result<String, ExchangeError> {
        let (header, key) = match self.config.client_auth_method {
            ClientAuthMethod::ClientSecretJwt => (
                Header::new(jsonwebtoken::Algorithm::HS256),
                EncodingKey::from_secret(self.config.client_secret.expose_secret().as_bytes()),
            ),
            ClientAuthMethod::PrivateKeyJwt => {
                let pem = self
                    .config
                    .client_assertion_key_pem
                    .as_ref()
                    .ok_or_else(|| ExchangeError::Assertion("no private key configured".into()))?;
                let key = EncodingKey::from_rsa_pem(pem.expose_secret().as_bytes())
                    .map_err(|e| ExchangeError::Assertion(e.to_string()))?;
                (Header::new(jsonwebtoken::Algorithm::RS256), key)
            }
            _ => {
                return Err(ExchangeError::Assertion(format!(
                    "{} does not use a client assertion",
                    self.config.client_auth_method.as_str()
                )));
            }
        };

        let claims = ClientAssertionClaims::new(&self.config.client_id, &self.token_endpoint)?;
        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| ExchangeError::Assertion(e.to_string()))
    }
}

/// Claims of a client authentication JWT (RFC 7523 section 3)
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Client id
    pub iss: String,
    /// Client id
    pub sub: String,
    /// Token endpoint
    pub aud: String,
    /// Unique id
    pub jti: String,
    /// Issued at
    pub iat: u64,
    /// Expiry
    pub exp: u64,
}

impl ClientAssertionClaims {
    fn new(client_id: &str, token_endpoint: &str) -> Result<Self, ExchangeError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ExchangeError::Assertion(e.to_string()))?
            .as_secs();
        Ok(Self {
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            aud: token_endpoint.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + CLIENT_ASSERTION_LIFETIME_SECS,
        })
    }
}

fn classify_request_error(
    error: RequestTokenError<super::http_client::OAuth2HttpError, BasicErrorResponse>,
) -> ExchangeError {
    match error {
        RequestTokenError::ServerResponse(response) => ExchangeError::Rejected {
            error: response.error().to_string(),
            description: response.error_description().cloned(),
        },
        RequestTokenError::Request(e) => match e.fault() {
            TransportFault::Timeout => ExchangeError::Timeout(e.to_string()),
            TransportFault::Connect => ExchangeError::Connect(e.to_string()),
            TransportFault::Other => ExchangeError::InvalidResponse(e.to_string()),
        },
        RequestTokenError::Parse(e, _) => ExchangeError::InvalidResponse(e.to_string()),
        RequestTokenError::Other(message) => ExchangeError::InvalidResponse(message),
    }
}
