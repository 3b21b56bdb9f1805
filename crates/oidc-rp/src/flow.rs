//! The relying party: the two host entry points of the flow
//!
//! ```text
//!  authorize(session)                     callback(params, session)
//!  ──────────────────                     ─────────────────────────
//!  resolve endpoints                      error param?  → CallbackError
//!  generate state (+ nonce)               state ok?     → else 401
//!  build redirect URL                     resolve endpoints
//!                                         exchange code
//!                                         verify ID token (consumes nonce)
//!                                         UserInfo (optional)
//!                                         project Identity
//! ```
//!
//! Every terminal non-success clears both one-time values from the session.

use std::sync::Arc;

use http::header::LOCATION;
use http::{Response, StatusCode};
use jsonwebtoken::Algorithm;
use tracing::{debug, info, warn};

use crate::callback::{CallbackParameters, CallbackRejection, unauthorized_response, validate_callback};
use crate::config::{ConfigError, DiscoveryPolicy, OidcConfig, ProviderEndpoints};
use crate::discovery::{DiscoveryFetcher, FetcherConfig, ResolvedProvider};
use crate::error::{FlowError, FlowFailure};
use crate::identity::Identity;
use crate::jwt::{IdTokenVerifier, JwksCache};
use crate::oauth2::{AuthorizationRequest, OAuth2HttpClient, OidcClient};
use crate::session::{OneTimeToken, SessionStore};
use crate::userinfo::fetch_userinfo;

/// Redirect to the provider's authorization endpoint
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    request: AuthorizationRequest,
}

impl AuthorizationRedirect {
    /// Redirect target
    pub fn url(&self) -> &url::Url {
        self.request.url()
    }

    /// The request behind the redirect
    pub fn request(&self) -> &AuthorizationRequest {
        &self.request
    }

    /// A `302 Found` response pointing at the provider
    ///
    /// # Errors
    ///
    /// Returns the `http` error if the response cannot be assembled
    pub fn into_response(self) -> Result<Response<String>, http::Error> {
        Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, self.request.url().as_str())
            .body(String::new())
    }
}

/// Result of a callback that did not fail
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The user is authenticated
    Authenticated(Box<Identity>),
    /// The callback's state did not match; answer with 401 and stop
    Unauthorized,
}

impl CallbackOutcome {
    /// The identity, if authenticated
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Unauthorized => None,
        }
    }

    /// Whether the callback was rejected with 401
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// The 401 response for an unauthorized callback
    pub fn unauthorized_response(&self) -> Option<Response<String>> {
        self.is_unauthorized().then(unauthorized_response)
    }
}

/// OpenID Connect relying party
///
/// Cheap to share behind an `Arc`; per-attempt data lives in the session
/// passed to each call.
pub struct RelyingParty {
    config: OidcConfig,
    discovery: Arc<DiscoveryFetcher>,
    http_client: OAuth2HttpClient,
    jwks: JwksCache,
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("issuer", &self.config.issuer)
            .field("client_id", &self.config.client_id)
            .field("discovery", &self.discovery)
            .finish()
    }
}

impl RelyingParty {
    /// Create a relying party with its own discovery cache
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Configuration`] if the configuration is invalid
    pub fn new(config: OidcConfig) -> Result<Self, FlowError> {
        let fetcher = DiscoveryFetcher::with_config(FetcherConfig {
            request_timeout: config.request_timeout(),
            ..FetcherConfig::default()
        })
        .map_err(|source| FlowError::DiscoveryFailed {
            issuer: config.issuer.clone(),
            source,
        })?;
        Self::with_discovery(config, Arc::new(fetcher))
    }

    /// Create a relying party that shares a discovery cache
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Configuration`] if the configuration is invalid
    pub fn with_discovery(
        config: OidcConfig,
        discovery: Arc<DiscoveryFetcher>,
    ) -> Result<Self, FlowError> {
        config.validate()?;

        let http_client = OAuth2HttpClient::with_timeout(config.request_timeout()).map_err(|e| {
            ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: format!("cannot build HTTP client: {e}"),
            }
        })?;
        let jwks =
            JwksCache::new(http_client.reqwest().clone()).with_ttl(config.jwks_cache_ttl());

        debug!(issuer = %config.issuer, client_id = %config.client_id, "Relying party configured");

        Ok(Self {
            config,
            discovery,
            http_client,
            jwks,
        })
    }

    /// The configuration
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// The discovery fetcher
    pub fn discovery(&self) -> &Arc<DiscoveryFetcher> {
        &self.discovery
    }

    /// Start a login attempt
    ///
    /// Resolves the endpoints, stores a fresh `state` (and `nonce`) in the
    /// session and returns the redirect to the provider. Nothing is stored
    /// when discovery fails.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DiscoveryFailed`] or [`FlowError::Configuration`]
    pub async fn authorize<S: SessionStore + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<AuthorizationRedirect, FlowError> {
        let (endpoints, _) = self.resolve_endpoints().await?;
        let client = OidcClient::new(&self.config, &endpoints, &self.http_client).map_err(
            |e| ConfigError::Invalid {
                field: "endpoints",
                reason: e.to_string(),
            },
        )?;

        let state = OneTimeToken::STATE.generate(session);
        let nonce = self
            .config
            .send_nonce
            .then(|| OneTimeToken::NONCE.generate(session));

        let request = client.authorization_request(state, nonce);
        info!(
            issuer = %self.config.issuer,
            authorization_endpoint = ?endpoints.authorization_endpoint,
            "Redirecting to provider"
        );
        Ok(AuthorizationRedirect { request })
    }

    /// Handle the provider's redirect back
    ///
    /// # Errors
    ///
    /// Returns a classified [`FlowFailure`]; the session no longer holds the
    /// attempt's state or nonce afterwards
    pub async fn callback<S: SessionStore + ?Sized>(
        &self,
        params: &CallbackParameters,
        session: &mut S,
    ) -> Result<CallbackOutcome, FlowFailure> {
        match self.handle_callback(params, session).await {
            Ok(outcome) => {
                if outcome.is_unauthorized() {
                    discard_attempt(session);
                }
                Ok(outcome)
            }
            Err(error) => Err(self.fail(error, session)),
        }
    }

    async fn handle_callback<S: SessionStore + ?Sized>(
        &self,
        params: &CallbackParameters,
        session: &mut S,
    ) -> Result<CallbackOutcome, FlowError> {
        match validate_callback(params, session) {
            Ok(()) => {}
            Err(CallbackRejection::Provider(error)) => return Err(FlowError::Callback(error)),
            Err(CallbackRejection::StateMismatch) => return Ok(CallbackOutcome::Unauthorized),
        }

        let code = params.code().ok_or(FlowError::MissingAuthorizationCode)?;

        let (endpoints, advertised) = self.resolve_endpoints().await?;
        let client = OidcClient::new(&self.config, &endpoints, &self.http_client)?;
        let tokens = client.exchange_code(code).await?;

        let jwks = match endpoints.jwks_uri.as_deref() {
            Some(uri) => Some(self.jwks.client(uri).await),
            None => None,
        };
        let verifier = IdTokenVerifier::from_config(&self.config, &advertised, jwks);
        let claims = verifier.verify(&tokens.id_token, session).await?;
        claims.check_access_token_hash(&tokens.access_token)?;

        let userinfo = if self.config.fetch_userinfo
            && let Some(endpoint) = endpoints.userinfo_endpoint.as_deref()
        {
            Some(
                fetch_userinfo(
                    self.http_client.reqwest(),
                    endpoint,
                    &tokens.access_token,
                    claims.subject(),
                )
                .await?,
            )
        } else {
            None
        };

        let identity = Identity::project(&claims, userinfo.as_ref(), &tokens);
        info!(issuer = %claims.issuer(), subject = %identity.uid, "Login succeeded");
        Ok(CallbackOutcome::Authenticated(Box::new(identity)))
    }

    /// The single failure handler
    fn fail<S: SessionStore + ?Sized>(&self, error: FlowError, session: &mut S) -> FlowFailure {
        discard_attempt(session);
        let failure = FlowFailure::from(error);
        warn!(
            issuer = %self.config.issuer,
            kind = %failure.kind,
            error = %failure.error,
            "Login failed"
        );
        failure
    }

    /// Endpoints to use for this attempt and the provider's advertised
    /// algorithms
    async fn resolve_endpoints(&self) -> Result<(ProviderEndpoints, Vec<Algorithm>), FlowError> {
        match self.resolve_provider().await? {
            Some(provider) => Ok((provider.endpoints(), provider.metadata().id_token_algorithms())),
            None => Ok((self.config.endpoints.clone(), Vec::new())),
        }
    }

    async fn resolve_provider(&self) -> Result<Option<Arc<ResolvedProvider>>, FlowError> {
        if !self.config.discovery {
            return Ok(None);
        }

        let issuer = &self.config.issuer;
        let resolved = match self.config.discovery_policy {
            DiscoveryPolicy::CachePerIssuer => self.discovery.resolve(issuer).await,
            DiscoveryPolicy::FetchPerRequest => self.discovery.fetch(issuer).await,
        };

        resolved.map(Some).map_err(|source| {
            warn!(issuer = %issuer, error = %source, "Discovery failed");
            FlowError::DiscoveryFailed {
                issuer: issuer.clone(),
                source,
            }
        })
    }
}

fn discard_attempt<S: SessionStore + ?Sized>(session: &mut S) {
    OneTimeToken::STATE.discard(session);
    OneTimeToken::NONCE.discard(session);
}
