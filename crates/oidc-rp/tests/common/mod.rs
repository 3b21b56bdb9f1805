//! Common test utilities for integration tests
//!
//! A wiremock-backed identity provider serving discovery, token, JWKS and
//! UserInfo endpoints, plus helpers to mint ID tokens.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use oidc_rp::config::{OidcConfig, ProviderEndpoints};
use oidc_rp::discovery::{DiscoveryFetcher, FetcherConfig};
use oidc_rp::session::{MemorySession, NONCE_KEY, STATE_KEY};
use oidc_rp::{CallbackParameters, RelyingParty};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "a-client-secret-of-reasonable-length";
pub const REDIRECT_URI: &str = "https://app.example/auth/oidc/callback";
pub const SUBJECT: &str = "user-42";
pub const RSA_KID: &str = "test-rsa-key";

/// Mock identity provider
pub struct MockProvider {
    pub server: MockServer,
    /// `{server}/`, matching the discovery document's `issuer`
    pub issuer: String,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
}

impl MockProvider {
    /// Start a provider without any mounted endpoints
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            issuer: format!("{}/", base_url),
            token_endpoint: format!("{}/token", base_url),
            authorization_endpoint: format!("{}/authorize", base_url),
            userinfo_endpoint: format!("{}/userinfo", base_url),
            jwks_uri: format!("{}/jwks", base_url),
            server,
        }
    }

    /// The provider's discovery document
    pub fn discovery_document(&self, algorithms: &[&str]) -> Value {
        json!({
            "issuer": self.issuer,
            "authorization_endpoint": self.authorization_endpoint,
            "token_endpoint": self.token_endpoint,
            "userinfo_endpoint": self.userinfo_endpoint,
            "jwks_uri": self.jwks_uri,
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": algorithms,
        })
    }

    /// Serve the discovery document advertising RS256
    pub async fn mock_discovery(&self) {
        self.mock_discovery_document(self.discovery_document(&["RS256"]))
            .await;
    }

    /// Serve an arbitrary discovery document
    pub async fn mock_discovery_document(&self, document: Value) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Successful token response carrying `id_token`
    pub fn token_response(id_token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-token-123",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-token-456",
            "scope": "openid email profile",
            "id_token": id_token,
        }))
    }

    /// Serve a successful token response, expected exactly once
    pub async fn mock_token_success(&self, id_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(Self::token_response(id_token))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Token endpoint error response
    pub async fn mock_token_error(&self, error: &str, description: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// Fail the test if the token endpoint is ever called
    pub async fn forbid_token_requests(&self) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// Serve the test RSA public key
    pub async fn mock_jwks(&self) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .mount(&self.server)
            .await;
    }

    /// Serve UserInfo claims
    pub async fn mock_userinfo(&self, claims: Value) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims))
            .mount(&self.server)
            .await;
    }

    /// Serve discovery, JWKS and UserInfo for a complete RS256 provider
    pub async fn mock_provider(&self) {
        self.mock_discovery().await;
        self.mock_jwks().await;
        self.mock_userinfo(json!({
            "sub": SUBJECT,
            "name": "Jane Doe",
            "email": "jane@example.com",
            "preferred_username": "jdoe",
        }))
        .await;
    }

    /// Discovery-driven configuration for this provider
    pub fn config(&self) -> OidcConfig {
        OidcConfig::new(self.issuer.clone(), CLIENT_ID, REDIRECT_URI)
            .with_client_secret(CLIENT_SECRET)
            .with_scopes(["openid", "email", "profile"])
            .with_request_timeout(Duration::from_secs(2))
    }

    /// Static-endpoint configuration for this provider
    pub fn static_config(&self) -> OidcConfig {
        self.config().with_static_endpoints(ProviderEndpoints {
            authorization_endpoint: Some(self.authorization_endpoint.clone()),
            token_endpoint: Some(self.token_endpoint.clone()),
            userinfo_endpoint: Some(self.userinfo_endpoint.clone()),
            jwks_uri: Some(self.jwks_uri.clone()),
        })
    }

    /// Relying party for `config`, allowing this plain-http provider
    pub fn relying_party(&self, config: OidcConfig) -> RelyingParty {
        let fetcher = DiscoveryFetcher::with_config(FetcherConfig {
            request_timeout: config.request_timeout(),
            require_https: false,
            ..FetcherConfig::default()
        })
        .expect("discovery fetcher");
        RelyingParty::with_discovery(config, Arc::new(fetcher)).expect("relying party")
    }

    /// ID token claims this provider would issue for `nonce`
    pub fn id_token_claims(&self, nonce: Option<&str>) -> Value {
        let now = current_timestamp();
        let mut claims = json!({
            "iss": self.issuer,
            "sub": SUBJECT,
            "aud": CLIENT_ID,
            "exp": now + 300,
            "iat": now,
            "email": "jane@example.com",
        });
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        claims
    }
}

/// Start a login attempt and return the session with its state and nonce
pub async fn begin_login(rp: &RelyingParty) -> (MemorySession, String, Option<String>) {
    let mut session = MemorySession::new();
    rp.authorize(&mut session).await.expect("authorize");
    let state = session.get(STATE_KEY).expect("state stored").to_string();
    let nonce = session.get(NONCE_KEY).map(str::to_string);
    (session, state, nonce)
}

/// Callback parameters for a successful provider redirect
pub fn callback_params(code: &str, state: &str) -> CallbackParameters {
    CallbackParameters::from_query(&format!("code={code}&state={state}"))
}

/// Test RSA key pair: PKCS#8 private key PEM and the public JWK
pub fn test_rsa_key() -> &'static (String, Value) {
    static KEY: OnceLock<(String, Value)> = OnceLock::new();
    KEY.get_or_init(|| {
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .as_str()
            .to_owned();

        let jwk = json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": RSA_KID,
            "n": URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        });

        (private_pem, jwk)
    })
}

/// JWK set holding the test RSA public key
pub fn test_jwks() -> Value {
    json!({ "keys": [test_rsa_key().1] })
}

/// Sign claims with the test RSA key
pub fn sign_rs256(claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(test_rsa_key().0.as_bytes()).expect("Invalid RSA key");
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(RSA_KID.to_string());
    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Sign claims with the client secret
pub fn sign_hs256(claims: &Value) -> String {
    sign_with_secret(claims, CLIENT_SECRET)
}

/// Sign claims with an arbitrary HMAC secret
pub fn sign_with_secret(claims: &Value, secret: &str) -> String {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key).expect("Failed to encode test JWT")
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
