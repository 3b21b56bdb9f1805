//! ID token verification
//!
//! Verification runs in a fixed order and fails closed:
//!
//! 1. the stored nonce is consumed from the session (before anything else,
//!    so a forged token still drains it)
//! 2. the header algorithm must be in the accepted set
//! 3. the signature is checked against the selected key, together with
//!    `exp`/`nbf` (with clock-skew leeway)
//! 4. `iss` must equal the configured issuer exactly
//! 5. `aud` must contain the client id, and `azp` (if present) must equal it
//! 6. `iat` must not lie in the future beyond the leeway
//! 7. `nonce` must equal the consumed value
//!
//! [`VerifiedClaims`] can only be obtained from a successful run.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{IdTokenClaims, JwksClient, JwksError};
use crate::config::{OidcConfig, is_hmac};
use crate::oauth2::validation::one_time_values_match;
use crate::session::{OneTimeToken, SessionStore};

/// ID token verification errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// The signature does not verify, or the header cannot be trusted
    #[error("ID token signature is invalid: {0}")]
    SignatureInvalid(String),

    /// The header names an algorithm outside the accepted set
    #[error("ID token algorithm {0:?} is not accepted")]
    UnsupportedAlgorithm(Algorithm),

    /// `iss` differs from the configured issuer
    #[error("ID token issuer {actual} does not match {expected}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer in the token
        actual: String,
    },

    /// `aud` does not contain the client id
    #[error("ID token audience does not contain the client id")]
    AudienceMismatch,

    /// `azp` is present and differs from the client id
    #[error("ID token authorized party {0} is not this client")]
    AuthorizedPartyMismatch(String),

    /// `nonce` is missing or differs from the stored value
    #[error("ID token nonce does not match the authorization request")]
    NonceMismatch,

    /// `at_hash` does not match the access token
    #[error("ID token at_hash does not match the access token")]
    AccessTokenHashMismatch,

    /// `exp` has passed
    #[error("ID token has expired")]
    Expired,

    /// `nbf` is in the future
    #[error("ID token is not yet valid")]
    NotYetValid,

    /// `iat` is in the future
    #[error("ID token was issued in the future")]
    IssuedInFuture,

    /// The token or its claims cannot be parsed
    #[error("Malformed ID token: {0}")]
    Malformed(String),

    /// No verification key matches the token
    #[error("No verification key found: {0}")]
    KeyNotFound(String),

    /// Configured key material is unusable
    #[error("Invalid verification key: {0}")]
    InvalidKey(String),

    /// The provider's key set could not be fetched
    #[error("Failed to fetch provider keys: {0}")]
    KeySet(#[from] JwksError),
}

/// Claims of an ID token that passed every check
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    claims: IdTokenClaims,
    raw: Map<String, Value>,
    algorithm: Algorithm,
    key_id: Option<String>,
}

impl VerifiedClaims {
    /// Registered claims
    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }

    /// Subject
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Issuer
    pub fn issuer(&self) -> &str {
        &self.claims.iss
    }

    /// Full claim set as sent by the provider
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Algorithm the token was signed with
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Key id from the header
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Check the `at_hash` claim, if present, against the access token
    ///
    /// The claim is the left half of the access token's hash, using the hash
    /// function of the token's signing algorithm (OpenID Connect Core 1.0,
    /// section 3.1.3.6).
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::AccessTokenHashMismatch`] if the claim is
    /// present and does not match
    pub fn check_access_token_hash(&self, access_token: &str) -> Result<(), VerificationError> {
        let Some(expected) = self.raw.get("at_hash").and_then(Value::as_str) else {
            return Ok(());
        };

        let computed = access_token_hash(self.algorithm, access_token);
        if one_time_values_match(&computed, expected) {
            Ok(())
        } else {
            warn!(issuer = %self.claims.iss, "ID token at_hash mismatch");
            Err(VerificationError::AccessTokenHashMismatch)
        }
    }
}

/// Left half of the access token hash, base64url without padding
fn access_token_hash(algorithm: Algorithm, access_token: &str) -> String {
    let digest = match algorithm {
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
        _ => Sha256::digest(access_token.as_bytes()).to_vec(),
    };
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Where verification keys come from
#[derive(Debug, Clone)]
enum KeySource {
    /// Statically configured JWK set
    Static(Arc<JwkSet>),
    /// Statically configured PEM public key
    Pem(String),
    /// The provider's JWKS endpoint
    Jwks(Arc<JwksClient>),
    /// Nothing beyond the client secret
    None,
}

/// ID token verifier for one relying party
pub struct IdTokenVerifier {
    expected_issuer: String,
    client_id: String,
    client_secret: SecretString,
    accepted_algorithms: Vec<Algorithm>,
    clock_skew_leeway: Duration,
    require_nonce: bool,
    keys: KeySource,
}

impl std::fmt::Debug for IdTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenVerifier")
            .field("expected_issuer", &self.expected_issuer)
            .field("client_id", &self.client_id)
            .field("accepted_algorithms", &self.accepted_algorithms)
            .field("clock_skew_leeway", &self.clock_skew_leeway)
            .field("require_nonce", &self.require_nonce)
            .field("keys", &self.keys)
            .finish()
    }
}

impl IdTokenVerifier {
    /// Build a verifier from configuration
    ///
    /// `advertised` are the algorithms from the discovery document; they are
    /// used only when no algorithm is configured. With neither, `RS256` is
    /// the single accepted algorithm. `jwks` is consulted only when no static
    /// key is configured.
    pub fn from_config(
        config: &OidcConfig,
        advertised: &[Algorithm],
        jwks: Option<Arc<JwksClient>>,
    ) -> Self {
        let accepted_algorithms = if !config.signing_algorithms.is_empty() {
            config.signing_algorithms.clone()
        } else if !advertised.is_empty() {
            advertised.to_vec()
        } else {
            vec![Algorithm::RS256]
        };

        let keys = if let Some(ref set) = config.jwk_signing_keys {
            KeySource::Static(Arc::new(set.clone()))
        } else if let Some(ref pem) = config.public_key_pem {
            KeySource::Pem(pem.clone())
        } else if let Some(client) = jwks {
            KeySource::Jwks(client)
        } else {
            KeySource::None
        };

        Self {
            expected_issuer: config.issuer.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            accepted_algorithms,
            clock_skew_leeway: config.clock_skew(),
            require_nonce: config.send_nonce,
            keys,
        }
    }

    /// Accepted signing algorithms
    pub fn accepted_algorithms(&self) -> &[Algorithm] {
        &self.accepted_algorithms
    }

    /// Set custom clock skew tolerance
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// Consume the stored nonce and verify `id_token`
    ///
    /// The nonce is taken from the session first, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first [`VerificationError`] encountered
    pub async fn verify<S: SessionStore + ?Sized>(
        &self,
        id_token: &str,
        session: &mut S,
    ) -> Result<VerifiedClaims, VerificationError> {
        let expected_nonce = if self.require_nonce {
            OneTimeToken::NONCE.consume(session)
        } else {
            None
        };
        self.verify_with_nonce(id_token, expected_nonce.as_deref())
            .await
    }

    /// Verify `id_token` against an already consumed nonce
    ///
    /// When nonces are required, `None` fails with
    /// [`VerificationError::NonceMismatch`].
    ///
    /// # Errors
    ///
    /// Returns the first [`VerificationError`] encountered
    pub async fn verify_with_nonce(
        &self,
        id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<VerifiedClaims, VerificationError> {
        let header = decode_header(id_token).map_err(|e| {
            debug!(error = %e, "Failed to decode ID token header");
            match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    VerificationError::Malformed(e.to_string())
                }
                _ => VerificationError::SignatureInvalid(format!("untrusted header: {e}")),
            }
        })?;

        if !self.accepted_algorithms.contains(&header.alg) {
            warn!(
                algorithm = ?header.alg,
                allowed = ?self.accepted_algorithms,
                "ID token algorithm not accepted"
            );
            return Err(VerificationError::UnsupportedAlgorithm(header.alg));
        }

        let key = self.decoding_key(&header).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.clock_skew_leeway.as_secs();
        validation.validate_aud = false;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.required_spec_claims.clear();

        let raw = decode::<Map<String, Value>>(id_token, &key, &validation)
            .map_err(|e| {
                warn!(error = %e, issuer = %self.expected_issuer, "ID token rejected");
                map_decode_error(e)
            })?
            .claims;

        let claims: IdTokenClaims = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| VerificationError::Malformed(format!("claims: {e}")))?;

        self.check_claims(&claims, expected_nonce)?;

        debug!(
            issuer = %claims.iss,
            subject = %claims.sub,
            algorithm = ?header.alg,
            "ID token verified"
        );

        Ok(VerifiedClaims {
            claims,
            raw,
            algorithm: header.alg,
            key_id: header.kid,
        })
    }

    fn check_claims(
        &self,
        claims: &IdTokenClaims,
        expected_nonce: Option<&str>,
    ) -> Result<(), VerificationError> {
        if claims.iss != self.expected_issuer {
            warn!(expected = %self.expected_issuer, actual = %claims.iss, "ID token issuer mismatch");
            return Err(VerificationError::IssuerMismatch {
                expected: self.expected_issuer.clone(),
                actual: claims.iss.clone(),
            });
        }

        if !claims.aud.contains(&self.client_id) {
            warn!(client_id = %self.client_id, "ID token audience mismatch");
            return Err(VerificationError::AudienceMismatch);
        }

        if let Some(ref azp) = claims.azp
            && azp != &self.client_id
        {
            warn!(client_id = %self.client_id, azp = %azp, "ID token authorized party mismatch");
            return Err(VerificationError::AuthorizedPartyMismatch(azp.clone()));
        }

        if let Some(iat) = claims.iat
            && iat > now_secs().saturating_add(self.clock_skew_leeway.as_secs())
        {
            return Err(VerificationError::IssuedInFuture);
        }

        if self.require_nonce {
            let matches = match (expected_nonce, claims.nonce.as_deref()) {
                (Some(expected), Some(received)) => one_time_values_match(expected, received),
                _ => false,
            };
            if !matches {
                warn!(issuer = %claims.iss, "ID token nonce mismatch");
                return Err(VerificationError::NonceMismatch);
            }
        }

        Ok(())
    }

    async fn decoding_key(&self, header: &Header) -> Result<DecodingKey, VerificationError> {
        if is_hmac(&header.alg) {
            let secret = self.client_secret.expose_secret();
            if secret.is_empty() {
                return Err(VerificationError::KeyNotFound(
                    "HMAC-signed token but no client secret is configured".to_string(),
                ));
            }
            return Ok(DecodingKey::from_secret(secret.as_bytes()));
        }

        match &self.keys {
            KeySource::Static(set) => select_jwk(set, header),
            KeySource::Pem(pem) => pem_key(pem, header.alg),
            KeySource::Jwks(client) => {
                let set = client.get_jwks().await?;
                select_jwk(&set, header)
            }
            KeySource::None => Err(VerificationError::KeyNotFound(
                "no signing keys are configured or discoverable".to_string(),
            )),
        }
    }
}

fn select_jwk(set: &JwkSet, header: &Header) -> Result<DecodingKey, VerificationError> {
    let jwk = match header.kid.as_deref() {
        Some(kid) => set.find(kid).ok_or_else(|| {
            error!(key_id = kid, "Key ID not found in JWKS");
            VerificationError::KeyNotFound(format!("key id '{kid}'"))
        })?,
        None => match set.keys.as_slice() {
            [only] => only,
            _ => {
                return Err(VerificationError::KeyNotFound(format!(
                    "token has no kid and the key set holds {} keys",
                    set.keys.len()
                )));
            }
        },
    };

    DecodingKey::from_jwk(jwk).map_err(|e| {
        error!(error = %e, "Failed to create decoding key from JWK");
        VerificationError::InvalidKey(e.to_string())
    })
}

fn pem_key(pem: &str, algorithm: Algorithm) -> Result<DecodingKey, VerificationError> {
    let bytes = pem.as_bytes();
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
        other => {
            return Err(VerificationError::InvalidKey(format!(
                "a PEM key cannot verify {other:?}"
            )));
        }
    };
    key.map_err(|e| {
        error!(error = %e, "Configured public key is unusable");
        VerificationError::InvalidKey(e.to_string())
    })
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> VerificationError {
    match error.kind() {
        ErrorKind::ExpiredSignature => VerificationError::Expired,
        ErrorKind::ImmatureSignature => VerificationError::NotYetValid,
        ErrorKind::InvalidAlgorithm => VerificationError::SignatureInvalid(error.to_string()),
        ErrorKind::InvalidSignature => VerificationError::SignatureInvalid(error.to_string()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            VerificationError::Malformed(error.to_string())
        }
        _ => VerificationError::SignatureInvalid(error.to_string()),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
