//! Session-bound one-time values
//!
//! The `state` and `nonce` of a login attempt live in the caller's session
//! store. Each is written once when the authorization request is built and
//! read back exactly once during callback handling: reading removes it.
//!
//! The session store is always passed in explicitly. Two concurrent attempts
//! never see each other's values as long as the host hands each caller its
//! own store.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Session key holding the pending `state`
pub const STATE_KEY: &str = "oidc.state";

/// Session key holding the pending `nonce`
pub const NONCE_KEY: &str = "oidc.nonce";

/// Entropy of a generated value, in bytes
pub const TOKEN_ENTROPY_BYTES: usize = 16;

/// Length of a generated value (unpadded URL-safe base64 of 16 bytes)
pub const TOKEN_LENGTH: usize = 22;

/// Key/value store scoped to the current caller
///
/// Implemented by the host over its own session mechanism.
pub trait SessionStore: Send {
    /// Store a value, replacing any previous one
    fn set(&mut self, key: &str, value: String);

    /// Read a value and delete it in the same step
    fn take(&mut self, key: &str) -> Option<String>;

    /// Delete a value if present
    fn remove(&mut self, key: &str);
}

/// In-memory session store
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: HashMap<String, String>,
}

impl MemorySession {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Peek at a value without consuming it
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether the session holds a value under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the session is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySession {
    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// A single-use random value bound to one session key
///
/// `state` and `nonce` are two independent instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTimeToken {
    key: &'static str,
}

impl OneTimeToken {
    /// The CSRF `state` value
    pub const STATE: Self = Self { key: STATE_KEY };

    /// The replay-protection `nonce` value
    pub const NONCE: Self = Self { key: NONCE_KEY };

    /// Session key of this token
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Generate a fresh value, store it in the session and return it
    pub fn generate<S: SessionStore + ?Sized>(&self, session: &mut S) -> String {
        let value = random_token();
        session.set(self.key, value.clone());
        value
    }

    /// Read and erase the stored value
    ///
    /// A second call in the same attempt always returns `None`.
    pub fn consume<S: SessionStore + ?Sized>(&self, session: &mut S) -> Option<String> {
        session.take(self.key)
    }

    /// Erase the stored value without reading it
    pub fn discard<S: SessionStore + ?Sized>(&self, session: &mut S) {
        session.remove(self.key);
    }
}

/// 16 bytes from the OS CSPRNG, rendered as 22 URL-safe characters
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
