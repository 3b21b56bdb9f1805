//! Normalized identity record
//!
//! Pure mapping from verified claims (optionally overlaid with UserInfo
//! claims) and the token response. Absent claims become `None`; nothing here
//! can fail.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::jwt::VerifiedClaims;
use crate::oauth2::TokenSet;

/// The authenticated user, as handed to the host
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    /// Subject identifier at the issuer
    pub uid: String,
    /// Profile fields
    pub info: IdentityInfo,
    /// Everything the provider said
    pub extra: IdentityExtra,
    /// Tokens of the attempt
    pub credentials: Credentials,
}

/// Profile fields
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IdentityInfo {
    /// `name`
    pub name: Option<String>,
    /// `email`
    pub email: Option<String>,
    /// `preferred_username`
    pub nickname: Option<String>,
    /// `given_name`
    pub first_name: Option<String>,
    /// `family_name`
    pub last_name: Option<String>,
    /// `gender`
    pub gender: Option<String>,
    /// `picture`
    pub image: Option<String>,
    /// `phone_number`
    pub phone: Option<String>,
    /// Links
    pub urls: IdentityUrls,
}

/// Links of the profile
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IdentityUrls {
    /// `website`
    pub website: Option<String>,
}

/// Raw attributes
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityExtra {
    /// ID token claims overlaid with UserInfo claims
    pub raw_info: Map<String, Value>,
}

/// Tokens of the attempt
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// The verified ID token
    pub id_token: String,
    /// Access token
    pub token: String,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: Option<u64>,
    /// Absolute expiry derived from `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scope
    pub scope: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id_token", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Identity {
    /// Project verified claims and tokens into an identity
    ///
    /// UserInfo profile claims, when present, take precedence over ID token
    /// claims of the same name. The ID token's own protocol claims are kept
    /// as verified, and the `uid` is always the verified ID token subject.
    pub fn project(
        claims: &VerifiedClaims,
        userinfo: Option<&Map<String, Value>>,
        tokens: &TokenSet,
    ) -> Self {
        let raw_info = merge_claims(claims.raw(), userinfo);
        let info = IdentityInfo::from_claims(&raw_info);

        Self {
            uid: claims.subject().to_string(),
            info,
            extra: IdentityExtra { raw_info },
            credentials: Credentials::from_tokens(tokens),
        }
    }
}

impl IdentityInfo {
    /// Map standard claims to profile fields
    pub fn from_claims(claims: &Map<String, Value>) -> Self {
        let text = |name: &str| claims.get(name).and_then(claim_text);
        Self {
            name: text("name"),
            email: text("email"),
            nickname: text("preferred_username"),
            first_name: text("given_name"),
            last_name: text("family_name"),
            gender: text("gender"),
            image: text("picture"),
            phone: text("phone_number"),
            urls: IdentityUrls {
                website: text("website"),
            },
        }
    }
}

impl Credentials {
    fn from_tokens(tokens: &TokenSet) -> Self {
        let expires_at = tokens
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        Self {
            id_token: tokens.id_token.clone(),
            token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_in: tokens.expires_in,
            expires_at,
            scope: tokens.scope.clone(),
        }
    }
}

/// Claims that describe the ID token itself rather than the user
const ID_TOKEN_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "nbf", "jti", "nonce", "azp", "auth_time", "acr", "amr",
    "at_hash", "c_hash", "sid",
];

fn merge_claims(
    id_token: &Map<String, Value>,
    userinfo: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = id_token.clone();
    let profile = userinfo
        .into_iter()
        .flatten()
        .filter(|(name, _)| !ID_TOKEN_CLAIMS.contains(&name.as_str()));
    for (name, value) in profile {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Strings are taken as is; numbers and booleans are rendered
fn claim_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_profile_mapping() {
        let info = IdentityInfo::from_claims(&claims(json!({
            "sub": "user-42",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "preferred_username": "jdoe",
            "given_name": "Jane",
            "family_name": "Doe",
            "gender": "female",
            "picture": "https://idp.example/jane.png",
            "phone_number": "+1 555 0100",
            "website": "https://jane.example"
        })));

        assert_eq!(info.name.as_deref(), Some("Jane Doe"));
        assert_eq!(info.nickname.as_deref(), Some("jdoe"));
        assert_eq!(info.first_name.as_deref(), Some("Jane"));
        assert_eq!(info.last_name.as_deref(), Some("Doe"));
        assert_eq!(info.image.as_deref(), Some("https://idp.example/jane.png"));
        assert_eq!(info.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(info.urls.website.as_deref(), Some("https://jane.example"));
    }

    #[test]
    fn test_absent_claims_are_none() {
        let info = IdentityInfo::from_claims(&claims(json!({ "sub": "user-42", "name": "" })));
        assert_eq!(info, IdentityInfo::default());
    }

    #[test]
    fn test_userinfo_overlay_keeps_token_claims() {
        let id_token = claims(json!({
            "iss": "https://idp.example/",
            "sub": "user-42",
            "aud": "client-1",
            "nonce": "n-1",
            "exp": 1_900_000_000,
            "at_hash": "abc",
            "email": "old@example.com"
        }));
        let userinfo = claims(json!({
            "iss": "https://elsewhere.example/",
            "sub": "user-42",
            "aud": "someone-else",
            "nonce": "n-2",
            "exp": 1,
            "at_hash": "xyz",
            "email": "new@example.com",
            "name": "Jane Doe"
        }));

        let merged = merge_claims(&id_token, Some(&userinfo));

        assert_eq!(merged["iss"], json!("https://idp.example/"));
        assert_eq!(merged["aud"], json!("client-1"));
        assert_eq!(merged["nonce"], json!("n-1"));
        assert_eq!(merged["exp"], json!(1_900_000_000));
        assert_eq!(merged["at_hash"], json!("abc"));
        assert_eq!(merged["email"], json!("new@example.com"));
        assert_eq!(merged["name"], json!("Jane Doe"));
        assert_eq!(merge_claims(&id_token, None), id_token);
    }

    #[test]
    fn test_credentials_from_tokens() {
        let tokens = TokenSet {
            access_token: "at".to_string(),
            id_token: "idt".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_in: Some(3600),
            scope: Some("openid email".to_string()),
        };
        let credentials = Credentials::from_tokens(&tokens);
        assert_eq!(credentials.token, "at");
        assert_eq!(credentials.id_token, "idt");
        assert_eq!(credentials.refresh_token.as_deref(), Some("rt"));
        assert_eq!(credentials.scope.as_deref(), Some("openid email"));
        assert!(credentials.expires_at.is_some_and(|at| at > Utc::now()));
        assert!(!format!("{credentials:?}").contains("\"at\""));
    }
}
