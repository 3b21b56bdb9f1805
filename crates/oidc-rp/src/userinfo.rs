//! UserInfo endpoint client
//!
//! After the ID token is verified, the UserInfo endpoint may be queried with
//! the access token for additional profile claims. The response must be about
//! the same subject as the ID token (OpenID Connect Core 1.0, section 5.3.2).

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::oauth2::http_client::{TransportFault, classify_reqwest_error};

/// UserInfo errors
#[derive(Debug, Error)]
pub enum UserInfoError {
    /// The request timed out
    #[error("UserInfo request timed out: {0}")]
    Timeout(String),

    /// The endpoint could not be reached
    #[error("Failed to connect to UserInfo endpoint: {0}")]
    Connect(String),

    /// Non-success status or other request failure
    #[error("UserInfo request failed: {0}")]
    Http(String),

    /// The body is not a JSON object
    #[error("Invalid UserInfo response: {0}")]
    InvalidJson(String),

    /// `sub` is missing or differs from the ID token subject
    #[error("UserInfo subject does not match the ID token subject")]
    SubjectMismatch,
}

impl UserInfoError {
    /// Whether the failure was caused by the transport
    pub fn fault(&self) -> TransportFault {
        match self {
            Self::Timeout(_) => TransportFault::Timeout,
            Self::Connect(_) => TransportFault::Connect,
            _ => TransportFault::Other,
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        match classify_reqwest_error(&error) {
            TransportFault::Timeout => Self::Timeout(error.to_string()),
            TransportFault::Connect => Self::Connect(error.to_string()),
            TransportFault::Other => Self::Http(error.to_string()),
        }
    }
}

/// Fetch the UserInfo claims of `expected_subject`
///
/// # Errors
///
/// Returns [`UserInfoError`] if the request fails, the response is not a JSON
/// object, or it describes a different subject
pub async fn fetch_userinfo(
    client: &reqwest::Client,
    endpoint: &str,
    access_token: &str,
    expected_subject: &str,
) -> Result<Map<String, Value>, UserInfoError> {
    debug!(userinfo_endpoint = %endpoint, "Fetching UserInfo");

    let response = client
        .get(endpoint)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| {
            warn!(userinfo_endpoint = %endpoint, error = %e, "UserInfo request failed");
            UserInfoError::from_reqwest(e)
        })?;

    if !response.status().is_success() {
        return Err(UserInfoError::Http(format!(
            "UserInfo endpoint returned status {}",
            response.status()
        )));
    }

    let body = response.bytes().await.map_err(UserInfoError::from_reqwest)?;
    let claims: Map<String, Value> =
        serde_json::from_slice(&body).map_err(|e| UserInfoError::InvalidJson(e.to_string()))?;

    match claims.get("sub").and_then(Value::as_str) {
        Some(sub) if sub == expected_subject => Ok(claims),
        _ => {
            warn!(userinfo_endpoint = %endpoint, "UserInfo subject mismatch");
            Err(UserInfoError::SubjectMismatch)
        }
    }
}
