//! Callback validation
//!
//! The provider redirects the browser back with either `code` + `state` or an
//! error triple. Checks run in a fixed order:
//!
//! 1. an `error` (or `error_reason`) parameter aborts the attempt with a
//!    [`CallbackError`], whatever the state says
//! 2. an empty `state`, or one that differs from the value consumed from the
//!    session, is a silent rejection answered with 401
//! 3. otherwise the authorization code may be exchanged

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CallbackError;
use crate::oauth2::validation::one_time_values_match;
use crate::session::{OneTimeToken, SessionStore};

/// Body of the response to a forged or replayed callback
pub const UNAUTHORIZED_BODY: &str = "401 Unauthorized";

/// Raw parameters of the provider redirect
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CallbackParameters {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,
    /// Round-tripped state
    #[serde(default)]
    pub state: Option<String>,
    /// OAuth error code
    #[serde(default)]
    pub error: Option<String>,
    /// Non-standard error field some providers send instead of `error`
    #[serde(default)]
    pub error_reason: Option<String>,
    /// Human readable error description
    #[serde(default)]
    pub error_description: Option<String>,
    /// Page with more information about the error
    #[serde(default)]
    pub error_uri: Option<String>,
}

impl CallbackParameters {
    /// Parse an `application/x-www-form-urlencoded` query string or body
    ///
    /// A leading `?` is ignored. Unknown parameters are ignored; a repeated
    /// parameter keeps its first value.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Collect from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_reason" => &mut params.error_reason,
                "error_description" => &mut params.error_description,
                "error_uri" => &mut params.error_uri,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        params
    }

    /// Error reported by the provider, if any
    ///
    /// Either parameter being present counts, even with an empty value. The
    /// reported code is the first non-empty of `error` and `error_reason`;
    /// the description also falls back to `error_reason`.
    pub fn provider_error(&self) -> Option<CallbackError> {
        if self.error.is_none() && self.error_reason.is_none() {
            return None;
        }
        let error = non_empty(&self.error)
            .or_else(|| non_empty(&self.error_reason))
            .unwrap_or_default();
        Some(CallbackError {
            error: error.to_string(),
            description: non_empty(&self.error_description)
                .or_else(|| non_empty(&self.error_reason))
                .map(str::to_string),
            uri: non_empty(&self.error_uri).map(str::to_string),
        })
    }

    /// The authorization code, if present and non-empty
    pub fn code(&self) -> Option<&str> {
        non_empty(&self.code)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Why a callback was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRejection {
    /// The provider reported an error
    Provider(CallbackError),
    /// The state is empty or does not match the stored one
    StateMismatch,
}

/// Validate the callback against the session
///
/// The stored state is consumed whenever the error check passes, so a second
/// callback with the same parameters is always rejected.
///
/// # Errors
///
/// Returns [`CallbackRejection`] if the callback must not proceed to the
/// token exchange
pub fn validate_callback<S: SessionStore + ?Sized>(
    params: &CallbackParameters,
    session: &mut S,
) -> Result<(), CallbackRejection> {
    if let Some(error) = params.provider_error() {
        warn!(error = %error.error, "Provider returned an error to the callback");
        return Err(CallbackRejection::Provider(error));
    }

    let stored = OneTimeToken::STATE.consume(session);
    let received = params.state.as_deref().unwrap_or_default();
    let matches = stored
        .as_deref()
        .is_some_and(|stored| one_time_values_match(stored, received));

    if !matches {
        warn!(
            state_present = !received.is_empty(),
            stored_present = stored.is_some(),
            "Callback state does not match, rejecting"
        );
        return Err(CallbackRejection::StateMismatch);
    }

    debug!("Callback state verified");
    Ok(())
}

/// The direct 401 answer to a callback with a bad state
pub fn unauthorized_response() -> Response<String> {
    let mut response = Response::new(UNAUTHORIZED_BODY.to_string());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySession, STATE_KEY};

    #[test]
    fn test_from_query() {
        let params = CallbackParameters::from_query("?code=abc&state=xyz&extra=1&code=ignored");
        assert_eq!(params.code(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn test_from_query_decodes_values() {
        let params = CallbackParameters::from_query(
            "error=access_denied&error_description=The+user+said+no%21&error_uri=https%3A%2F%2Fidp.example%2Fhelp",
        );
        assert_eq!(
            params.provider_error(),
            Some(CallbackError {
                error: "access_denied".to_string(),
                description: Some("The user said no!".to_string()),
                uri: Some("https://idp.example/help".to_string()),
            })
        );
    }

    #[test]
    fn test_error_reason_fallbacks() {
        let params = CallbackParameters::from_pairs([("error_reason", "user_denied")]);
        let error = params.provider_error().unwrap();
        assert_eq!(error.error, "user_denied");
        assert_eq!(error.description.as_deref(), Some("user_denied"));

        let params = CallbackParameters::from_pairs([
            ("error", "access_denied"),
            ("error_reason", "user_denied"),
        ]);
        let error = params.provider_error().unwrap();
        assert_eq!(error.error, "access_denied");
        assert_eq!(error.description.as_deref(), Some("user_denied"));
    }

    #[test]
    fn test_matching_state_proceeds() {
        let mut session = MemorySession::new();
        let state = OneTimeToken::STATE.generate(&mut session);
        let params = CallbackParameters::from_pairs([("code", "c"), ("state", state.as_str())]);

        assert_eq!(validate_callback(&params, &mut session), Ok(()));
        assert!(!session.contains(STATE_KEY));

        // Replay of the same callback
        assert_eq!(
            validate_callback(&params, &mut session),
            Err(CallbackRejection::StateMismatch)
        );
    }

    #[test]
    fn test_empty_or_wrong_state_rejected() {
        for state in ["", "not-the-state"] {
            let mut session = MemorySession::new();
            OneTimeToken::STATE.generate(&mut session);
            let params = CallbackParameters::from_pairs([("code", "c"), ("state", state)]);
            assert_eq!(
                validate_callback(&params, &mut session),
                Err(CallbackRejection::StateMismatch)
            );
        }
    }

    #[test]
    fn test_missing_stored_state_rejected() {
        let mut session = MemorySession::new();
        let params = CallbackParameters::from_pairs([("code", "c"), ("state", "anything")]);
        assert_eq!(
            validate_callback(&params, &mut session),
            Err(CallbackRejection::StateMismatch)
        );
    }

    #[test]
    fn test_error_wins_over_state_mismatch() {
        let mut session = MemorySession::new();
        OneTimeToken::STATE.generate(&mut session);
        let params = CallbackParameters::from_pairs([
            ("error", "access_denied"),
            ("error_description", "denied"),
            ("error_uri", "https://idp.example/e"),
            ("state", "wrong"),
        ]);

        match validate_callback(&params, &mut session) {
            Err(CallbackRejection::Provider(error)) => {
                assert_eq!(error.error, "access_denied");
                assert_eq!(error.description.as_deref(), Some("denied"));
                assert_eq!(error.uri.as_deref(), Some("https://idp.example/e"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_error_still_aborts() {
        let mut session = MemorySession::new();
        let state = OneTimeToken::STATE.generate(&mut session);
        let params = CallbackParameters::from_query(&format!("error=&code=c&state={state}"));

        assert_eq!(
            validate_callback(&params, &mut session),
            Err(CallbackRejection::Provider(CallbackError {
                error: String::new(),
                description: None,
                uri: None,
            }))
        );
        assert!(session.contains(STATE_KEY));

        let params = CallbackParameters::from_pairs([("error_reason", ""), ("error", "")]);
        assert!(params.provider_error().is_some());
        assert!(CallbackParameters::from_pairs([("code", "c")]).provider_error().is_none());
    }

    #[test]
    fn test_unauthorized_response() {
        let response = unauthorized_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body(), UNAUTHORIZED_BODY);
    }
}
