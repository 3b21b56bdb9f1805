//! OAuth 2.0 Validation Functions
//!
//! This module provides validation helpers shared by the flow:
//! - Redirect URI security checks
//! - Constant-time comparison of one-time values (state, nonce)

use subtle::ConstantTimeEq;
use url::Url;

/// Redirect URI validation with security checks
///
/// Security considerations:
/// - Prevents open redirect attacks
/// - Validates URL format and structure
/// - Plain http only for loopback hosts (local development)
///
/// # Errors
///
/// Returns a human-readable reason when the URI is rejected
pub fn validate_redirect_uri(uri: &str) -> Result<(), String> {
    // Url::parse normalizes dot segments away, so look at the raw path
    if has_dot_segment(uri) {
        return Err("Redirect URI path must not contain traversal sequences".to_string());
    }

    let parsed = Url::parse(uri).map_err(|e| format!("Invalid redirect URI format: {e}"))?;

    match parsed.scheme() {
        "http" => {
            let host = parsed
                .host_str()
                .ok_or_else(|| "Redirect URI must have a valid host".to_string())?;
            let is_loopback = host == "localhost" || host == "127.0.0.1" || host == "[::1]";
            if !is_loopback {
                return Err(
                    "HTTP redirect URIs only allowed for localhost in development".to_string(),
                );
            }
        }
        "https" => {}
        scheme if scheme.starts_with("app.") || scheme.ends_with(".app") => {
            // Allow app-specific custom schemes
        }
        other => {
            return Err(format!(
                "Unsupported redirect URI scheme: {other}. Use https, http (localhost only), or app-specific schemes"
            ));
        }
    }

    // RFC 6749 section 3.1.2
    if parsed.fragment().is_some() {
        return Err("Redirect URI must not contain URL fragment".to_string());
    }

    Ok(())
}

/// Whether the path before any query or fragment has a `.` or `..` segment,
/// plain or percent-encoded
fn has_dot_segment(uri: &str) -> bool {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    let path = uri[..end]
        .split_once("://")
        .map_or(&uri[..end], |(_, rest)| rest);
    path.split(['/', '\\']).skip(1).any(|segment| {
        let segment = segment.to_ascii_lowercase().replace("%2e", ".");
        segment == "." || segment == ".."
    })
}

/// Constant-time comparison of a stored one-time value against a received one
///
/// Empty values never match, so an absent stored value and an empty received
/// value cannot satisfy each other.
pub fn one_time_values_match(expected: &str, received: &str) -> bool {
    if expected.is_empty() || received.is_empty() {
        return false;
    }
    bool::from(expected.as_bytes().ct_eq(received.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_redirect_allowed() {
        assert!(validate_redirect_uri("https://app.example/auth/callback").is_ok());
    }

    #[test]
    fn test_http_localhost_allowed() {
        assert!(validate_redirect_uri("http://localhost:3000/callback").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1:8080/callback").is_ok());
    }

    #[test]
    fn test_http_remote_rejected() {
        let err = validate_redirect_uri("http://app.example/callback").unwrap_err();
        assert!(err.contains("localhost"));
    }

    #[test]
    fn test_fragment_rejected() {
        let err = validate_redirect_uri("https://app.example/callback#frag").unwrap_err();
        assert!(err.contains("fragment"));
    }

    #[test]
    fn test_traversal_rejected() {
        for uri in [
            "https://app.example/auth/../admin/callback",
            "https://app.example/auth/./callback",
            "https://app.example/auth/..",
            "https://app.example/auth/%2e%2E/callback",
            "http://localhost:3000/a/../callback?next=1",
        ] {
            let err = validate_redirect_uri(uri).unwrap_err();
            assert!(err.contains("traversal"), "{uri}: {err}");
        }

        assert!(validate_redirect_uri("https://app.example/auth/..well/callback").is_ok());
        assert!(validate_redirect_uri("https://app.example/callback?path=../x").is_ok());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(validate_redirect_uri("ftp://app.example/callback").is_err());
        assert!(validate_redirect_uri("not a url").is_err());
    }

    #[test]
    fn test_one_time_values_match() {
        assert!(one_time_values_match("abc123", "abc123"));
        assert!(!one_time_values_match("abc123", "abc124"));
        assert!(!one_time_values_match("State123", "state123"));
        assert!(!one_time_values_match("abc", "abc123"));
    }

    #[test]
    fn test_empty_values_never_match() {
        assert!(!one_time_values_match("", ""));
        assert!(!one_time_values_match("", "abc"));
        assert!(!one_time_values_match("abc", ""));
    }
}
