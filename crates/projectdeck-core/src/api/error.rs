use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Fragments of a 403 detail that mean the credential itself is bad,
/// as opposed to the principal lacking permission.
const CREDENTIAL_FAILURE_MARKERS: [&str; 3] = [
    "Invalid token",
    "Token expired",
    "Could not validate credentials",
];

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull the human-readable reason out of an error body.
    ///
    /// The backend wraps reasons as `{"detail": "..."}`. Anything else
    /// (validation arrays, HTML error pages, empty bodies) falls back to
    /// the raw body text.
    pub fn extract_detail(body: &str) -> String {
        Self::detail_field(body).unwrap_or_else(|| body.to_string())
    }

    /// The `detail` string of a JSON error body, and nothing else.
    fn detail_field(body: &str) -> Option<String> {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(mut map)) => match map.remove("detail") {
                Some(Value::String(detail)) => Some(detail),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether a 403 detail points at an invalid or expired credential.
    pub fn is_credential_failure(detail: &str) -> bool {
        CREDENTIAL_FAILURE_MARKERS
            .iter()
            .any(|marker| detail.contains(marker))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = Self::truncate_body(&Self::extract_detail(body));
        match status.as_u16() {
            400 => ApiError::BadRequest(detail),
            401 => ApiError::Unauthorized(detail),
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            422 => ApiError::Validation(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    /// The server-supplied reason, if this error carries one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(d)
            | ApiError::AccessDenied(d)
            | ApiError::BadRequest(d)
            | ApiError::NotFound(d)
            | ApiError::Validation(d)
            | ApiError::ServerError(d) => Some(d.as_str()),
            _ => None,
        }
    }

    /// Whether a rejection means the current session is no longer valid.
    ///
    /// Every 401 does. A 403 only does when its `detail` string names a
    /// credential failure; bodies without one are permission problems.
    pub fn invalidates_session(status: reqwest::StatusCode, body: &str) -> bool {
        match status.as_u16() {
            401 => true,
            403 => Self::detail_field(body)
                .map(|detail| Self::is_credential_failure(&detail))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_extract_detail_from_json() {
        assert_eq!(
            ApiError::extract_detail(r#"{"detail": "Token expired"}"#),
            "Token expired"
        );
    }

    #[test]
    fn test_extract_detail_falls_back_to_body() {
        assert_eq!(ApiError::extract_detail("Bad Gateway"), "Bad Gateway");
        // FastAPI validation errors carry a list, not a string
        let body = r#"{"detail": [{"loc": ["body", "email"], "msg": "field required"}]}"#;
        assert_eq!(ApiError::extract_detail(body), body);
    }

    #[test]
    fn test_from_status_mapping() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"detail":"nope"}"#);
        assert!(matches!(err, ApiError::Unauthorized(ref d) if d == "nope"));

        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"detail":"Inactive user"}"#);
        assert_eq!(err.detail(), Some("Inactive user"));

        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_credential_flavored_403() {
        for detail in ["Token expired", "Invalid token", "Could not validate credentials"] {
            let body = json!({ "detail": detail }).to_string();
            assert!(
                ApiError::invalidates_session(StatusCode::FORBIDDEN, &body),
                "{} should invalidate",
                detail
            );
        }

        let body = r#"{"detail":"Insufficient permissions"}"#;
        assert!(!ApiError::invalidates_session(StatusCode::FORBIDDEN, body));

        assert!(ApiError::invalidates_session(StatusCode::UNAUTHORIZED, ""));
        assert!(!ApiError::invalidates_session(StatusCode::NOT_FOUND, r#"{"detail":"Token expired"}"#));
    }

    #[test]
    fn test_403_without_detail_keeps_session() {
        // Only the detail string counts, not text elsewhere in the body
        let body = r#"{"error":"Invalid token scope"}"#;
        assert!(!ApiError::invalidates_session(StatusCode::FORBIDDEN, body));
        assert!(!ApiError::invalidates_session(StatusCode::FORBIDDEN, "Token expired"));

        // The raw body is still what the caller sees
        let err = ApiError::from_status(StatusCode::FORBIDDEN, body);
        assert_eq!(err.detail(), Some(body));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(600);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.contains("600 total bytes"));

        // Never split a multi-byte character
        let accented = "é".repeat(300);
        let truncated = ApiError::truncate_body(&accented);
        assert!(truncated.contains("truncated"));
    }
}
