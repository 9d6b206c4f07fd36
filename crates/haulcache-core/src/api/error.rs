use std::time::Duration;

use thiserror::Error;

/// Errors produced by the fetch layer.
///
/// Cloneable so a call-site can keep the last failure in its exposed state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request failed with status {status} {status_text}")]
    Response {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("No response within {}s - the server may be waking up", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, status_text: &str, body: &str) -> Self {
        ApiError::Response {
            status,
            status_text: status_text.to_string(),
            body: Self::truncate_body(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// The backend could not be reached or is still starting up.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::Response { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Failures worth another attempt under a retry policy.
    pub fn is_retryable(&self) -> bool {
        self.is_connectivity() || self.status() == Some(429)
    }

    /// Short message suitable for showing next to a retry button.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Timeout(_) => "The server is taking a while to respond. It may be waking up, please try again.".to_string(),
            ApiError::Network(_) => "Could not reach the server. Check your connection and try again.".to_string(),
            ApiError::Response { status: 401, .. } => "Your session has expired. Please sign in again.".to_string(),
            ApiError::Response { status: 403, .. } => "You do not have access to this resource.".to_string(),
            ApiError::Response { status: 404, .. } => "The requested resource was not found.".to_string(),
            ApiError::Response { status: 429, .. } => "Too many requests - please wait before retrying.".to_string(),
            ApiError::Response { status, .. } if *status >= 500 => "The server ran into a problem. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_truncates_long_body() {
        let body = "x".repeat(2000);
        let err = ApiError::from_status(500, "Internal Server Error", &body);
        match err {
            ApiError::Response { status, body, .. } => {
                assert_eq!(status, 500);
                assert!(body.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
                assert!(body.ends_with("(truncated, 2000 total bytes)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // 'é' is two bytes, so byte 500 falls inside a character
        let body = format!("a{}", "é".repeat(400));
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_classification() {
        let not_found = ApiError::from_status(404, "Not Found", "");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retryable());

        assert!(ApiError::from_status(429, "Too Many Requests", "").is_retryable());
        assert!(ApiError::from_status(503, "Service Unavailable", "").is_connectivity());
        assert!(ApiError::Timeout(Duration::from_secs(15)).is_retryable());
        assert!(ApiError::Network("refused".into()).is_connectivity());
        assert!(!ApiError::InvalidResponse("eof".into()).is_retryable());
        assert!(ApiError::from_status(401, "Unauthorized", "").is_unauthorized());
    }

    #[test]
    fn test_timeout_message_mentions_waking_up() {
        let err = ApiError::Timeout(Duration::from_secs(15));
        assert!(err.user_message().contains("waking up"));
        assert_eq!(err.to_string(), "No response within 15s - the server may be waking up");
    }
}
