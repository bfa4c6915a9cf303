use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - credentials rejected")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

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

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 422 => Self::validation_from_body(body),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Parse a 4xx body into a message plus per-field errors.
    ///
    /// Accepts `{"detail": ..}`, `{"error": ..}` and field maps such as
    /// `{"email": ["already registered"]}`.
    fn validation_from_body(body: &str) -> Self {
        let mut fields = BTreeMap::new();
        let mut message = None;

        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
        {
            for (key, value) in map {
                let texts: Vec<String> = match value {
                    serde_json::Value::String(s) => vec![s],
                    serde_json::Value::Array(items) => items
                        .into_iter()
                        .map(|item| match item {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .collect(),
                    other => vec![other.to_string()],
                };
                if key == "detail" || key == "error" {
                    if message.is_none() {
                        message = texts.into_iter().next();
                    }
                } else if !texts.is_empty() {
                    fields.insert(key, texts);
                }
            }
        }

        let message = message.unwrap_or_else(|| {
            if fields.is_empty() {
                Self::truncate_body(body)
            } else {
                fields
                    .iter()
                    .map(|(field, texts)| format!("{}: {}", field, texts.join(" ")))
                    .collect::<Vec<_>>()
                    .join("; ")
            }
        });

        ApiError::Validation { message, fields }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Message suitable for the `error` field shown by the UI.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Invalid email or password".to_string(),
            ApiError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::RateLimited => "Too many attempts. Please wait and try again.".to_string(),
            ApiError::ServerError(_) => {
                "The server encountered an error. Please try again later.".to_string()
            }
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::AccessDenied(_) => "Access denied".to_string(),
            ApiError::NotFound(_) | ApiError::InvalidResponse(_) => {
                "An unexpected error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized);
        assert_eq!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited);
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            ApiError::ServerError(ref body) if body == "upstream down"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "nope"),
            ApiError::NotFound(_)
        ));
    }

    #[test]
    fn test_validation_detail_message() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"detail": "Token is invalid"}"#);
        assert_eq!(err.user_message(), "Token is invalid");
    }

    #[test]
    fn test_validation_field_errors() {
        let body = r#"{"email": ["user with this email already exists."], "password": ["too short", "too common"]}"#;
        match ApiError::from_status(StatusCode::BAD_REQUEST, body) {
            ApiError::Validation { message, fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields["password"], vec!["too short", "too common"]);
                assert_eq!(
                    message,
                    "email: user with this email already exists.; password: too short too common"
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_non_json_body() {
        match ApiError::from_status(StatusCode::BAD_REQUEST, "Bad Request") {
            ApiError::Validation { message, fields } => {
                assert_eq!(message, "Bad Request");
                assert!(fields.is_empty());
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 100);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 600 total bytes"));
    }

    #[test]
    fn test_network_message_is_generic() {
        let err = ApiError::Network("connection refused".to_string());
        assert!(err.user_message().starts_with("Unable to connect"));
        assert!(!err.is_unauthorized());
    }
}
