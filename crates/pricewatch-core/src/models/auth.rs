use serde::{Deserialize, Serialize};

use super::User;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

impl RegisterRequest {
    pub fn passwords_match(&self) -> bool {
        self.password == self.confirm_password
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

/// Response to login and registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    #[serde(alias = "access")]
    pub access_token: String,
    #[serde(alias = "refresh")]
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<User>,
}

/// Response to `auth/refresh/`.
///
/// The refresh token is only present when the server rotates it, and the
/// user payload is usually absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshPayload {
    #[serde(alias = "access")]
    pub access_token: String,
    #[serde(default, alias = "refresh")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_payload_snake_case() {
        let json = r#"{"access_token": "a1", "refresh_token": "r1", "user": {"id": 7, "email": "x@example.com", "username": "x"}}"#;
        let payload: AuthPayload = serde_json::from_str(json).expect("payload should parse");
        assert_eq!(payload.access_token, "a1");
        assert_eq!(payload.refresh_token, "r1");
        assert_eq!(payload.user.map(|u| u.id), Some(7));
    }

    #[test]
    fn test_refresh_payload_short_names() {
        // Token-refresh endpoint answers with bare `access`/`refresh` keys
        let json = r#"{"access": "a2", "refresh": "r2"}"#;
        let payload: RefreshPayload = serde_json::from_str(json).expect("payload should parse");
        assert_eq!(payload.access_token, "a2");
        assert_eq!(payload.refresh_token.as_deref(), Some("r2"));
        assert!(payload.user.is_none());
    }

    #[test]
    fn test_refresh_payload_without_rotation() {
        let payload: RefreshPayload =
            serde_json::from_str(r#"{"access": "a3"}"#).expect("payload should parse");
        assert!(payload.refresh_token.is_none());
    }

    #[test]
    fn test_register_request_wire_names() {
        let request = RegisterRequest {
            username: "kana".to_string(),
            email: "kana@example.com".to_string(),
            password: "pw".to_string(),
            confirm_password: "pw".to_string(),
        };
        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(value["confirmPassword"], "pw");
        assert!(request.passwords_match());
    }
}
