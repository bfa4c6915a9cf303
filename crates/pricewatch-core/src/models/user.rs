use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated account as returned by `auth/me/`.
///
/// Every field is defaulted so that an empty `{}` payload still parses;
/// such a payload is considered empty and never replaces a known identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// True when the payload carries no usable identity.
    pub fn is_empty(&self) -> bool {
        self.id == 0 && self.username.is_empty() && self.email.is_empty()
    }

    /// Stable identifier used for identity-switch detection.
    pub fn identity_key(&self) -> Option<String> {
        if self.id != 0 {
            Some(self.id.to_string())
        } else if !self.email.is_empty() {
            Some(self.email.clone())
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.username.is_empty() {
            &self.username
        } else {
            &self.email
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_parses_as_empty_user() {
        let user: User = serde_json::from_str("{}").expect("empty object should parse");
        assert!(user.is_empty());
        assert_eq!(user.identity_key(), None);
    }

    #[test]
    fn test_populated_payload() {
        let json = r#"{"id": 42, "email": "kana@example.com", "username": "kana", "created_at": "2024-03-01T09:00:00Z", "last_login": null}"#;
        let user: User = serde_json::from_str(json).expect("user payload should parse");
        assert!(!user.is_empty());
        assert_eq!(user.identity_key().as_deref(), Some("42"));
        assert_eq!(user.display_name(), "kana");
        assert!(user.created_at.is_some());
    }

    #[test]
    fn test_identity_key_falls_back_to_email() {
        let user = User {
            email: "someone@example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(user.identity_key().as_deref(), Some("someone@example.com"));
        assert_eq!(user.display_name(), "someone@example.com");
    }
}
