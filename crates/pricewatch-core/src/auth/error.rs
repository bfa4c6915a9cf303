use thiserror::Error;

use crate::api::ApiError;

/// Failure of a persistence medium.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable")]
    Unavailable,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Outcome of a session operation that the caller should see.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("{0} is required")]
    MissingField(&'static str),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(SessionError::PasswordMismatch.user_message(), "Passwords do not match");
        assert_eq!(SessionError::MissingField("Email").user_message(), "Email is required");
        assert_eq!(
            SessionError::from(ApiError::Unauthorized).user_message(),
            "Invalid email or password"
        );
    }
}
