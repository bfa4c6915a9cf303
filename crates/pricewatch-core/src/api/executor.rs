use async_trait::async_trait;

use crate::models::{
    AuthPayload, LoginRequest, PasswordResetConfirm, RefreshPayload, RegisterRequest, User,
};

use super::ApiError;

/// The authentication endpoints the session depends on.
///
/// Every call returns either its payload or a classified [`ApiError`].
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ApiError>;

    /// Exchange a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshPayload, ApiError>;

    /// Tell the server the session is over. Best effort.
    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError>;

    /// Current account, or `None` if the server returned no identity.
    async fn fetch_current_identity(&self) -> Result<Option<User>, ApiError>;

    /// Returns the server's confirmation message.
    async fn request_password_reset(&self, email: &str) -> Result<String, ApiError>;

    async fn confirm_password_reset(&self, request: &PasswordResetConfirm)
        -> Result<String, ApiError>;
}
