//! Data models exchanged with the pricewatch API.
//!
//! Only the authentication surface lives here; product and notification
//! models belong to the dashboard collaborators.

pub mod auth;
pub mod user;

pub use auth::{
    AuthPayload, LoginRequest, PasswordResetConfirm, RefreshPayload, RegisterRequest,
};
pub use user::User;
