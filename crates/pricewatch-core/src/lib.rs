//! Core library for pricewatch.
//!
//! Owns the client-side session lifecycle: the durable credential pair,
//! scheduled refresh and expiry checks, reactive handling of rejected
//! credentials, and the HTTP plumbing the session depends on.
//!
//! Front ends construct a [`SessionController`] and read its
//! [`SessionSnapshot`]; they never mutate session state directly.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, HttpExecutor, RequestExecutor, TransportInterceptor};
pub use auth::{
    AuthEvent, CredentialStore, ErrorLoopGuard, EventBus, SessionController, SessionError,
    SessionPhase, SessionSignal, SessionSnapshot, TimerRegistry,
};
pub use config::SessionConfig;
pub use models::User;
