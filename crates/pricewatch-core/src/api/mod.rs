//! REST API plumbing for the pricewatch service.
//!
//! This module provides the `RequestExecutor` seam the session controller
//! depends on, its reqwest-backed `HttpExecutor`, and the
//! `TransportInterceptor` that authorizes outbound requests.
//!
//! The API uses bearer access tokens paired with rotating refresh tokens.

pub mod client;
pub mod error;
pub mod executor;
pub mod interceptor;

pub use client::HttpExecutor;
pub use error::ApiError;
pub use executor::RequestExecutor;
pub use interceptor::TransportInterceptor;
