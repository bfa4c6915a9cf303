//! Authentication module for managing the client session lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: durable access/refresh token pair with a fixed TTL
//! - `TimerRegistry`: named recurring timers for refresh and expiry checks
//! - `ErrorLoopGuard`: per-category breaker for repeated failures
//! - `SessionController`: login, registration, logout, refresh and 401 handling
//!
//! Credential pairs expire 7 days after issuance by default.

pub mod controller;
pub mod credentials;
pub mod error;
pub mod events;
pub mod guard;
pub mod state;
pub mod storage;
pub mod timers;

pub use controller::{LogoutOutcome, RefreshOutcome, SessionController};
pub use credentials::{Clock, CredentialPair, CredentialStore, SystemClock};
pub use error::{SessionError, StorageError};
pub use events::{AuthEvent, EventBus, SessionSignal};
pub use guard::{Attempt, ErrorLoopGuard, CATEGORY_AUTH_401};
pub use state::{SessionPhase, SessionSnapshot};
pub use storage::{FileMedium, KeyringMedium, MemoryMedium, PersistenceMedium};
pub use timers::TimerRegistry;
