//! Session controller.
//!
//! Orchestrates login, registration, logout, scheduled refresh, expiry
//! checks and reactive 401 handling over one shared session. Every path that
//! ends a session goes through [`SessionController::logout`], which is
//! idempotent, so a scheduled refresh and a 401 firing back-to-back converge
//! on the same teardown.
//!
//! Responses that resolve after the session they belonged to has ended are
//! detected with a session epoch and discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RequestExecutor};
use crate::config::SessionConfig;
use crate::models::{
    AuthPayload, LoginRequest, PasswordResetConfirm, RegisterRequest, User,
};

use super::credentials::CredentialStore;
use super::error::SessionError;
use super::events::{signal_channel, AuthEvent, EventBus, SessionSignal};
use super::guard::{Attempt, ErrorLoopGuard, CATEGORY_AUTH_401};
use super::state::{SessionPhase, SessionSnapshot, SessionState};
use super::timers::TimerRegistry;

/// Timer name for the scheduled token refresh
pub const REFRESH_TIMER: &str = "auth_refresh_token";

/// Timer name for the scheduled expiry check
pub const EXPIRY_TIMER: &str = "auth_token_expiry_check";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Session torn down. `session_expired` mirrors the silent flag.
    Completed { session_expired: bool },
    /// Another logout was already running; nothing done.
    AlreadyInProgress,
    /// Nothing to tear down.
    AlreadySignedOut,
    /// A login completed while the server was being notified; the new
    /// session is kept.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// No refresh token or no authenticated session this tick.
    Skipped,
    /// The session ended while the request was in flight; response dropped.
    Stale,
    /// Refresh rejected; the session was torn down.
    Failed,
}

struct Inner<E> {
    config: SessionConfig,
    executor: E,
    store: CredentialStore,
    state: Mutex<SessionState>,
    timers: TimerRegistry,
    guard: ErrorLoopGuard,
    bus: EventBus,
    signals: broadcast::Sender<SessionSignal>,
    logging_out: AtomicBool,
    epoch: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<E> Inner<E> {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch && !self.logging_out.load(Ordering::SeqCst)
    }
}

/// Holds the busy flag for the lifetime of an operation, on every exit path.
struct BusyGuard<'a> {
    state: &'a Mutex<SessionState>,
}

impl<'a> BusyGuard<'a> {
    fn enter(state: &'a Mutex<SessionState>) -> Self {
        state.lock().unwrap_or_else(|e| e.into_inner()).enter_busy();
        Self { state }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .exit_busy();
    }
}

/// Login or registration in flight. Holds the busy flag, and if dropped before
/// the attempt settles (cancelled future, aborted task) puts the phase back
/// where it was.
struct AuthAttempt<'a> {
    state: &'a Mutex<SessionState>,
}

impl<'a> AuthAttempt<'a> {
    fn begin(state: &'a Mutex<SessionState>) -> Self {
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
        guard.enter_busy();
        guard.begin_authentication();
        Self { state }
    }
}

impl Drop for AuthAttempt<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.authentication_abandoned();
        state.exit_busy();
    }
}

/// Clears the logging-out flag when logout finishes, however it finishes.
struct LogoutFlag<'a>(&'a AtomicBool);

impl Drop for LogoutFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owner of the session. Clone is cheap; clones drive the same session.
pub struct SessionController<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for SessionController<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: RequestExecutor> SessionController<E> {
    pub fn new(config: SessionConfig, executor: E, store: CredentialStore, bus: EventBus) -> Self {
        let state = SessionState::restored(store.is_valid());
        let guard = ErrorLoopGuard::new(config.loop_guard_threshold);
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                store,
                state: Mutex::new(state),
                timers: TimerRegistry::new(),
                guard,
                bus,
                signals: signal_channel(),
                logging_out: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                listener: Mutex::new(None),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Read model
    // ------------------------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock_state().snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock_state().is_authenticated()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock_state().phase()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock_state().user().cloned()
    }

    pub fn clear_error(&self) {
        self.inner.lock_state().clear_error();
    }

    /// Lifecycle notifications (login, refresh, identity switch, logout).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.inner.signals.subscribe()
    }

    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    // ------------------------------------------------------------------------
    // Process lifecycle
    // ------------------------------------------------------------------------

    /// Process-start duties: reset the guard and timers, start listening for
    /// auth events, and either resume the stored session or clear it.
    pub async fn start(&self) {
        let inner = &self.inner;
        inner.guard.reset_all();
        inner.timers.cancel_all();
        self.spawn_listener();

        if inner.store.is_valid() {
            info!("Resuming stored session");
            {
                let mut state = inner.lock_state();
                if !state.is_authenticated() {
                    *state = SessionState::restored(true);
                }
            }
            self.start_timers();
            self.reconcile_identity(inner.current_epoch()).await;
        } else {
            if inner.store.has_any() {
                info!("Stored credentials expired or incomplete, clearing");
                inner.store.clear();
            }
            inner.lock_state().sign_out();
        }
    }

    /// Process teardown: stop every timer and the auth-event listener.
    pub fn shutdown(&self) {
        self.inner.timers.cancel_all();
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = listener {
            handle.abort();
        }
        debug!("Session controller shut down");
    }

    fn spawn_listener(&self) {
        let mut rx = self.inner.bus.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionController { inner }.handle_auth_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Auth event listener stopped");
        });

        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn start_timers(&self) {
        let inner = &self.inner;

        let weak = Arc::downgrade(inner);
        inner
            .timers
            .schedule(REFRESH_TIMER, inner.config.refresh_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        SessionController { inner }.refresh_session().await;
                    }
                }
            });

        let weak = Arc::downgrade(inner);
        inner
            .timers
            .schedule(EXPIRY_TIMER, inner.config.expiry_check_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        SessionController { inner }.check_expiry().await;
                    }
                }
            });
    }

    // ------------------------------------------------------------------------
    // Login / Registration
    // ------------------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<User>, SessionError> {
        if email.trim().is_empty() {
            return self.fail_local(SessionError::MissingField("Email"));
        }
        if password.is_empty() {
            return self.fail_local(SessionError::MissingField("Password"));
        }

        let _attempt = AuthAttempt::begin(&self.inner.state);

        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let result = self.inner.executor.login(&request).await;
        self.complete_authentication(result, "Login").await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Option<User>, SessionError> {
        let request = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        if request.email.is_empty() {
            return self.fail_local(SessionError::MissingField("Email"));
        }
        if request.password.is_empty() {
            return self.fail_local(SessionError::MissingField("Password"));
        }
        if !request.passwords_match() {
            return self.fail_local(SessionError::PasswordMismatch);
        }

        let _attempt = AuthAttempt::begin(&self.inner.state);

        let result = self.inner.executor.register(&request).await;
        self.complete_authentication(result, "Registration").await
    }

    async fn complete_authentication(
        &self,
        result: Result<AuthPayload, ApiError>,
        action: &'static str,
    ) -> Result<Option<User>, SessionError> {
        let inner = &self.inner;
        match result {
            Ok(payload) => {
                let user = payload.user.filter(|u| !u.is_empty());
                let epoch = {
                    let mut state = inner.lock_state();
                    inner.store.save(&payload.access_token, &payload.refresh_token);
                    state.authentication_succeeded(user.clone());
                    inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
                };
                inner.guard.reset_category(CATEGORY_AUTH_401);

                if let Some(ref user) = user {
                    self.observe_identity(user);
                }
                self.start_timers();
                info!(action, user = ?user.as_ref().map(|u| u.id), "Authentication successful");
                self.emit(SessionSignal::LoggedIn {
                    user_id: user.as_ref().and_then(User::identity_key),
                });

                if user.is_none() {
                    self.reconcile_identity(epoch).await;
                }
                Ok(self.user())
            }
            Err(e) => {
                warn!(action, error = %e, "Authentication failed");
                inner.lock_state().authentication_failed(e.user_message());
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------------

    pub async fn request_password_reset(&self, email: &str) -> Result<String, SessionError> {
        let email = email.trim();
        if email.is_empty() {
            return self.fail_local(SessionError::MissingField("Email"));
        }

        let _busy = BusyGuard::enter(&self.inner.state);
        self.inner.lock_state().clear_error();
        match self.inner.executor.request_password_reset(email).await {
            Ok(message) => Ok(message),
            Err(e) => self.fail_api(e, "Password reset request failed"),
        }
    }

    pub async fn confirm_password_reset(
        &self,
        token: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<String, SessionError> {
        if token.trim().is_empty() {
            return self.fail_local(SessionError::MissingField("Reset token"));
        }
        if password.is_empty() {
            return self.fail_local(SessionError::MissingField("Password"));
        }
        if password != confirm_password {
            return self.fail_local(SessionError::PasswordMismatch);
        }

        let _busy = BusyGuard::enter(&self.inner.state);
        self.inner.lock_state().clear_error();
        let request = PasswordResetConfirm {
            token: token.trim().to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        match self.inner.executor.confirm_password_reset(&request).await {
            Ok(message) => Ok(message),
            Err(e) => self.fail_api(e, "Password reset confirmation failed"),
        }
    }

    fn fail_local<T>(&self, err: SessionError) -> Result<T, SessionError> {
        debug!(error = %err, "Rejected locally");
        self.inner.lock_state().set_error(err.user_message());
        Err(err)
    }

    fn fail_api<T>(&self, err: ApiError, context: &'static str) -> Result<T, SessionError> {
        warn!(error = %err, "{}", context);
        self.inner.lock_state().set_error(err.user_message());
        Err(err.into())
    }

    // ------------------------------------------------------------------------
    // Logout
    // ------------------------------------------------------------------------

    /// End the session.
    ///
    /// `silent` skips the server notification and marks the logout as forced
    /// (expiry, rejected credentials, failed refresh). A logout started while
    /// another is running is a no-op.
    pub async fn logout(&self, silent: bool) -> LogoutOutcome {
        let inner = &self.inner;
        if inner
            .logging_out
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Logout already in progress, skipping");
            return LogoutOutcome::AlreadyInProgress;
        }
        let _flag = LogoutFlag(&inner.logging_out);

        {
            let state = inner.lock_state();
            if state.phase() == SessionPhase::Unauthenticated
                && !inner.store.has_any()
                && inner.timers.is_empty()
            {
                debug!("Already signed out");
                return LogoutOutcome::AlreadySignedOut;
            }
        }

        debug!(silent, "Logging out");
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.timers.cancel_all();

        if !silent {
            let refresh_token = inner.store.refresh_token();
            if let Err(e) = inner.executor.logout(refresh_token.as_deref()).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        {
            let mut state = inner.lock_state();
            if inner.current_epoch() != epoch {
                info!("Signed in again during logout, keeping the new session");
                return LogoutOutcome::Superseded;
            }
            inner.store.clear();
            state.sign_out();
        }
        // Anything scheduled while the server call was in flight goes too
        inner.timers.cancel_all();
        inner.guard.reset_all();

        info!(session_expired = silent, "Logged out");
        self.emit(SessionSignal::LoggedOut {
            session_expired: silent,
        });
        LogoutOutcome::Completed {
            session_expired: silent,
        }
    }

    // ------------------------------------------------------------------------
    // Scheduled tasks
    // ------------------------------------------------------------------------

    /// One refresh tick: swap the credential pair, then reconcile identity.
    /// Any refresh failure ends the session.
    pub async fn refresh_session(&self) -> RefreshOutcome {
        let inner = &self.inner;
        let Some(refresh_token) = inner.store.refresh_token() else {
            debug!("No refresh token stored, skipping refresh");
            return RefreshOutcome::Skipped;
        };
        if inner.logging_out.load(Ordering::SeqCst) {
            return RefreshOutcome::Skipped;
        }

        let epoch = inner.current_epoch();
        if !inner.lock_state().begin_refresh() {
            return RefreshOutcome::Skipped;
        }
        let _busy = BusyGuard::enter(&inner.state);

        match inner.executor.refresh(&refresh_token).await {
            Ok(payload) => {
                let incoming = payload.user.filter(|u| !u.is_empty());
                {
                    let mut state = inner.lock_state();
                    if !inner.is_current(epoch) {
                        state.refresh_abandoned();
                        info!("Refresh response arrived after the session ended, discarding");
                        return RefreshOutcome::Stale;
                    }
                    let next_refresh = payload
                        .refresh_token
                        .as_deref()
                        .filter(|t| !t.is_empty())
                        .unwrap_or(refresh_token.as_str());
                    inner.store.save(&payload.access_token, next_refresh);
                    state.refresh_succeeded(incoming.clone());
                }

                if let Some(ref user) = incoming {
                    self.observe_identity(user);
                }
                info!("Access token refreshed");
                self.emit(SessionSignal::Refreshed);

                self.reconcile_identity(epoch).await;
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                if !inner.is_current(epoch) {
                    inner.lock_state().refresh_abandoned();
                    debug!(error = %e, "Refresh failed after the session ended");
                    return RefreshOutcome::Stale;
                }
                warn!(error = %e, "Token refresh failed, ending session");
                inner.lock_state().refresh_abandoned();
                self.logout(true).await;
                RefreshOutcome::Failed
            }
        }
    }

    /// One expiry tick. Ends the session, without a network call, once the
    /// stored pair has reached its TTL or is missing a slot.
    pub async fn check_expiry(&self) -> bool {
        let inner = &self.inner;
        let ended = match inner.store.read() {
            Some(_) => inner.store.is_expired(),
            None => self.is_authenticated() || inner.store.has_any(),
        };
        if !ended {
            debug!("Stored credentials still valid");
            return false;
        }
        warn!("Stored credentials expired, ending session");
        self.logout(true).await;
        true
    }

    // ------------------------------------------------------------------------
    // Reactive 401 handling
    // ------------------------------------------------------------------------

    /// Handle an event from the transport. Returns true if it ended the session.
    pub async fn handle_auth_event(&self, event: &AuthEvent) -> bool {
        let AuthEvent::Unauthorized { url } = event;
        debug!(url = %url, "Auth error observed");

        let handler = self.inner.guard.attempt(CATEGORY_AUTH_401, || {
            let controller = self.clone();
            async move {
                if controller.inner.logging_out.load(Ordering::SeqCst) {
                    debug!("Logout already in progress, ignoring auth event");
                    return false;
                }
                matches!(
                    controller.logout(true).await,
                    LogoutOutcome::Completed { .. }
                )
            }
        });

        match handler {
            Attempt::Ran(logout) => logout.await,
            Attempt::Suppressed => false,
        }
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    async fn reconcile_identity(&self, epoch: u64) {
        let inner = &self.inner;
        match inner.executor.fetch_current_identity().await {
            Ok(Some(user)) => {
                let applied = {
                    let mut state = inner.lock_state();
                    inner.is_current(epoch)
                        && state.is_authenticated()
                        && state.merge_identity(Some(user.clone()))
                };
                if applied {
                    self.observe_identity(&user);
                } else {
                    debug!("Identity response arrived after the session ended, discarding");
                }
            }
            Ok(None) => debug!("Server returned no identity, keeping current user"),
            Err(e) => warn!(error = %e, "Failed to reconcile user identity"),
        }
    }

    /// Compare a fetched identity against the last-seen marker and announce
    /// a switch before recording the new one.
    fn observe_identity(&self, user: &User) {
        let Some(current) = user.identity_key() else {
            return;
        };
        if let Some(previous) = self.inner.store.identity_marker() {
            if previous != current {
                info!(previous = %previous, current = %current, "Different user signed in");
                self.emit(SessionSignal::IdentitySwitched {
                    previous,
                    current: current.clone(),
                });
            }
        }
        self.inner.store.set_identity_marker(&current);
    }

    fn emit(&self, signal: SessionSignal) {
        if self.inner.signals.send(signal).is_err() {
            debug!("No session signal subscribers");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
