//! Session state machine.
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated <-> Refreshing
//!        ^                 |                 |              |
//!        +-----------------+-----------------+--------------+
//! ```
//!
//! Mutators are crate-private: only the controller drives transitions.
//! Front ends read a [`SessionSnapshot`].

use serde::Serialize;
use tracing::debug;

use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl SessionPhase {
    pub fn is_authenticated(self) -> bool {
        matches!(self, SessionPhase::Authenticated | SessionPhase::Refreshing)
    }
}

/// Read-only view handed to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub phase: SessionPhase,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    phase: SessionPhase,
    // Phase to return to if the running login/registration fails
    resume_phase: SessionPhase,
    user: Option<User>,
    busy: u32,
    last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            resume_phase: SessionPhase::Unauthenticated,
            user: None,
            busy: 0,
            last_error: None,
        }
    }
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Initial state at process start.
    pub(crate) fn restored(has_valid_credentials: bool) -> Self {
        let mut state = Self::new();
        if has_valid_credentials {
            state.phase = SessionPhase::Authenticated;
        }
        state
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.phase.is_authenticated()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy > 0
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated(),
            loading: self.is_busy(),
            error: self.last_error.clone(),
            phase: self.phase,
        }
    }

    // ------------------------------------------------------------------------
    // Busy flag
    // ------------------------------------------------------------------------

    // Counted so overlapping operations cannot clear each other's flag
    pub(crate) fn enter_busy(&mut self) {
        self.busy += 1;
    }

    pub(crate) fn exit_busy(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    pub(crate) fn begin_authentication(&mut self) {
        if self.phase != SessionPhase::Authenticating {
            self.resume_phase = self.phase;
        }
        self.last_error = None;
        self.transition(SessionPhase::Authenticating);
    }

    pub(crate) fn authentication_succeeded(&mut self, user: Option<User>) {
        self.user = None;
        self.merge_identity(user);
        self.last_error = None;
        self.transition(SessionPhase::Authenticated);
    }

    pub(crate) fn authentication_failed(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        let resume = self.resume_target();
        self.transition(resume);
    }

    /// Leave `Authenticating` without an outcome, e.g. when the attempt was
    /// dropped mid-flight. No-op once the attempt has succeeded or failed.
    pub(crate) fn authentication_abandoned(&mut self) {
        if self.phase == SessionPhase::Authenticating {
            debug!("Authentication attempt abandoned");
            let resume = self.resume_target();
            self.transition(resume);
        }
    }

    fn resume_target(&self) -> SessionPhase {
        match self.resume_phase {
            SessionPhase::Refreshing | SessionPhase::Authenticated => SessionPhase::Authenticated,
            _ => SessionPhase::Unauthenticated,
        }
    }

    /// Enter `Refreshing`. Only an authenticated session can refresh.
    pub(crate) fn begin_refresh(&mut self) -> bool {
        if self.phase != SessionPhase::Authenticated {
            debug!(phase = ?self.phase, "Refresh skipped, session not authenticated");
            return false;
        }
        self.transition(SessionPhase::Refreshing);
        true
    }

    pub(crate) fn refresh_succeeded(&mut self, user: Option<User>) {
        self.merge_identity(user);
        if self.phase == SessionPhase::Refreshing {
            self.transition(SessionPhase::Authenticated);
        }
    }

    /// Leave `Refreshing` without applying anything.
    pub(crate) fn refresh_abandoned(&mut self) {
        if self.phase == SessionPhase::Refreshing {
            self.transition(SessionPhase::Authenticated);
        }
    }

    /// Apply a fetched identity. An empty or absent payload never replaces a
    /// populated identity.
    pub(crate) fn merge_identity(&mut self, incoming: Option<User>) -> bool {
        match incoming {
            Some(user) if !user.is_empty() => {
                self.user = Some(user);
                true
            }
            _ => {
                debug!(has_user = self.user.is_some(), "Empty identity payload, keeping current user");
                false
            }
        }
    }

    /// Back to the initial signed-out state. The busy counter is left alone
    /// so in-flight operations still release their own claim.
    pub(crate) fn sign_out(&mut self) {
        self.user = None;
        self.last_error = None;
        self.resume_phase = SessionPhase::Unauthenticated;
        self.transition(SessionPhase::Unauthenticated);
    }

    fn transition(&mut self, to: SessionPhase) {
        if self.phase != to {
            debug!(from = ?self.phase, to = ?to, "Session transition");
            self.phase = to;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            username: name.to_string(),
            email: format!("{}@example.com", name),
            ..Default::default()
        }
    }

    fn authenticated(with: Option<User>) -> SessionState {
        let mut state = SessionState::new();
        state.begin_authentication();
        state.authentication_succeeded(with);
        state
    }

    #[test]
    fn test_initial_state() {
        let state = SessionState::new();
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert!(!state.is_authenticated());
        assert!(!state.is_busy());

        let restored = SessionState::restored(true);
        assert_eq!(restored.phase(), SessionPhase::Authenticated);
        assert!(restored.user().is_none());
    }

    #[test]
    fn test_login_success() {
        let state = authenticated(Some(user(1, "kana")));
        assert_eq!(state.phase(), SessionPhase::Authenticated);
        assert_eq!(state.user().map(|u| u.id), Some(1));
    }

    #[test]
    fn test_login_failure_returns_to_unauthenticated() {
        let mut state = SessionState::new();
        state.begin_authentication();
        assert_eq!(state.phase(), SessionPhase::Authenticating);
        assert!(!state.is_authenticated());

        state.authentication_failed("Invalid email or password");
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert_eq!(state.snapshot().error.as_deref(), Some("Invalid email or password"));
    }

    #[test]
    fn test_login_failure_while_signed_in_keeps_session() {
        let mut state = authenticated(Some(user(1, "kana")));
        state.begin_authentication();
        state.authentication_failed("nope");
        assert_eq!(state.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_abandoned_attempt_restores_phase() {
        let mut state = SessionState::new();
        state.begin_authentication();
        state.authentication_abandoned();
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert!(state.snapshot().error.is_none());

        let mut state = authenticated(Some(user(1, "kana")));
        state.begin_authentication();
        state.authentication_abandoned();
        assert_eq!(state.phase(), SessionPhase::Authenticated);
        assert_eq!(state.user().map(|u| u.id), Some(1));

        // Settled attempts are left alone
        state.authentication_abandoned();
        assert_eq!(state.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_refresh_requires_authenticated() {
        let mut state = SessionState::new();
        assert!(!state.begin_refresh());

        let mut state = authenticated(None);
        assert!(state.begin_refresh());
        assert_eq!(state.phase(), SessionPhase::Refreshing);
        assert!(state.is_authenticated());
        // No nested refresh
        assert!(!state.begin_refresh());
    }

    #[test]
    fn test_refresh_with_empty_identity_keeps_user() {
        let mut state = authenticated(Some(user(1, "kana")));
        state.begin_refresh();
        state.refresh_succeeded(Some(User::default()));
        assert_eq!(state.user().map(|u| u.id), Some(1));

        state.begin_refresh();
        state.refresh_succeeded(None);
        assert_eq!(state.user().map(|u| u.id), Some(1));
        assert_eq!(state.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_refresh_with_identity_overwrites_user() {
        let mut state = authenticated(Some(user(1, "kana")));
        state.begin_refresh();
        state.refresh_succeeded(Some(user(1, "kana-renamed")));
        assert_eq!(state.user().map(|u| u.username.as_str()), Some("kana-renamed"));
    }

    #[test]
    fn test_sign_out_clears_identity() {
        let mut state = authenticated(Some(user(1, "kana")));
        state.set_error("boom");
        state.sign_out();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Unauthenticated);
        assert!(snapshot.user.is_none());
        assert!(snapshot.error.is_none());
        assert!(!snapshot.is_authenticated);
    }

    #[test]
    fn test_busy_counter() {
        let mut state = SessionState::new();
        state.enter_busy();
        state.enter_busy();
        state.exit_busy();
        assert!(state.snapshot().loading);
        state.exit_busy();
        state.exit_busy();
        assert!(!state.snapshot().loading);
    }
}
