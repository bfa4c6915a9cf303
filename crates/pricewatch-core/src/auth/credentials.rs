//! Durable credential pair with a fixed time-to-live.
//!
//! Every read and write fails soft: an unavailable medium behaves exactly
//! like an empty one, so callers only ever see "session" or "no session".

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use super::storage::PersistenceMedium;

const TOKEN_KEY: &str = "token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const TIMESTAMP_KEY: &str = "token_timestamp";
const LAST_USER_KEY: &str = "last_user_id";

/// Source of "now" for validity checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    /// Valid while strictly younger than `ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Credential pair slots plus the identity-switch marker.
/// Clone is cheap and clones share the same medium.
#[derive(Clone)]
pub struct CredentialStore {
    medium: Option<Arc<dyn PersistenceMedium>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CredentialStore {
    pub fn new(medium: Arc<dyn PersistenceMedium>, ttl: Duration) -> Self {
        Self::with_clock(Some(medium), Arc::new(SystemClock), ttl)
    }

    /// Store with no medium at all; behaves as permanently signed out.
    pub fn detached(ttl: Duration) -> Self {
        Self::with_clock(None, Arc::new(SystemClock), ttl)
    }

    pub fn with_clock(
        medium: Option<Arc<dyn PersistenceMedium>>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self { medium, clock, ttl }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Write both tokens and stamp them with the current time.
    /// A partial write is rolled back so the slots never hold half a pair.
    pub fn save(&self, access_token: &str, refresh_token: &str) {
        let Some(medium) = self.medium.as_ref() else {
            debug!("No persistence medium, credential pair not saved");
            return;
        };

        let issued_at = self.clock.now().timestamp_millis().to_string();
        let result = medium
            .set(TOKEN_KEY, access_token)
            .and_then(|_| medium.set(REFRESH_TOKEN_KEY, refresh_token))
            .and_then(|_| medium.set(TIMESTAMP_KEY, &issued_at));

        match result {
            Ok(()) => debug!("Credential pair saved"),
            Err(e) => {
                warn!(error = %e, "Failed to save credential pair, rolling back");
                self.clear();
            }
        }
    }

    pub fn read(&self) -> Option<CredentialPair> {
        let access_token = self.get(TOKEN_KEY)?;
        let refresh_token = self.get(REFRESH_TOKEN_KEY)?;
        let issued_at = self.issued_at()?;
        Some(CredentialPair {
            access_token,
            refresh_token,
            issued_at,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.get(TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get(REFRESH_TOKEN_KEY)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.get(TIMESTAMP_KEY)?;
        let millis: i64 = match raw.trim().parse() {
            Ok(millis) => millis,
            Err(_) => {
                warn!(value = %raw, "Ignoring unparseable token timestamp");
                return None;
            }
        };
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Remove the credential pair. The identity marker is kept.
    pub fn clear(&self) {
        let Some(medium) = self.medium.as_ref() else {
            return;
        };
        for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, TIMESTAMP_KEY] {
            if let Err(e) = medium.remove(key) {
                warn!(key, error = %e, "Failed to remove credential slot");
            }
        }
        debug!("Credential pair cleared");
    }

    /// All slots present and the pair is younger than the TTL.
    pub fn is_valid(&self) -> bool {
        self.read()
            .map(|pair| pair.is_valid_at(self.clock.now(), self.ttl))
            .unwrap_or(false)
    }

    /// True if the stored issuance time is at least one TTL old.
    pub fn is_expired(&self) -> bool {
        self.issued_at()
            .map(|issued_at| self.clock.now() - issued_at >= self.ttl)
            .unwrap_or(false)
    }

    /// Any credential slot populated, valid or not.
    pub fn has_any(&self) -> bool {
        [TOKEN_KEY, REFRESH_TOKEN_KEY, TIMESTAMP_KEY]
            .iter()
            .any(|key| self.get(key).is_some())
    }

    pub fn identity_marker(&self) -> Option<String> {
        self.get(LAST_USER_KEY).filter(|v| !v.is_empty())
    }

    pub fn set_identity_marker(&self, user_key: &str) {
        if let Some(medium) = self.medium.as_ref() {
            if let Err(e) = medium.set(LAST_USER_KEY, user_key) {
                warn!(error = %e, "Failed to persist identity marker");
            }
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        let medium = self.medium.as_ref()?;
        match medium.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Credential storage unavailable");
                None
            }
        }
    }
}
