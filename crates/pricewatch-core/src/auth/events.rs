//! Broadcast channels between the transport, the controller and the UI.

use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of each broadcast channel. Slow receivers skip ahead when lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Signal published by the transport interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A request was answered with 401.
    Unauthorized { url: String },
}

/// Process-wide channel for [`AuthEvent`]s. Clone is cheap.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: AuthEvent) {
        // No subscribers is fine: nothing is listening yet
        if self.tx.send(event).is_err() {
            debug!("Auth event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Session lifecycle notifications for collaborating subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    LoggedIn { user_id: Option<String> },
    Refreshed,
    /// A different account authenticated in this process; per-user caches
    /// (product list, notification counters) must be discarded.
    IdentitySwitched { previous: String, current: String },
    /// Session torn down. `session_expired` is false only for an explicit,
    /// user-initiated logout.
    LoggedOut { session_expired: bool },
}

impl SessionSignal {
    /// Notice to show after a logout, if any.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            SessionSignal::LoggedOut {
                session_expired: true,
            } => Some("Your session has expired. Please sign in again."),
            SessionSignal::LoggedOut {
                session_expired: false,
            } => Some("You have been signed out."),
            _ => None,
        }
    }
}

pub(crate) fn signal_channel() -> broadcast::Sender<SessionSignal> {
    broadcast::channel(CHANNEL_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();

        bus.publish(AuthEvent::Unauthorized {
            url: "/api/v1/user-products/".to_string(),
        });

        assert!(matches!(a.recv().await, Ok(AuthEvent::Unauthorized { .. })));
        assert!(matches!(b.recv().await, Ok(AuthEvent::Unauthorized { .. })));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(AuthEvent::Unauthorized { url: String::new() });
    }

    #[test]
    fn test_logout_notices() {
        let forced = SessionSignal::LoggedOut { session_expired: true };
        let explicit = SessionSignal::LoggedOut { session_expired: false };
        assert!(forced.notice().unwrap().contains("sign in again"));
        assert_ne!(forced.notice(), explicit.notice());
        assert_eq!(SessionSignal::Refreshed.notice(), None);
    }
}
