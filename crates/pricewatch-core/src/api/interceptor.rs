//! Outbound request wrapper.
//!
//! Attaches the stored access token to each request and turns a 401 answer
//! into an [`AuthEvent`] on the event bus, so the session controller hears
//! about rejected credentials without the transport knowing about it.

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::auth::{AuthEvent, CredentialStore, EventBus};

use super::ApiError;

/// Clone is cheap - the store and bus are shared handles.
#[derive(Clone)]
pub struct TransportInterceptor {
    store: CredentialStore,
    bus: EventBus,
}

impl TransportInterceptor {
    pub fn new(store: CredentialStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Attach `Authorization: Bearer <access>` when a token is stored.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.access_token() {
            Some(token) => request.bearer_auth(token),
            None => {
                debug!("No access token stored, sending request unauthenticated");
                request
            }
        }
    }

    /// Authorize, send and classify. Non-success statuses become errors.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorize(request).send().await?;
        self.check(response).await
    }

    /// Classify a response, publishing an auth event for 401.
    pub async fn check(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().path().to_string();
        self.observe(status, &url);
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    /// Publish [`AuthEvent::Unauthorized`] when `status` is 401.
    pub fn observe(&self, status: StatusCode, url: &str) -> bool {
        if status != StatusCode::UNAUTHORIZED {
            return false;
        }
        warn!(url, "Request rejected with 401, notifying session");
        self.bus.publish(AuthEvent::Unauthorized {
            url: url.to_string(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use reqwest::header::AUTHORIZATION;

    use super::*;
    use crate::auth::storage::{MemoryMedium, PersistenceMedium};

    fn interceptor() -> (TransportInterceptor, CredentialStore, EventBus) {
        let medium: Arc<dyn PersistenceMedium> = Arc::new(MemoryMedium::new());
        let store = CredentialStore::new(medium, Duration::days(7));
        let bus = EventBus::new();
        (TransportInterceptor::new(store.clone(), bus.clone()), store, bus)
    }

    #[test]
    fn test_authorize_attaches_bearer() {
        let (interceptor, store, _) = interceptor();
        store.save("access-1", "refresh-1");

        let client = reqwest::Client::new();
        let request = interceptor
            .authorize(client.get("http://localhost/api/v1/user-products/"))
            .build()
            .expect("request should build");

        assert_eq!(
            request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer access-1")
        );
    }

    #[test]
    fn test_authorize_without_token() {
        let (interceptor, _, _) = interceptor();
        let client = reqwest::Client::new();
        let request = interceptor
            .authorize(client.get("http://localhost/api/v1/user-products/"))
            .build()
            .expect("request should build");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_observe_401_publishes_event() {
        let (interceptor, _, bus) = interceptor();
        let mut rx = bus.subscribe();

        assert!(!interceptor.observe(StatusCode::FORBIDDEN, "/api/v1/notifications/"));
        assert!(interceptor.observe(StatusCode::UNAUTHORIZED, "/api/v1/notifications/"));

        let event = rx.recv().await.expect("event should be published");
        assert_eq!(
            event,
            AuthEvent::Unauthorized {
                url: "/api/v1/notifications/".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_classifies_401() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/user-products/")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"detail": "Given token not valid"}"#)
            .create_async()
            .await;

        let (interceptor, store, bus) = interceptor();
        store.save("stale", "refresh");
        let mut rx = bus.subscribe();

        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/user-products/", server.url());
        let result = interceptor.send(client.get(&url)).await;

        assert_eq!(result.err(), Some(ApiError::Unauthorized));
        assert!(matches!(rx.try_recv(), Ok(AuthEvent::Unauthorized { .. })));
        mock.assert_async().await;
    }
}
