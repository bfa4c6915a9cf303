//! HTTP implementation of the [`RequestExecutor`].
//!
//! Talks to the pricewatch REST API. Unauthenticated endpoints (login,
//! register, refresh, password reset) are sent directly; endpoints that need
//! the current session go through the [`TransportInterceptor`].

use async_trait::async_trait;
use reqwest::{header, Client, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::models::{
    AuthPayload, LoginRequest, PasswordResetConfirm, RefreshPayload, RegisterRequest, User,
};

use super::{ApiError, RequestExecutor, TransportInterceptor};

const LOGIN_PATH: &str = "auth/login/";
const REGISTER_PATH: &str = "auth/register/";
const REFRESH_PATH: &str = "auth/refresh/";
const LOGOUT_PATH: &str = "auth/logout/";
const CURRENT_USER_PATH: &str = "auth/me/";
const PASSWORD_RESET_REQUEST_PATH: &str = "auth/password-reset/request/";
const PASSWORD_RESET_CONFIRM_PATH: &str = "auth/password-reset/confirm";

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct PasswordResetRequest<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct DetailResponse {
    #[serde(default, alias = "success")]
    detail: Option<String>,
}

/// API client for pricewatch.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    config: SessionConfig,
    interceptor: TransportInterceptor,
}

impl HttpExecutor {
    pub fn new(config: SessionConfig, interceptor: TransportInterceptor) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            interceptor,
        })
    }

    /// Interceptor for collaborators issuing their own authenticated requests.
    pub fn interceptor(&self) -> &TransportInterceptor {
        &self.interceptor
    }

    fn url(&self, path: &str) -> String {
        self.config.endpoint(path)
    }

    /// Check if response is successful, returning a classified error if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    async fn post_public<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        self.post_public_url(&url, path, body).await
    }

    async fn post_public_url<T, B>(&self, url: &str, what: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse(response, what).await
    }

    /// Confirm endpoint with the token as one escaped path segment.
    fn reset_confirm_url(&self, token: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.url(PASSWORD_RESET_CONFIRM_PATH))
            .map_err(|e| ApiError::Network(format!("Invalid API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Network("API URL cannot take a path".to_string()))?
            .pop_if_empty()
            .push(token)
            .push("");
        Ok(url)
    }

    fn detail_or(detail: DetailResponse, fallback: &str) -> String {
        detail
            .detail
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ApiError> {
        self.post_public(LOGIN_PATH, request).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ApiError> {
        self.post_public(REGISTER_PATH, request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshPayload, ApiError> {
        self.post_public(REFRESH_PATH, &RefreshRequest {
            refresh: refresh_token,
        })
        .await
    }

    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError> {
        let url = self.url(LOGOUT_PATH);
        let body = serde_json::json!({ "refresh": refresh_token });
        self.interceptor
            .send(self.client.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn fetch_current_identity(&self) -> Result<Option<User>, ApiError> {
        let url = self.url(CURRENT_USER_PATH);
        let response = self
            .interceptor
            .send(self.client.get(&url).header(header::ACCEPT, "application/json"))
            .await?;
        let text = response.text().await?;
        if text.trim().is_empty() || text.trim() == "null" {
            return Ok(None);
        }
        let user: User = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse user: {}", e)))?;
        Ok((!user.is_empty()).then_some(user))
    }

    async fn request_password_reset(&self, email: &str) -> Result<String, ApiError> {
        let detail: DetailResponse = self
            .post_public(PASSWORD_RESET_REQUEST_PATH, &PasswordResetRequest { email })
            .await?;
        Ok(Self::detail_or(
            detail,
            "If the address is registered, a reset link has been sent.",
        ))
    }

    async fn confirm_password_reset(
        &self,
        request: &PasswordResetConfirm,
    ) -> Result<String, ApiError> {
        let url = self.reset_confirm_url(&request.token)?;
        let detail: DetailResponse = self
            .post_public_url(url.as_str(), PASSWORD_RESET_CONFIRM_PATH, request)
            .await?;
        Ok(Self::detail_or(detail, "Your password has been reset."))
    }
}
