//! Asynchronous client for the wabot backend HTTP API.
//!
//! Stateless request/response wrapper: every call resolves or fails
//! within the configured request timeout, and transport failures are
//! reported as a distinct error kind so the engine can treat them as
//! retryable.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use wab_core::{Instance, InstanceList, PairingCodeInfo};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicit backend endpoint configuration. The base URL is deployment
/// configuration handed in by the caller, never inferred from ambient
/// runtime context.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend rejected request ({status}): {detail}")]
    Backend { status: u16, detail: String },
}

impl ApiError {
    /// Transport failures leave prior state intact and are retried at
    /// the next scheduled tick; the other kinds are terminal for the
    /// request that caused them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

/// Operations the control surface needs from the backend. Implemented
/// by [`ApiClient`] over HTTP; tests substitute in-memory doubles.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>, ApiError>;

    async fn get_instance(&self, id: &str) -> Result<Instance, ApiError>;

    /// `phone_digits` must already be normalized via
    /// [`wab_core::normalize_phone_number`].
    async fn create_instance(&self, name: &str, phone_digits: &str)
        -> Result<Instance, ApiError>;

    async fn start_instance(&self, id: &str) -> Result<(), ApiError>;

    async fn stop_instance(&self, id: &str) -> Result<(), ApiError>;

    async fn delete_instance(&self, id: &str) -> Result<(), ApiError>;

    async fn pairing_code(&self, id: &str) -> Result<PairingCodeInfo, ApiError>;

    async fn regenerate_code(&self, id: &str) -> Result<PairingCodeInfo, ApiError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.http.get(self.url(path)).send().await?;
        decode(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.http.post(self.url(path)).send().await?;
        decode(response).await
    }

    async fn post_ack(&self, path: &str) -> Result<(), ApiError> {
        let response = self.http.post(self.url(path)).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    name: &'a str,
    phone_number: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.detail)
        .unwrap_or(body);
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(detail));
    }
    Err(ApiError::Backend {
        status: status.as_u16(),
        detail,
    })
}

#[async_trait]
impl ControlApi for ApiClient {
    async fn list_instances(&self) -> Result<Vec<Instance>, ApiError> {
        let list: InstanceList = self.get_json("/api/instances").await?;
        Ok(list.instances)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ApiError> {
        self.get_json(&format!("/api/instances/{id}")).await
    }

    async fn create_instance(
        &self,
        name: &str,
        phone_digits: &str,
    ) -> Result<Instance, ApiError> {
        let response = self
            .http
            .post(self.url("/api/instances"))
            .json(&CreateInstanceRequest {
                name,
                phone_number: phone_digits,
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn start_instance(&self, id: &str) -> Result<(), ApiError> {
        self.post_ack(&format!("/api/instances/{id}/start")).await
    }

    async fn stop_instance(&self, id: &str) -> Result<(), ApiError> {
        self.post_ack(&format!("/api/instances/{id}/stop")).await
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/instances/{id}")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn pairing_code(&self, id: &str) -> Result<PairingCodeInfo, ApiError> {
        self.get_json(&format!("/api/instances/{id}/pairing-code"))
            .await
    }

    async fn regenerate_code(&self, id: &str) -> Result<PairingCodeInfo, ApiError> {
        self.post_json(&format!("/api/instances/{id}/regenerate-code"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slash() {
        let config = ClientConfig::new("http://10.0.0.5:8000/");
        assert_eq!(config.base_url, "http://10.0.0.5:8000");
    }

    #[test]
    fn error_body_detail_is_optional() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail":"Instance not found"}"#)
            .expect("deserialize");
        assert_eq!(body.detail.as_deref(), Some("Instance not found"));

        let body: ErrorBody = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(body.detail, None);
    }
}
