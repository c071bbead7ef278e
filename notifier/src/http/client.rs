//! HTTP client implementation

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::UpdateError;

/// HTTP client for backend communication
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpdateError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpdateError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdateError::Connectivity(format!("GET {}: {}", url, e)))?;

        let response = check_status("GET", response).await?;
        decode(response).await
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UpdateError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| UpdateError::Connectivity(format!("POST {}: {}", url, e)))?;

        let response = check_status("POST", response).await?;
        decode(response).await
    }
}

async fn check_status(method: &str, response: Response) -> Result<Response, UpdateError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} failed: {} - {}", method, status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(UpdateError::AuthError(error_message(status, &body)))
        }
        _ => Err(UpdateError::Connectivity(format!("{}: {}", status, body))),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UpdateError> {
    let text = response
        .text()
        .await
        .map_err(|e| UpdateError::Connectivity(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| UpdateError::MalformedResponse(e.to_string()))
}

/// Prefer the backend's own message, fall back to the status line
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<openapi_client::models::ErrorResponse>(body)
        .ok()
        .and_then(|e| e.message.or(e.error))
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_backend_message() {
        let msg = error_message(
            StatusCode::UNAUTHORIZED,
            r#"{ "error": "Unauthorized", "message": "Credenciales inválidas" }"#,
        );
        assert_eq!(msg, "Credenciales inválidas");

        let msg = error_message(StatusCode::UNAUTHORIZED, "<html>");
        assert_eq!(msg, "401 Unauthorized");
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = HttpClient::new("http://localhost:3010/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3010/api");
    }
}
