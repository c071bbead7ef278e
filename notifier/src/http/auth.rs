//! Login API client

use async_trait::async_trait;
use openapi_client::models::{LoginRequest, LoginResponse};

use crate::errors::UpdateError;
use crate::http::client::HttpClient;

pub const LOGIN_PATH: &str = "/auth/v1/login";

/// Login endpoint
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, UpdateError>;
}

#[async_trait]
impl AuthApi for HttpClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, UpdateError> {
        self.post(LOGIN_PATH, request).await
    }
}
