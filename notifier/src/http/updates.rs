//! Version endpoints of the notification backend

use async_trait::async_trait;
use openapi_client::models::{HealthResponse, LatestVersionResponse, VersionDescriptor};
use tracing::debug;

use crate::errors::UpdateError;
use crate::http::client::HttpClient;

pub const HEALTH_PATH: &str = "/websocket/v1/health";
pub const LATEST_VERSION_PATH: &str = "/websocket/v1/latest-version";

/// Request/response queries against the notification backend
#[async_trait]
pub trait UpdateApi: Send + Sync {
    /// Liveness probe, true when the server reports `status == "ok"`
    async fn health(&self) -> Result<bool, UpdateError>;

    /// Latest deployed version, `None` when the server has not announced one yet
    async fn latest_version(&self) -> Result<Option<VersionDescriptor>, UpdateError>;
}

#[async_trait]
impl UpdateApi for HttpClient {
    async fn health(&self) -> Result<bool, UpdateError> {
        let response: HealthResponse = self.get(HEALTH_PATH).await?;
        debug!("Health check: {:?}", response);
        Ok(response.is_ok())
    }

    async fn latest_version(&self) -> Result<Option<VersionDescriptor>, UpdateError> {
        let response: LatestVersionResponse = self.get(LATEST_VERSION_PATH).await?;
        Ok(response.latest_version)
    }
}
