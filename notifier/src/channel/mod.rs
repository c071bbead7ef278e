//! Push channel to the notification server

pub mod packet;
pub mod socketio;

use std::fmt;

use async_trait::async_trait;
use openapi_client::models::VersionDescriptor;
use serde::{Deserialize, Serialize};

use crate::errors::UpdateError;

pub const APP_UPDATED_EVENT: &str = "app-updated";
pub const DEPLOYMENT_HISTORY_EVENT: &str = "deployment-history";

/// State of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Inbound push event
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A new version was deployed
    AppUpdated(VersionDescriptor),

    /// Complete deployment history, oldest first
    DeploymentHistory(Vec<VersionDescriptor>),
}

impl ChannelEvent {
    /// Map a named event to a channel event. Unknown names yield `Ok(None)`.
    pub fn from_named(name: &str, args: &[serde_json::Value]) -> Result<Option<Self>, UpdateError> {
        let payload = || {
            args.first().cloned().ok_or_else(|| {
                UpdateError::MalformedResponse(format!("event {} carries no payload", name))
            })
        };

        match name {
            APP_UPDATED_EVENT => {
                let descriptor = serde_json::from_value(payload()?)
                    .map_err(|e| UpdateError::MalformedResponse(format!("{}: {}", name, e)))?;
                Ok(Some(ChannelEvent::AppUpdated(descriptor)))
            }
            DEPLOYMENT_HISTORY_EVENT => {
                let history = serde_json::from_value(payload()?)
                    .map_err(|e| UpdateError::MalformedResponse(format!("{}: {}", name, e)))?;
                Ok(Some(ChannelEvent::DeploymentHistory(history)))
            }
            _ => Ok(None),
        }
    }
}

/// Opens push channel sessions
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a session. Fails on transport or handshake errors.
    async fn connect(&self) -> Result<Box<dyn ChannelSession>, UpdateError>;
}

/// An established push channel
#[async_trait]
pub trait ChannelSession: Send {
    /// Wait for the next event. `Ok(None)` when the server closed the channel,
    /// `Err` when the transport dropped.
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, UpdateError>;

    /// Close the channel. Safe to call on an already closed session.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_app_updated_with_commit() {
        let args = vec![json!({ "version": "Build #8", "project": "web", "commit": "abc1234" })];
        let event = ChannelEvent::from_named(APP_UPDATED_EVENT, &args).unwrap();
        match event {
            Some(ChannelEvent::AppUpdated(d)) => {
                assert_eq!(d.version, "Build #8");
                assert_eq!(d.commit.as_deref(), Some("abc1234"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_deployment_history() {
        let args = vec![json!([{ "version": "1" }, { "version": "2" }])];
        let event = ChannelEvent::from_named(DEPLOYMENT_HISTORY_EVENT, &args).unwrap();
        assert_eq!(
            event,
            Some(ChannelEvent::DeploymentHistory(vec![
                VersionDescriptor::new("1"),
                VersionDescriptor::new("2"),
            ]))
        );
    }

    #[test]
    fn test_unknown_and_malformed_events() {
        assert_eq!(ChannelEvent::from_named("stats", &[json!({})]).unwrap(), None);
        assert!(ChannelEvent::from_named(APP_UPDATED_EVENT, &[]).is_err());
        assert!(ChannelEvent::from_named(APP_UPDATED_EVENT, &[json!({ "project": "x" })]).is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ConnectionStatus::Connected).unwrap(), "\"connected\"");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
