//! Reload capability invoked once an update is accepted

use async_trait::async_trait;
use openapi_client::models::VersionDescriptor;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::UpdateError;

/// Environment variable carrying the accepted version to the reload command
pub const RELOAD_VERSION_ENV: &str = "UPNOTIFIER_VERSION";

/// Reloads the presentation layer after the baseline has been persisted
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self, version: &VersionDescriptor) -> Result<(), UpdateError>;
}

/// Reloader that only records the request in the log
#[derive(Debug, Default)]
pub struct LogReloader;

#[async_trait]
impl Reloader for LogReloader {
    async fn reload(&self, version: &VersionDescriptor) -> Result<(), UpdateError> {
        info!("Reload requested for version {}", version.version);
        Ok(())
    }
}

/// Reloader running an external command, e.g. a service restart
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv-style list, `None` when the list is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    async fn reload(&self, version: &VersionDescriptor) -> Result<(), UpdateError> {
        info!("Reloading with `{} {}`", self.program, self.args.join(" "));

        let status = Command::new(&self.program)
            .args(&self.args)
            .env(RELOAD_VERSION_ENV, &version.version)
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            warn!("Reload command exited with {}", status);
            return Err(UpdateError::Internal(format!(
                "reload command exited with {}",
                status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv() {
        assert!(CommandReloader::from_argv(&[]).is_none());

        let reloader =
            CommandReloader::from_argv(&["systemctl".into(), "restart".into(), "kiosk".into()]).unwrap();
        assert_eq!(reloader.program, "systemctl");
        assert_eq!(reloader.args, vec!["restart".to_string(), "kiosk".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reloader_reports_failure() {
        let ok = CommandReloader::new("true", vec![]);
        assert!(ok.reload(&VersionDescriptor::new("1")).await.is_ok());

        let failing = CommandReloader::new("false", vec![]);
        assert!(failing.reload(&VersionDescriptor::new("1")).await.is_err());
    }
}
