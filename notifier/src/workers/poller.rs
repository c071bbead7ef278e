//! Polling worker for the latest deployed version

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::VersionDescriptor;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::http::updates::UpdateApi;
use crate::update::store::CheckSequence;
use crate::workers::dispatcher::Command;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
        }
    }
}

/// Run the poller worker
pub async fn run<S, F>(
    options: &Options,
    api: Arc<dyn UpdateApi>,
    checks: Arc<CheckSequence>,
    commands: mpsc::Sender<Command>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Poller worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = poll_once(api.as_ref(), &checks, &commands) => {}
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Query the latest version once and hand it to the dispatcher under a fresh
/// check id. Failures are logged and yield `None`.
pub async fn poll_once(
    api: &dyn UpdateApi,
    checks: &CheckSequence,
    commands: &mpsc::Sender<Command>,
) -> Option<VersionDescriptor> {
    debug!("Polling for the latest version...");

    let descriptor = match api.latest_version().await {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            debug!("Server has not announced a version yet");
            return None;
        }
        Err(e) => {
            warn!("Failed to fetch the latest version: {}", e);
            return None;
        }
    };

    let command = Command::Observe {
        descriptor: descriptor.clone(),
        check: checks.next(),
    };
    if commands.send(command).await.is_err() {
        debug!("Dispatcher is gone, dropping poll result");
    }

    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::errors::UpdateError;

    struct FakeApi {
        latest: Mutex<Result<Option<VersionDescriptor>, UpdateError>>,
    }

    #[async_trait]
    impl UpdateApi for FakeApi {
        async fn health(&self) -> Result<bool, UpdateError> {
            Ok(true)
        }

        async fn latest_version(&self) -> Result<Option<VersionDescriptor>, UpdateError> {
            match &*self.latest.lock().unwrap() {
                Ok(latest) => Ok(latest.clone()),
                Err(e) => Err(UpdateError::Connectivity(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_poll_once_forwards_with_fresh_check_ids() {
        let api = FakeApi {
            latest: Mutex::new(Ok(Some(VersionDescriptor::new("2.3.0")))),
        };
        let checks = CheckSequence::new();
        let (tx, mut rx) = mpsc::channel(4);

        let first = poll_once(&api, &checks, &tx).await;
        let second = poll_once(&api, &checks, &tx).await;
        assert_eq!(first, Some(VersionDescriptor::new("2.3.0")));
        assert_eq!(second, first);

        let a = match rx.recv().await {
            Some(Command::Observe { check, .. }) => check,
            other => panic!("unexpected command: {:?}", other),
        };
        let b = match rx.recv().await {
            Some(Command::Observe { check, .. }) => check,
            other => panic!("unexpected command: {:?}", other),
        };
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_poll_once_swallows_errors() {
        let api = FakeApi {
            latest: Mutex::new(Err(UpdateError::Connectivity("down".to_string()))),
        };
        let checks = CheckSequence::new();
        let (tx, mut rx) = mpsc::channel(4);

        assert_eq!(poll_once(&api, &checks, &tx).await, None);
        assert!(rx.try_recv().is_err());

        *api.latest.lock().unwrap() = Ok(None);
        assert_eq!(poll_once(&api, &checks, &tx).await, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_shutdown() {
        let api: Arc<dyn UpdateApi> = Arc::new(FakeApi {
            latest: Mutex::new(Ok(Some(VersionDescriptor::new("7")))),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

        let options = Options {
            interval: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
        };
        let handle = tokio::spawn(async move {
            run(
                &options,
                api,
                Arc::new(CheckSequence::new()),
                tx,
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
        });

        // immediate poll, then one every 10s
        tokio::time::sleep(Duration::from_secs(25)).await;
        let mut polls = 0;
        while rx.try_recv().is_ok() {
            polls += 1;
        }
        assert_eq!(polls, 3);

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }
}
