//! Push relay worker: health probe, push channel and reconnection

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelConnector, ChannelEvent, ChannelSession, ConnectionStatus};
use crate::http::updates::UpdateApi;
use crate::update::store::CheckSequence;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::workers::dispatcher::Command;

/// Reconnection schedule of the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay between every attempt
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },

    /// Exponentially growing delay, capped by `cooldown.max_delay`
    Backoff {
        cooldown: CooldownOptions,
        max_attempts: Option<u32>,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff {
            cooldown: CooldownOptions::default(),
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry following `attempt` consecutive failures (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed { delay, .. } => *delay,
            ReconnectPolicy::Backoff { cooldown, .. } => calc_exp_backoff(cooldown, attempt),
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            ReconnectPolicy::Fixed { max_attempts, .. }
            | ReconnectPolicy::Backoff { max_attempts, .. } => *max_attempts,
        }
    }

    /// Whether `failures` consecutive failed attempts exhaust the budget
    pub fn is_exhausted(&self, failures: u32) -> bool {
        match self.max_attempts() {
            Some(max) => failures >= max,
            None => false,
        }
    }
}

/// Relay worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between health probes while the server is unhealthy
    pub probe_interval: Duration,

    /// Reconnection schedule
    pub reconnect: ReconnectPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Sinks the relay feeds
pub struct Outputs {
    pub checks: Arc<CheckSequence>,
    pub commands: mpsc::Sender<Command>,
    pub status: watch::Sender<ConnectionStatus>,
}

impl Outputs {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!("Connection status: {} -> {}", current, status);
            *current = status;
            true
        });
    }

    async fn forward(&self, event: ChannelEvent) {
        let command = match event {
            ChannelEvent::AppUpdated(descriptor) => {
                info!("Push notice: version {} deployed", descriptor.version);
                Command::Observe {
                    descriptor,
                    check: self.checks.next(),
                }
            }
            ChannelEvent::DeploymentHistory(history) => {
                debug!("Deployment history received ({} entries)", history.len());
                Command::ReplaceHistory(history)
            }
        };

        if self.commands.send(command).await.is_err() {
            debug!("Dispatcher is gone, dropping push event");
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

/// Run the relay worker. The status reads `disconnected` once it returns.
pub async fn run<S, F>(
    options: &Options,
    api: Arc<dyn UpdateApi>,
    connector: Arc<dyn ChannelConnector>,
    outputs: Outputs,
    sleep_fn: S,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Relay worker starting...");
    relay(
        options,
        api.as_ref(),
        connector.as_ref(),
        &outputs,
        sleep_fn,
        shutdown_signal,
    )
    .await;
    outputs.set_status(ConnectionStatus::Disconnected);
}

async fn relay<S, F>(
    options: &Options,
    api: &dyn UpdateApi,
    connector: &dyn ChannelConnector,
    outputs: &Outputs,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    // Health probe before the first connection attempt
    loop {
        let healthy = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Relay worker shutting down...");
                return;
            }
            result = api.health() => result,
        };

        match healthy {
            Ok(true) => {
                info!("Notification server is healthy");
                break;
            }
            Ok(false) => warn!("Notification server reports unhealthy status"),
            Err(e) => warn!("Health check failed: {}", e),
        }
        outputs.set_status(ConnectionStatus::Error);

        debug!("Retrying health check in {:?}", options.probe_interval);
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Relay worker shutting down...");
                return;
            }
            _ = sleep_fn(options.probe_interval) => {}
        }
    }

    let mut failures: u32 = 0;
    loop {
        outputs.set_status(ConnectionStatus::Connecting);

        let connection = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Relay worker shutting down...");
                return;
            }
            result = connector.connect() => result,
        };

        let delay = match connection {
            Ok(mut session) => {
                failures = 0;
                info!("Connected to the notification server");
                outputs.set_status(ConnectionStatus::Connected);

                match pump(session.as_mut(), outputs, &mut shutdown_signal).await {
                    SessionEnd::Shutdown => {
                        info!("Relay worker shutting down connection...");
                        session.close().await;
                        return;
                    }
                    SessionEnd::Lost => {
                        session.close().await;
                        outputs.set_status(ConnectionStatus::Disconnected);
                        options.reconnect.delay(0)
                    }
                }
            }
            Err(e) => {
                failures += 1;
                outputs.set_status(ConnectionStatus::Error);

                if options.reconnect.is_exhausted(failures) {
                    error!(
                        "Failed to connect to the notification server: {}. Giving up after {} attempts",
                        e, failures
                    );
                    shutdown_signal.await;
                    info!("Relay worker shutting down...");
                    return;
                }

                let delay = options.reconnect.delay(failures - 1);
                warn!(
                    "Failed to connect to the notification server: {}. Retrying in {:?}...",
                    e, delay
                );
                delay
            }
        };

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Relay worker shutting down...");
                return;
            }
            _ = sleep_fn(delay) => {}
        }
    }
}

async fn pump(
    session: &mut dyn ChannelSession,
    outputs: &Outputs,
    shutdown_signal: &mut Pin<Box<dyn Future<Output = ()> + Send>>,
) -> SessionEnd {
    loop {
        let event = tokio::select! {
            _ = &mut *shutdown_signal => return SessionEnd::Shutdown,
            event = session.next_event() => event,
        };

        match event {
            Ok(Some(event)) => outputs.forward(event).await,
            Ok(None) => {
                warn!("Notification server closed the connection");
                return SessionEnd::Lost;
            }
            Err(e) => {
                warn!("Push channel lost: {}", e);
                return SessionEnd::Lost;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(5));
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn test_fixed_policy_unbounded() {
        let policy = ReconnectPolicy::Fixed {
            delay: Duration::from_millis(500),
            max_attempts: None,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(42), Duration::from_millis(500));
        assert!(!policy.is_exhausted(u32::MAX));
    }
}
