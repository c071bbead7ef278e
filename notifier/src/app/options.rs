//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;
use crate::workers::relay::ReconnectPolicy;
use crate::workers::{dispatcher, poller, relay};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Backend REST API base URL
    pub api_url: String,

    /// Socket.IO server base URL
    pub socket_url: String,

    /// Connect and request timeout
    pub request_timeout: Duration,

    /// Ring the terminal bell on new versions
    pub chime: bool,

    /// Command run after an update is accepted
    pub reload_command: Option<Vec<String>>,

    /// Connection manager configuration
    pub manager: ManagerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl AppOptions {
    /// Build the runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let reconnect = &settings.reconnect;
        let delay = Duration::from_millis(reconnect.delay_ms);
        let max_delay = Duration::from_millis(reconnect.max_delay_ms);
        let reconnect_policy = if max_delay <= delay {
            ReconnectPolicy::Fixed {
                delay,
                max_attempts: reconnect.max_attempts,
            }
        } else {
            ReconnectPolicy::Backoff {
                cooldown: CooldownOptions {
                    base_delay: delay,
                    max_delay,
                    ..Default::default()
                },
                max_attempts: reconnect.max_attempts,
            }
        };

        Self {
            layout,
            api_url: settings.server.api_url.clone(),
            socket_url: settings.server.socket_url.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            chime: settings.chime,
            reload_command: settings.reload_command.clone(),
            manager: ManagerOptions {
                relay: relay::Options {
                    probe_interval: Duration::from_secs(settings.probe_interval_secs),
                    reconnect: reconnect_policy,
                },
                poller: poller::Options {
                    interval: Duration::from_secs(settings.poll_interval_secs),
                    ..Default::default()
                },
                dispatcher: dispatcher::Options {
                    countdown: Duration::from_secs(settings.countdown_secs),
                    auto_update: settings.auto_update,
                },
                ..Default::default()
            },
        }
    }
}

/// Connection manager options
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Health probe and push channel
    pub relay: relay::Options,

    /// Latest-version poll loop
    pub poller: poller::Options,

    /// Store dispatcher and auto-update countdown
    pub dispatcher: dispatcher::Options,

    /// Maximum delay for graceful teardown
    pub max_shutdown_delay: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            relay: relay::Options::default(),
            poller: poller::Options::default(),
            dispatcher: dispatcher::Options::default(),
            max_shutdown_delay: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_settings() {
        let options = AppOptions::from_settings(&Settings::default(), StorageLayout::new("/tmp/x"));
        assert_eq!(options.manager.relay.probe_interval, Duration::from_secs(5));
        assert_eq!(options.manager.poller.interval, Duration::from_secs(10));
        assert_eq!(options.manager.poller.initial_delay, Duration::ZERO);
        assert_eq!(options.manager.dispatcher.countdown, Duration::from_secs(10));
        assert_eq!(options.manager.relay.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_equal_delays_give_fixed_policy() {
        let mut settings = Settings::default();
        settings.reconnect.delay_ms = 2000;
        settings.reconnect.max_delay_ms = 2000;
        settings.reconnect.max_attempts = None;

        let options = AppOptions::from_settings(&settings, StorageLayout::new("/tmp/x"));
        assert_eq!(
            options.manager.relay.reconnect,
            ReconnectPolicy::Fixed {
                delay: Duration::from_secs(2),
                max_attempts: None,
            }
        );
    }
}
