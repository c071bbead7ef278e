//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Environment variable overriding the backend API base URL
pub const API_URL_ENV: &str = "UPNOTIFIER_API_URL";

/// Environment variable overriding the push channel base URL
pub const SOCKETIO_URL_ENV: &str = "UPNOTIFIER_SOCKETIO_URL";

/// Notifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Backend endpoints
    #[serde(default)]
    pub server: ServerSettings,

    /// Delay between health probes while the server is down, in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Interval of the latest-version poll loop, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Connect and request timeout, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Push channel reconnection
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Length of the auto-update countdown, in seconds
    #[serde(default = "default_countdown")]
    pub countdown_secs: u64,

    /// Accept updates automatically once the countdown elapses
    #[serde(default)]
    pub auto_update: bool,

    /// Ring the terminal bell on new versions
    #[serde(default = "default_true")]
    pub chime: bool,

    /// Command executed to reload the application after an update is accepted
    #[serde(default)]
    pub reload_command: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    5
}

fn default_countdown() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            server: ServerSettings::default(),
            probe_interval_secs: default_probe_interval(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            reconnect: ReconnectSettings::default(),
            countdown_secs: default_countdown(),
            auto_update: false,
            chime: true,
            reload_command: None,
        }
    }
}

impl Settings {
    /// Apply endpoint overrides from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.is_empty() {
                self.server.api_url = url;
            }
        }
        if let Ok(url) = std::env::var(SOCKETIO_URL_ENV) {
            if !url.is_empty() {
                self.server.socket_url = url;
            }
        }
        self
    }
}

/// Backend endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the REST API (health, latest-version, login)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the Socket.IO server
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
}

fn default_api_url() -> String {
    "http://localhost:3010/api".to_string()
}

fn default_socket_url() -> String {
    "http://localhost:3010".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
        }
    }
}

/// Push channel reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Consecutive failed attempts before giving up, unbounded when absent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// First reconnect delay, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound of the reconnect delay, in milliseconds. Equal to
    /// `delay_ms` for a fixed delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.poll_interval_secs, 10);
        assert_eq!(settings.probe_interval_secs, 5);
        assert_eq!(settings.countdown_secs, 10);
        assert_eq!(settings.reconnect.max_attempts, Some(5));
        assert_eq!(settings.server.api_url, "http://localhost:3010/api");
        assert!(settings.chime);
        assert!(!settings.auto_update);
    }

    #[test]
    fn test_unbounded_reconnect() {
        let settings: Settings =
            serde_json::from_str(r#"{ "reconnect": { "max_attempts": null, "max_delay_ms": 30000 } }"#)
                .unwrap();
        assert_eq!(settings.reconnect.max_attempts, None);
        assert_eq!(settings.reconnect.delay_ms, 1000);
        assert_eq!(settings.reconnect.max_delay_ms, 30000);
    }
}
