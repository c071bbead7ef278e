//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use colored::Colorize;
use openapi_client::models::VersionDescriptor;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::manager::{Capabilities, ConnectionManager};
use crate::app::options::AppOptions;
use crate::authn::session::{LoginOutcome, SessionManager};
use crate::channel::socketio::SocketIoConnector;
use crate::channel::ConnectionStatus;
use crate::errors::UpdateError;
use crate::http::client::HttpClient;
use crate::http::updates::UpdateApi;
use crate::storage::kv::{current_version, FileKeyValueStore, KeyValueStore};
use crate::update::chime::{Chime, Silent, TerminalBell};
use crate::update::reloader::{CommandReloader, LogReloader, Reloader};
use crate::update::store::UpdateSnapshot;

/// Run the notifier until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), UpdateError> {
    info!("Initializing upnotifier...");

    let kv: Arc<dyn KeyValueStore> =
        Arc::new(FileKeyValueStore::new(options.layout.storage_file()));
    let http_client = Arc::new(HttpClient::new(&options.api_url, options.request_timeout)?);
    report_session(&SessionManager::new(http_client.clone(), kv.clone())).await;

    let caps = build_capabilities(&options, http_client, kv)?;
    let manager = ConnectionManager::new(options.manager.clone(), caps).await?;

    let mut status_rx = manager.subscribe_status();
    let mut snapshot_rx = manager.subscribe();
    report_snapshot(&snapshot_rx.borrow_and_update());

    if let Err(e) = manager.connect().await {
        error!("Failed to start the connection manager: {}", e);
        manager.teardown().await?;
        return Err(e);
    }

    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                report_status(*status_rx.borrow_and_update());
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                report_snapshot(&snapshot_rx.borrow_and_update());
            }
        }
    }

    manager.teardown().await
}

fn build_capabilities(
    options: &AppOptions,
    http_client: Arc<HttpClient>,
    kv: Arc<dyn KeyValueStore>,
) -> Result<Capabilities, UpdateError> {
    let connector = Arc::new(SocketIoConnector::new(
        &options.socket_url,
        options.request_timeout,
    )?);

    let reloader: Arc<dyn Reloader> = match options
        .reload_command
        .as_deref()
        .and_then(CommandReloader::from_argv)
    {
        Some(reloader) => Arc::new(reloader),
        None => Arc::new(LogReloader),
    };
    let chime: Arc<dyn Chime> = if options.chime {
        Arc::new(TerminalBell)
    } else {
        Arc::new(Silent)
    };

    Ok(Capabilities {
        api: http_client,
        connector,
        kv,
        reloader,
        chime,
    })
}

async fn report_session(sessions: &SessionManager) {
    let user = match sessions.restore().await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("No saved session");
            return;
        }
        Err(e) => {
            warn!("Failed to restore the saved session: {}", e);
            return;
        }
    };

    info!("Session restored for {}", user.usuario);
    if let Ok(Some(token)) = sessions.token().await {
        if token.is_expired() {
            warn!("Access token of {} has expired, log in again", user.usuario);
        } else if let Some(expires_at) = token.expires_at() {
            debug!("Access token valid until {}", expires_at);
        }
    }
}

fn report_status(status: ConnectionStatus) {
    let label = match status {
        ConnectionStatus::Connected => status.to_string().green(),
        ConnectionStatus::Connecting => status.to_string().yellow(),
        ConnectionStatus::Disconnected => status.to_string().dimmed(),
        ConnectionStatus::Error => status.to_string().red(),
    };
    println!("{} {}", "connection:".bold(), label);
}

fn report_snapshot(snapshot: &UpdateSnapshot) {
    match &snapshot.pending {
        Some(pending) => {
            let mut line = format!(
                "{} {} -> {}",
                "update available:".bold(),
                snapshot.current_version,
                pending.version.green().bold()
            );
            if let Some(commit) = &pending.commit {
                line.push_str(&format!(" ({})", commit));
            }
            if let Some(remaining) = snapshot.countdown_remaining {
                line.push_str(&format!(", accepting in {}s", remaining).yellow().to_string());
            }
            println!("{}", line);
        }
        None => println!("{} {}", "current version:".bold(), snapshot.current_version),
    }

    if let Some(latest) = snapshot.history_newest_first().next() {
        info!(
            "Deployment history: {} entries, latest {}",
            snapshot.history.len(),
            latest.version
        );
    }
}

// ================================= ONE-SHOT ===================================== //

/// Result of a one-shot update check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub healthy: bool,
    pub current_version: String,
    pub latest_version: Option<VersionDescriptor>,
    pub update_available: bool,
}

/// Probe the server and compare the latest version with the stored baseline
pub async fn check_once(options: &AppOptions) -> Result<CheckReport, UpdateError> {
    let http_client = HttpClient::new(&options.api_url, options.request_timeout)?;
    let kv = FileKeyValueStore::new(options.layout.storage_file());
    let current_version = current_version(&kv).await?;

    let healthy = match http_client.health().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!("Health check failed: {}", e);
            false
        }
    };

    let latest_version = http_client.latest_version().await?;
    let update_available = latest_version
        .as_ref()
        .is_some_and(|latest| latest.version != current_version);

    Ok(CheckReport {
        healthy,
        current_version,
        latest_version,
        update_available,
    })
}

// ================================== SESSION ===================================== //

fn session_manager(options: &AppOptions) -> Result<SessionManager, UpdateError> {
    let http_client = Arc::new(HttpClient::new(&options.api_url, options.request_timeout)?);
    let kv = Arc::new(FileKeyValueStore::new(options.layout.storage_file()));
    Ok(SessionManager::new(http_client, kv))
}

/// Log in and persist the session
pub async fn login(
    options: &AppOptions,
    usuario: &str,
    password: SecretString,
) -> Result<LoginOutcome, UpdateError> {
    let sessions = session_manager(options)?;
    Ok(sessions.login(usuario, password).await)
}

/// Remove the persisted session
pub async fn logout(options: &AppOptions) -> Result<(), UpdateError> {
    let sessions = session_manager(options)?;
    if let Some(user) = sessions.restore().await? {
        info!("Logging out {}", user.usuario);
    }
    sessions.logout().await
}
