//! Connection manager: owns the relay, poller and dispatcher workers

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::VersionDescriptor;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::app::options::ManagerOptions;
use crate::channel::{ChannelConnector, ConnectionStatus};
use crate::errors::UpdateError;
use crate::http::updates::UpdateApi;
use crate::storage::kv::KeyValueStore;
use crate::update::chime::Chime;
use crate::update::reloader::Reloader;
use crate::update::store::{CheckSequence, UpdateSnapshot, UpdateStore};
use crate::workers::dispatcher::{self, Command};
use crate::workers::{poller, relay};

const COMMAND_BUFFER: usize = 64;

/// Injected capabilities
#[derive(Clone)]
pub struct Capabilities {
    pub api: Arc<dyn UpdateApi>,
    pub connector: Arc<dyn ChannelConnector>,
    pub kv: Arc<dyn KeyValueStore>,
    pub reloader: Arc<dyn Reloader>,
    pub chime: Arc<dyn Chime>,
}

struct Pending {
    store: UpdateStore,
    commands_rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<UpdateSnapshot>,
    status_tx: watch::Sender<ConnectionStatus>,
}

enum Lifecycle {
    Ready(Box<Pending>),
    Running(ShutdownManager),
    Stopped,
}

/// Entry point of the update notification flow
pub struct ConnectionManager {
    options: ManagerOptions,
    caps: Capabilities,
    checks: Arc<CheckSequence>,
    commands_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<UpdateSnapshot>,
    status_rx: watch::Receiver<ConnectionStatus>,
    lifecycle: Mutex<Lifecycle>,
}

impl ConnectionManager {
    /// Load the persisted baseline and prepare the workers without starting them
    pub async fn new(options: ManagerOptions, caps: Capabilities) -> Result<Self, UpdateError> {
        let store = UpdateStore::load(caps.kv.clone()).await?;

        let mut initial = store.snapshot();
        initial.auto_update = options.dispatcher.auto_update;
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        Ok(Self {
            options,
            caps,
            checks: Arc::new(CheckSequence::new()),
            commands_tx,
            snapshot_rx,
            status_rx,
            lifecycle: Mutex::new(Lifecycle::Ready(Box::new(Pending {
                store,
                commands_rx,
                snapshot_tx,
                status_tx,
            }))),
        })
    }

    /// Start the workers. No-op when already running or torn down.
    pub async fn connect(&self) -> Result<(), UpdateError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let pending = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(pending) => pending,
            other => {
                debug!("Connection manager already started");
                *lifecycle = other;
                return Ok(());
            }
        };
        let Pending {
            store,
            commands_rx,
            snapshot_tx,
            status_tx,
        } = *pending;

        info!("Starting connection manager...");
        let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
        let mut shutdown_manager =
            ShutdownManager::new(shutdown_tx.clone(), self.options.max_shutdown_delay);

        // Dispatcher first so nothing the other workers send is lost
        let options = self.options.dispatcher.clone();
        let chime = self.caps.chime.clone();
        let reloader = self.caps.reloader.clone();
        let commands_tx = self.commands_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher::run(
                &options,
                store,
                chime,
                reloader,
                commands_tx,
                commands_rx,
                snapshot_tx,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
        });
        shutdown_manager.with_dispatcher_handle(dispatcher_handle)?;

        let options = self.options.relay.clone();
        let api = self.caps.api.clone();
        let connector = self.caps.connector.clone();
        let outputs = relay::Outputs {
            checks: self.checks.clone(),
            commands: self.commands_tx.clone(),
            status: status_tx,
        };
        let mut shutdown_rx = shutdown_tx.subscribe();
        let relay_handle = tokio::spawn(async move {
            relay::run(
                &options,
                api,
                connector,
                outputs,
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
        });
        shutdown_manager.with_relay_handle(relay_handle)?;

        let options = self.options.poller.clone();
        let api = self.caps.api.clone();
        let checks = self.checks.clone();
        let commands_tx = self.commands_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let poller_handle = tokio::spawn(async move {
            poller::run(
                &options,
                api,
                checks,
                commands_tx,
                tokio::time::sleep,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
        });
        shutdown_manager.with_poller_handle(poller_handle)?;

        *lifecycle = Lifecycle::Running(shutdown_manager);
        Ok(())
    }

    /// Stop every worker and close the channel. Idempotent.
    pub async fn teardown(&self) -> Result<(), UpdateError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(mut shutdown_manager) => shutdown_manager.shutdown().await,
            Lifecycle::Ready(_) => {
                debug!("Connection manager torn down before it was started");
                Ok(())
            }
            Lifecycle::Stopped => Ok(()),
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    /// Poll the latest version once, outside the regular schedule
    pub async fn check_for_updates(&self) -> Option<VersionDescriptor> {
        if matches!(*self.lifecycle.lock().await, Lifecycle::Stopped) {
            debug!("Ignoring update check after teardown");
            return None;
        }
        poller::poll_once(self.caps.api.as_ref(), &self.checks, &self.commands_tx).await
    }

    /// Snooze the pending update
    pub async fn dismiss(&self) {
        self.send(Command::Dismiss).await;
    }

    /// Accept the pending update: persist it as the baseline and reload
    pub async fn accept(&self) {
        self.send(Command::Accept).await;
    }

    pub async fn set_auto_update(&self, enabled: bool) {
        self.send(Command::SetAutoUpdate(enabled)).await;
    }

    async fn send(&self, command: Command) {
        if self.commands_tx.send(command).await.is_err() {
            debug!("Connection manager stopped, command dropped");
        }
    }

    pub fn snapshot(&self) -> UpdateSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    poller_handle: Option<JoinHandle<()>>,
    relay_handle: Option<JoinHandle<()>>,
    dispatcher_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            poller_handle: None,
            relay_handle: None,
            dispatcher_handle: None,
        }
    }

    fn with_poller_handle(&mut self, handle: JoinHandle<()>) -> Result<(), UpdateError> {
        if self.poller_handle.is_some() {
            return Err(UpdateError::ShutdownError("poller_handle already set".to_string()));
        }
        self.poller_handle = Some(handle);
        Ok(())
    }

    fn with_relay_handle(&mut self, handle: JoinHandle<()>) -> Result<(), UpdateError> {
        if self.relay_handle.is_some() {
            return Err(UpdateError::ShutdownError("relay_handle already set".to_string()));
        }
        self.relay_handle = Some(handle);
        Ok(())
    }

    fn with_dispatcher_handle(&mut self, handle: JoinHandle<()>) -> Result<(), UpdateError> {
        if self.dispatcher_handle.is_some() {
            return Err(UpdateError::ShutdownError("dispatcher_handle already set".to_string()));
        }
        self.dispatcher_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), UpdateError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, aborting workers...",
                    self.max_shutdown_delay
                );
                for handle in [
                    self.poller_handle.take(),
                    self.relay_handle.take(),
                    self.dispatcher_handle.take(),
                ]
                .into_iter()
                .flatten()
                {
                    handle.abort();
                }
                Err(UpdateError::ShutdownError("shutdown timed out".to_string()))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), UpdateError> {
        info!("Shutting down connection manager...");

        // 1. Poller worker
        if let Some(handle) = self.poller_handle.as_mut() {
            handle.await.map_err(|e| UpdateError::ShutdownError(e.to_string()))?;
            self.poller_handle = None;
        }

        // 2. Relay worker, closes the push channel
        if let Some(handle) = self.relay_handle.as_mut() {
            handle.await.map_err(|e| UpdateError::ShutdownError(e.to_string()))?;
            self.relay_handle = None;
        }

        // 3. Dispatcher, cancels the countdown
        if let Some(handle) = self.dispatcher_handle.as_mut() {
            handle.await.map_err(|e| UpdateError::ShutdownError(e.to_string()))?;
            self.dispatcher_handle = None;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
