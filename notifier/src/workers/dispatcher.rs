//! Dispatcher worker: the single writer of the update store
//!
//! Push events, poll results, user actions and countdown notices all arrive
//! as [`Command`]s and are applied one at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::VersionDescriptor;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::update::chime::Chime;
use crate::update::countdown::AcceptCountdown;
use crate::update::reloader::Reloader;
use crate::update::store::{CheckId, UpdateSnapshot, UpdateState, UpdateStore};

/// Store commands
#[derive(Debug, Clone)]
pub enum Command {
    /// A version reported by a push event, poll cycle or on-demand check
    Observe {
        descriptor: VersionDescriptor,
        check: CheckId,
    },

    /// Wholesale deployment history replacement
    ReplaceHistory(Vec<VersionDescriptor>),

    /// Snooze the pending update
    Dismiss,

    /// Accept the pending update
    Accept,

    /// Toggle the auto-accept countdown
    SetAutoUpdate(bool),

    CountdownTick { generation: u64, remaining: u64 },

    CountdownElapsed { generation: u64 },
}

/// Dispatcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Length of the auto-accept countdown
    pub countdown: Duration,

    /// Auto-accept initially enabled
    pub auto_update: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(10),
            auto_update: false,
        }
    }
}

struct Dispatcher {
    store: UpdateStore,
    chime: Arc<dyn Chime>,
    reloader: Arc<dyn Reloader>,
    reloads: JoinSet<()>,
    countdown: AcceptCountdown,
    countdown_remaining: Option<u64>,
    auto_update: bool,
    commands_tx: mpsc::Sender<Command>,
    snapshot_tx: watch::Sender<UpdateSnapshot>,
}

/// Run the dispatcher worker
pub async fn run(
    options: &Options,
    store: UpdateStore,
    chime: Arc<dyn Chime>,
    reloader: Arc<dyn Reloader>,
    commands_tx: mpsc::Sender<Command>,
    mut commands_rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<UpdateSnapshot>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Dispatcher worker starting...");

    let mut dispatcher = Dispatcher {
        store,
        chime,
        reloader,
        reloads: JoinSet::new(),
        countdown: AcceptCountdown::new(options.countdown),
        countdown_remaining: None,
        auto_update: options.auto_update,
        commands_tx,
        snapshot_tx,
    };
    dispatcher.publish();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down...");
                break;
            }
            command = commands_rx.recv() => {
                match command {
                    Some(command) => dispatcher.handle(command).await,
                    None => break,
                }
            }
            Some(_) = dispatcher.reloads.join_next(), if !dispatcher.reloads.is_empty() => {}
        }
    }

    dispatcher.countdown.cancel();
    if !dispatcher.reloads.is_empty() {
        info!("Cancelling {} in-flight reload(s)", dispatcher.reloads.len());
    }
    dispatcher.reloads.shutdown().await;
}

impl Dispatcher {
    async fn handle(&mut self, command: Command) {
        debug!("Dispatching {:?}", command);

        match command {
            Command::Observe { descriptor, check } => {
                let transition = self.store.observe(descriptor, check);
                if transition.is_new_detection() {
                    if let Err(e) = self.chime.play() {
                        debug!("Notification sound failed: {}", e);
                    }
                }
            }
            Command::ReplaceHistory(history) => {
                self.store.replace_history(history);
            }
            Command::Dismiss => {
                self.store.dismiss();
            }
            Command::Accept => {
                self.accept().await;
            }
            Command::SetAutoUpdate(enabled) => {
                info!("Auto-update {}", if enabled { "enabled" } else { "disabled" });
                self.auto_update = enabled;
            }
            Command::CountdownTick { generation, remaining } => {
                if self.countdown.is_current(generation) {
                    self.countdown_remaining = Some(remaining);
                }
            }
            Command::CountdownElapsed { generation } => {
                if self.countdown.is_current(generation) {
                    info!("Auto-update countdown elapsed");
                    self.countdown.finish();
                    self.countdown_remaining = None;
                    self.accept().await;
                } else {
                    debug!("Ignoring stale countdown {}", generation);
                }
            }
        }

        self.sync_countdown();
        self.publish();
    }

    /// Persist the baseline, then reload off the command loop so the store
    /// keeps serving commands while the reload runs.
    async fn accept(&mut self) {
        let descriptor = match self.store.accept().await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to accept update: {}", e);
                return;
            }
        };

        info!("Update to {} accepted", descriptor.version);
        let reloader = self.reloader.clone();
        self.reloads.spawn(async move {
            if let Err(e) = reloader.reload(&descriptor).await {
                error!("Reload for {} failed: {}", descriptor.version, e);
            }
        });
    }

    /// Run the countdown exactly while auto-update is on and an update is pending
    fn sync_countdown(&mut self) {
        let wanted = self.auto_update && self.store.state() == UpdateState::UpdateAvailable;

        if wanted && !self.countdown.is_running() {
            self.countdown.start(self.commands_tx.clone());
            self.countdown_remaining = Some(self.countdown.length().as_secs());
        } else if !wanted && self.countdown.is_running() {
            self.countdown.cancel();
            self.countdown_remaining = None;
        }
    }

    fn publish(&self) {
        let mut snapshot = self.store.snapshot();
        snapshot.auto_update = self.auto_update;
        snapshot.countdown_remaining = self.countdown_remaining;

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
