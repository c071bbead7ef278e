//! Update state store
//!
//! Single source of truth for "is an update available, and which one". The
//! store is owned by the dispatcher worker, which serializes every mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use openapi_client::models::VersionDescriptor;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::UpdateError;
use crate::storage::kv::{current_version, KeyValueStore, CURRENT_VERSION_KEY};

/// Update availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    /// No known update
    Idle,

    /// A version differing from the baseline is pending
    UpdateAvailable,
}

/// Identifies the check (poll cycle, push event or on-demand check) that
/// produced an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CheckId(u64);

/// Monotonic source of [`CheckId`]s shared by every producer
#[derive(Debug, Default)]
pub struct CheckSequence {
    next: AtomicU64,
}

impl CheckSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> CheckId {
        CheckId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outcome of feeding an observed version to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> update available
    Detected,

    /// A newer pending version replaced the previous one
    Superseded,

    /// Same version as the one already pending
    Unchanged,

    /// Observed version is the baseline
    UpToDate,

    /// Version was dismissed during this same check
    Snoozed,
}

impl Transition {
    /// Whether the observation surfaced a version the user has not seen pending yet
    pub fn is_new_detection(&self) -> bool {
        matches!(self, Transition::Detected | Transition::Superseded)
    }
}

/// Observable state published to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSnapshot {
    pub state: UpdateState,
    pub pending: Option<VersionDescriptor>,
    pub current_version: String,
    pub history: Vec<VersionDescriptor>,
    pub last_detected: Option<DateTime<Utc>>,
    pub auto_update: bool,
    pub countdown_remaining: Option<u64>,
}

impl UpdateSnapshot {
    pub fn update_available(&self) -> bool {
        self.state == UpdateState::UpdateAvailable
    }

    /// Deployment history for display, most recent first
    pub fn history_newest_first(&self) -> impl Iterator<Item = &VersionDescriptor> {
        self.history.iter().rev()
    }
}

pub struct UpdateStore {
    kv: Arc<dyn KeyValueStore>,
    state: UpdateState,
    pending: Option<(VersionDescriptor, CheckId)>,
    snoozed: Option<(String, CheckId)>,
    current_version: String,
    history: Vec<VersionDescriptor>,
    last_detected: Option<DateTime<Utc>>,
}

impl UpdateStore {
    /// Create a store, reading the persisted baseline version
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self, UpdateError> {
        let current_version = current_version(kv.as_ref()).await?;
        info!("Current version: {}", current_version);

        Ok(Self {
            kv,
            state: UpdateState::Idle,
            pending: None,
            snoozed: None,
            current_version,
            history: Vec::new(),
            last_detected: None,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn pending(&self) -> Option<&VersionDescriptor> {
        self.pending.as_ref().map(|(descriptor, _)| descriptor)
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn history(&self) -> &[VersionDescriptor] {
        &self.history
    }

    pub fn last_detected(&self) -> Option<DateTime<Utc>> {
        self.last_detected
    }

    /// Compare an observed version against the baseline
    pub fn observe(&mut self, descriptor: VersionDescriptor, check: CheckId) -> Transition {
        if descriptor.version == self.current_version {
            debug!("Version {} is current", descriptor.version);
            return Transition::UpToDate;
        }

        if let Some((version, snoozed_check)) = &self.snoozed {
            if *version == descriptor.version && *snoozed_check == check {
                debug!("Version {} dismissed during this check", descriptor.version);
                return Transition::Snoozed;
            }
        }

        let transition = match (&self.state, self.pending()) {
            (UpdateState::UpdateAvailable, Some(pending)) if pending.version == descriptor.version => {
                return Transition::Unchanged;
            }
            (UpdateState::UpdateAvailable, _) => Transition::Superseded,
            (UpdateState::Idle, _) => Transition::Detected,
        };

        info!(
            "New version detected: {} (current: {})",
            descriptor.version, self.current_version
        );
        self.state = UpdateState::UpdateAvailable;
        self.pending = Some((descriptor, check));
        self.last_detected = Some(Utc::now());
        transition
    }

    /// Replace the deployment history with a fresh snapshot
    pub fn replace_history(&mut self, history: Vec<VersionDescriptor>) {
        debug!("Deployment history replaced ({} entries)", history.len());
        self.history = history;
    }

    /// Hide the pending update without acknowledging it. The baseline is
    /// untouched so a later check surfaces the version again.
    pub fn dismiss(&mut self) -> bool {
        let Some((descriptor, check)) = self.pending.take() else {
            return false;
        };

        info!("Update {} dismissed", descriptor.version);
        self.snoozed = Some((descriptor.version, check));
        self.state = UpdateState::Idle;
        true
    }

    /// Persist the pending version as the new baseline. Reloading is left to
    /// the caller.
    ///
    /// Returns the accepted descriptor, or `None` when nothing was pending.
    pub async fn accept(&mut self) -> Result<Option<VersionDescriptor>, UpdateError> {
        let Some(descriptor) = self.pending().cloned() else {
            debug!("Accept requested with no pending update");
            return Ok(None);
        };

        // the update stays pending if the baseline cannot be written
        self.kv.set(CURRENT_VERSION_KEY, &descriptor.version).await?;

        info!("Accepted version {}", descriptor.version);
        self.pending = None;
        self.current_version = descriptor.version.clone();
        self.state = UpdateState::Idle;
        self.snoozed = None;
        Ok(Some(descriptor))
    }

    pub fn snapshot(&self) -> UpdateSnapshot {
        UpdateSnapshot {
            state: self.state,
            pending: self.pending().cloned(),
            current_version: self.current_version.clone(),
            history: self.history.clone(),
            last_detected: self.last_detected,
            auto_update: false,
            countdown_remaining: None,
        }
    }
}
