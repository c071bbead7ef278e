//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openapi_client::models::VersionDescriptor;
use tokio::sync::mpsc;

use upnotifier::app::manager::Capabilities;
use upnotifier::channel::{ChannelConnector, ChannelEvent, ChannelSession};
use upnotifier::errors::UpdateError;
use upnotifier::http::updates::UpdateApi;
use upnotifier::storage::kv::{KeyValueStore, MemoryKeyValueStore};
use upnotifier::update::chime::Chime;
use upnotifier::update::reloader::Reloader;

#[derive(Default)]
pub struct FakeApi {
    pub unhealthy: AtomicBool,
    pub latest: Mutex<Option<VersionDescriptor>>,
    pub health_calls: AtomicUsize,
    pub latest_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_latest(version: &str) -> Self {
        let api = Self::default();
        api.set_latest(Some(version));
        api
    }

    pub fn set_latest(&self, version: Option<&str>) {
        *self.latest.lock().unwrap() = version.map(VersionDescriptor::new);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateApi for FakeApi {
    async fn health(&self) -> Result<bool, UpdateError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.unhealthy.load(Ordering::SeqCst))
    }

    async fn latest_version(&self) -> Result<Option<VersionDescriptor>, UpdateError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.latest.lock().unwrap().clone())
    }
}

/// Connector handing out sessions fed from the test
#[derive(Default)]
pub struct FakeConnector {
    pub refuse: AtomicBool,
    pub attempts: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    feed: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl FakeConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an event on the current session. False when no session is open.
    pub fn push(&self, event: ChannelEvent) -> bool {
        match self.feed.lock().unwrap().as_ref() {
            Some(feed) => feed.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the server dropping the current session
    pub fn drop_session(&self) {
        self.feed.lock().unwrap().take();
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn ChannelSession>, UpdateError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(UpdateError::Connectivity("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(tx);
        Ok(Box::new(FakeSession {
            events: rx,
            closed: self.closed.clone(),
        }))
    }
}

struct FakeSession {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ChannelSession for FakeSession {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, UpdateError> {
        Ok(self.events.recv().await)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingReloader {
    pub reloads: Mutex<Vec<String>>,
}

impl RecordingReloader {
    pub fn reloads(&self) -> Vec<String> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reloader for RecordingReloader {
    async fn reload(&self, version: &VersionDescriptor) -> Result<(), UpdateError> {
        self.reloads.lock().unwrap().push(version.version.clone());
        Ok(())
    }
}

/// Reloader that never finishes on its own, like a hung restart command
#[derive(Default)]
pub struct StalledReloader {
    pub started: AtomicUsize,
}

impl StalledReloader {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reloader for StalledReloader {
    async fn reload(&self, _version: &VersionDescriptor) -> Result<(), UpdateError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingChime {
    pub plays: AtomicUsize,
}

impl CountingChime {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl Chime for CountingChime {
    fn play(&self) -> Result<(), UpdateError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Chime whose audio output is unavailable
#[derive(Default)]
pub struct FailingChime {
    pub attempts: AtomicUsize,
}

impl FailingChime {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Chime for FailingChime {
    fn play(&self) -> Result<(), UpdateError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(UpdateError::Internal("no audio device".to_string()))
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub connector: Arc<FakeConnector>,
    pub kv: Arc<MemoryKeyValueStore>,
    pub reloader: Arc<RecordingReloader>,
    pub chime: Arc<CountingChime>,
}

impl Harness {
    pub fn new(api: FakeApi, kv: MemoryKeyValueStore) -> Self {
        Self {
            api: Arc::new(api),
            connector: Arc::new(FakeConnector::default()),
            kv: Arc::new(kv),
            reloader: Arc::new(RecordingReloader::default()),
            chime: Arc::new(CountingChime::default()),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            api: self.api.clone(),
            connector: self.connector.clone(),
            kv: self.kv.clone(),
            reloader: self.reloader.clone(),
            chime: self.chime.clone(),
        }
    }

    pub async fn baseline(&self) -> Option<String> {
        self.kv
            .get(upnotifier::storage::kv::CURRENT_VERSION_KEY)
            .await
            .unwrap()
    }
}
