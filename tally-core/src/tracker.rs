//! Producer-facing tracker
//!
//! A [`Tracker`] owns the delivery worker. Producers talk to it through
//! cloneable [`TrackerHandle`]s, which never block on network IO.
//!
//! ```no_run
//! use tally_core::{Config, Tracker};
//!
//! let config = Config::load()?;
//! let tracker = Tracker::builder(&config).start()?;
//! let handle = tracker.handle();
//! handle.track_tutorial("intro");
//! tracker.terminate();
//! # Ok::<(), tally_core::Error>(())
//! ```

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;

use crate::config::{Config, TestMode};
use crate::delivery::{CancelSignal, DeliveryChannel};
use crate::error::{Error, Result};
use crate::events;
use crate::identity::{self, IdentityKind};
use crate::logging::DiagnosticLog;
use crate::orchestrator::{DeliveryStats, Orchestrator, RuntimeSettings, Shared};
use crate::platform::{AdvertisingIdProvider, HostPlatform, NoAdvertisingId, PlatformInfo};
use crate::queue::QueueFile;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

/// Settings key holding the SDK install id.
pub const SDK_ID_KEY: &str = "sdk_id";

/// Configures and starts a [`Tracker`].
pub struct TrackerBuilder<'a> {
    config: &'a Config,
    data_dir: Option<PathBuf>,
    storage: Option<Box<dyn KeyValueStore>>,
    platform: Option<Box<dyn PlatformInfo>>,
    advertising: Option<Box<dyn AdvertisingIdProvider>>,
    diagnostics: Option<Arc<DiagnosticLog>>,
    custom_id: Option<String>,
    payable: Option<bool>,
    test_mode: Option<TestMode>,
    spawn_worker: bool,
}

impl<'a> TrackerBuilder<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            data_dir: None,
            storage: None,
            platform: None,
            advertising: None,
            diagnostics: None,
            custom_id: None,
            payable: None,
            test_mode: None,
            spawn_worker: true,
        }
    }

    /// Directory for `queue.bin` and `settings.toml` (default: XDG data dir).
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Use this settings store instead of `settings.toml`.
    pub fn storage(mut self, storage: Box<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn platform(mut self, platform: Box<dyn PlatformInfo>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn advertising(mut self, provider: Box<dyn AdvertisingIdProvider>) -> Self {
        self.advertising = Some(provider);
        self
    }

    /// Share a diagnostic log.
    ///
    /// The log only captures text once it is attached to the global
    /// subscriber through [`crate::logging::init`] or
    /// [`crate::logging::init_diagnostics`]. Without this call the tracker
    /// creates an unattached log and [`TrackerHandle::log`] stays empty.
    pub fn diagnostics(mut self, log: Arc<DiagnosticLog>) -> Self {
        self.diagnostics = Some(log);
        self
    }

    pub fn custom_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    pub fn payable(mut self, payable: bool) -> Self {
        self.payable = Some(payable);
        self
    }

    pub fn test_mode(mut self, mode: TestMode) -> Self {
        self.test_mode = Some(mode);
        self
    }

    /// Without a worker, ticks only run through [`Tracker::tick`].
    pub fn spawn_worker(mut self, spawn: bool) -> Self {
        self.spawn_worker = spawn;
        self
    }

    /// Start the tracker.
    ///
    /// Fails on invalid delivery configuration or when the HTTP runtime or
    /// worker thread cannot be created. An unusable settings store only
    /// disables analytics.
    pub fn start(self) -> Result<Tracker> {
        let config = self.config;
        config.delivery.validate()?;

        let cancel = Arc::new(CancelSignal::new());
        let channel = DeliveryChannel::new(&config.delivery, Arc::clone(&cancel))?;

        let data_dir = self.data_dir.unwrap_or_else(Config::data_dir);
        let (storage, storage_ok): (Box<dyn KeyValueStore>, bool) = match self.storage {
            Some(storage) => (storage, true),
            None => match FileStore::open(Config::settings_path(&data_dir)) {
                Ok(store) => (Box::new(store), true),
                Err(e) => {
                    tracing::warn!(error = %e, "Settings store unavailable, analytics disabled");
                    (Box::new(MemoryStore::new()), false)
                }
            },
        };

        let mut settings = RuntimeSettings::from_config(
            &config.delivery,
            self.payable.unwrap_or(config.tracker.payable),
        );
        if let Some(mode) = self.test_mode {
            settings.test_mode = mode;
        }
        settings.analytics_enabled = storage_ok;

        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(DiagnosticLog::new(config.logging.diagnostics)));

        let shared = Arc::new(Shared::new(
            settings,
            storage,
            diagnostics,
            QueueFile::new(Config::queue_path(&data_dir)),
        ));

        let sdk_id = obtain_sdk_id(&shared);
        shared.set_id(IdentityKind::Sdk, &sdk_id);
        if let Some(custom_id) = self.custom_id.or_else(|| config.tracker.custom_id.clone()) {
            shared.set_id(IdentityKind::Custom, &custom_id);
        }
        identity::resolve_device_identity();
        shared.update_settings(|settings| settings.initialized = true);

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&shared),
            channel,
            cancel,
            self.platform.unwrap_or_else(|| Box::new(HostPlatform)),
            self.advertising.unwrap_or_else(|| Box::new(NoAdvertisingId)),
        ));

        let worker = if self.spawn_worker {
            Some(Worker::spawn(Arc::clone(&orchestrator), Arc::clone(&shared))?)
        } else {
            None
        };

        tracing::info!(
            data_dir = %data_dir.display(),
            endpoint = %config.delivery.endpoint,
            test_mode = shared.settings().test_mode.as_str(),
            worker = worker.is_some(),
            "Tracker started"
        );

        Ok(Tracker {
            handle: TrackerHandle { shared },
            orchestrator,
            worker,
            terminated: false,
        })
    }
}

/// Read the install id, creating and storing one on first run.
fn obtain_sdk_id(shared: &Shared) -> String {
    let mut storage = shared.storage.lock().unwrap();
    let id = storage.get_string(SDK_ID_KEY, "");
    if !id.is_empty() {
        return id;
    }
    let id = uuid::Uuid::new_v4().to_string();
    storage.set_string(SDK_ID_KEY, &id);
    if let Err(e) = storage.save() {
        tracing::warn!(error = %e, "Failed to save SDK id");
    }
    id
}

/// Background thread running ticks on the configured interval.
struct Worker {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(orchestrator: Arc<Orchestrator>, shared: Arc<Shared>) -> Result<Self> {
        let (stop, stopped) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("tally-worker".to_string())
            .spawn(move || run_worker(orchestrator, shared, stopped))
            .map_err(|e| Error::Runtime(format!("failed to spawn worker: {}", e)))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit.
    fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

fn run_worker(orchestrator: Arc<Orchestrator>, shared: Arc<Shared>, stopped: mpsc::Receiver<()>) {
    tracing::debug!("Worker started");
    loop {
        orchestrator.tick();
        match stopped.recv_timeout(shared.settings().tick_interval()) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Worker stopped");
}

/// Owning side of the tracker. Dropping it terminates the tracker.
pub struct Tracker {
    handle: TrackerHandle,
    orchestrator: Arc<Orchestrator>,
    worker: Option<Worker>,
    terminated: bool,
}

impl Tracker {
    pub fn builder(config: &Config) -> TrackerBuilder<'_> {
        TrackerBuilder::new(config)
    }

    /// A producer handle.
    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Run one tick on this thread.
    pub fn tick(&self) {
        self.orchestrator.tick();
    }

    /// Stop delivering and flush everything to disk. Blocks until a running
    /// tick has finished.
    pub fn pause(&self) {
        self.orchestrator.pause();
    }

    pub fn resume(&self) {
        self.orchestrator.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.orchestrator.is_paused()
    }

    /// A tick is in progress.
    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    /// Stop the worker, persist pending records and detach all handles.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        self.orchestrator.pause();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.handle
            .shared
            .update_settings(|settings| settings.initialized = false);
        tracing::info!("Tracker terminated");
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable producer handle
///
/// Tracking calls are no-ops while analytics is disabled or after the
/// tracker has terminated.
#[derive(Clone)]
pub struct TrackerHandle {
    shared: Arc<Shared>,
}

impl TrackerHandle {
    // Identities

    /// Current global value for `kind` (`""` when unset).
    pub fn id(&self, kind: IdentityKind) -> String {
        self.shared.id(kind)
    }

    pub fn set_facebook_id(&self, id: &str) {
        self.shared.set_id(IdentityKind::Facebook, id);
    }

    pub fn clear_facebook_id(&self) {
        self.shared.set_id(IdentityKind::Facebook, "");
    }

    pub fn set_google_plus_id(&self, id: &str) {
        self.shared.set_id(IdentityKind::GooglePlus, id);
    }

    pub fn clear_google_plus_id(&self) {
        self.shared.set_id(IdentityKind::GooglePlus, "");
    }

    pub fn set_twitter_id(&self, id: &str) {
        self.shared.set_id(IdentityKind::Twitter, id);
    }

    pub fn clear_twitter_id(&self) {
        self.shared.set_id(IdentityKind::Twitter, "");
    }

    pub fn set_custom_id(&self, id: &str) {
        self.shared.set_id(IdentityKind::Custom, id);
    }

    pub fn clear_custom_id(&self) {
        self.shared.set_id(IdentityKind::Custom, "");
    }

    // Events

    pub fn track_revenue(&self, amount: f64, currency: &str, reward: Option<&str>) {
        self.shared.enqueue(&events::revenue(amount, currency, reward));
    }

    pub fn track_revenue_with_virtual_currency(
        &self,
        amount: f64,
        currency: &str,
        vc_amount: f64,
        reward: Option<&str>,
    ) {
        self.shared.enqueue(&events::revenue_with_virtual_currency(
            amount, currency, vc_amount, reward,
        ));
    }

    pub fn track_item_purchase(&self, name: &str, vc_amount: Option<f64>) {
        self.shared.enqueue(&events::item_purchase(name, vc_amount));
    }

    pub fn track_tutorial(&self, step: &str) {
        self.shared.enqueue(&events::tutorial(step));
    }

    pub fn track_milestone(&self, name: &str, value: &str) {
        self.shared.enqueue(&events::milestone(name, value));
    }

    pub fn track_marketing(&self, partner: &str, campaign: &str, ad: &str, subid: &str, subsubid: &str) {
        self.shared
            .enqueue(&events::marketing(partner, campaign, ad, subid, subsubid));
    }

    pub fn track_user_attribute(&self, name: &str, value: &str) {
        self.shared.enqueue(&events::user_attribute(name, value));
    }

    pub fn track_country(&self, country: &str) {
        self.shared.enqueue(&events::country(country));
    }

    /// Queue an arbitrary event. It must be a JSON object with a string
    /// `type`; anything else is dropped with a warning.
    pub fn track_event(&self, event: Value) {
        match event.get("type").and_then(Value::as_str) {
            Some(event_type) if !event_type.is_empty() => self.shared.enqueue(&event),
            _ => tracing::warn!("Dropping event without a type"),
        }
    }

    // Properties

    pub fn initialized(&self) -> bool {
        self.shared.settings().initialized
    }

    pub fn analytics_enabled(&self) -> bool {
        self.shared.settings().analytics_enabled
    }

    pub fn payable(&self) -> bool {
        self.shared.settings().payable
    }

    pub fn set_payable(&self, payable: bool) {
        self.shared.update_settings(|settings| settings.payable = payable);
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.settings().tick_interval()
    }

    /// Clamped to 10 ms ..= 60 s.
    pub fn set_tick_interval(&self, interval: Duration) {
        self.shared
            .update_settings(|settings| settings.set_tick_interval(interval));
    }

    pub fn send_timeout(&self) -> Duration {
        self.shared.settings().send_timeout()
    }

    /// At least 100 ms.
    pub fn set_send_timeout(&self, timeout: Duration) {
        self.shared
            .update_settings(|settings| settings.set_send_timeout(timeout));
    }

    pub fn check_server_interval(&self) -> Duration {
        self.shared.settings().check_server_interval()
    }

    /// At least 100 ms.
    pub fn set_check_server_interval(&self, interval: Duration) {
        self.shared
            .update_settings(|settings| settings.set_check_server_interval(interval));
    }

    /// The last send or probe reached the collector.
    pub fn server_available(&self) -> bool {
        self.shared.settings().server_available
    }

    pub fn test_mode(&self) -> TestMode {
        self.shared.settings().test_mode
    }

    pub fn set_test_mode(&self, mode: TestMode) {
        self.shared.update_settings(|settings| settings.test_mode = mode);
    }

    /// Records waiting in the pending queue (not counting a batch in flight).
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.shared.stats.lock().unwrap().clone()
    }

    // Diagnostic log

    pub fn log_enabled(&self) -> bool {
        self.shared.diagnostics.is_enabled()
    }

    /// Disabling also clears the captured text.
    pub fn set_log_enabled(&self, enabled: bool) {
        self.shared.diagnostics.set_enabled(enabled);
    }

    pub fn log(&self) -> String {
        self.shared.diagnostics.contents()
    }
}
