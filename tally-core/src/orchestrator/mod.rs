//! Delivery orchestrator
//!
//! One tick moves everything pending into a private sending queue, adds a
//! heartbeat when due, consults [`Reachability`], hands the batch to the
//! [`DeliveryChannel`] and splices whatever is left back in front of pending.
//!
//! Lock order (never taken in reverse): tick state, identities, pending.
//! Settings, stats and the settings store are leaf locks.

mod heartbeat;
mod reachability;
mod settings;

pub use heartbeat::HeartbeatTimer;
pub use reachability::{Reachability, Verdict};
pub use settings::{
    DeliveryStats, RuntimeSettings, MAX_TICK_INTERVAL, MIN_CHECK_SERVER_INTERVAL,
    MIN_SEND_TIMEOUT, MIN_TICK_INTERVAL,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;

use serde_json::Value;

use crate::config::HEARTBEAT_INTERVAL;
use crate::delivery::{CancelSignal, DeliveryChannel, SendOptions};
use crate::events;
use crate::identity::{IdentityKind, IdentitySet};
use crate::logging::DiagnosticLog;
use crate::platform::{AdvertisingIdProvider, PlatformInfo};
use crate::queue::{EventQueue, EventRecord, QueueFile};
use crate::storage::KeyValueStore;

/// State shared by producer handles and the worker.
pub(crate) struct Shared {
    pub(crate) pending: Mutex<EventQueue>,
    pub(crate) identities: Mutex<IdentitySet>,
    pub(crate) settings: Mutex<RuntimeSettings>,
    pub(crate) stats: Mutex<DeliveryStats>,
    pub(crate) storage: Mutex<Box<dyn KeyValueStore>>,
    pub(crate) diagnostics: Arc<DiagnosticLog>,
    pub(crate) queue_file: QueueFile,
}

impl Shared {
    pub(crate) fn new(
        settings: RuntimeSettings,
        storage: Box<dyn KeyValueStore>,
        diagnostics: Arc<DiagnosticLog>,
        queue_file: QueueFile,
    ) -> Self {
        Self {
            pending: Mutex::new(EventQueue::new()),
            identities: Mutex::new(IdentitySet::new()),
            settings: Mutex::new(settings),
            stats: Mutex::new(DeliveryStats::default()),
            storage: Mutex::new(storage),
            diagnostics,
            queue_file,
        }
    }

    /// Snapshot of the runtime properties.
    pub(crate) fn settings(&self) -> RuntimeSettings {
        self.settings.lock().unwrap().clone()
    }

    pub(crate) fn update_settings<R>(&self, f: impl FnOnce(&mut RuntimeSettings) -> R) -> R {
        f(&mut self.settings.lock().unwrap())
    }

    /// Set a global identity and patch every pending record.
    pub(crate) fn set_id(&self, kind: IdentityKind, value: &str) {
        let mut identities = self.identities.lock().unwrap();
        identities.set(kind, value);
        if self.settings.lock().unwrap().initialized {
            let changed = self.pending.lock().unwrap().update_identity(kind, value);
            tracing::debug!(kind = ?kind, changed, "Updated identity on pending records");
        }
    }

    pub(crate) fn id(&self, kind: IdentityKind) -> String {
        self.identities.lock().unwrap().get(kind).to_string()
    }

    /// Queue an event unless tracking is off.
    pub(crate) fn enqueue(&self, event: &Value) {
        {
            let settings = self.settings.lock().unwrap();
            if !settings.initialized || !settings.analytics_enabled {
                return;
            }
        }
        let record = EventRecord::new(&self.identities.lock().unwrap(), event);
        tracing::trace!(event_type = record.event_type(), "Enqueued event");
        self.pending.lock().unwrap().append(record);
    }

    fn save_storage(&self) {
        if let Err(e) = self.storage.lock().unwrap().save() {
            tracing::warn!(error = %e, "Failed to save settings");
        }
    }

    fn persist_pending(&self) {
        self.pending.lock().unwrap().persist(&self.queue_file);
    }
}

/// Worker-owned state, locked for the whole tick.
struct TickState {
    sending: EventQueue,
    channel: DeliveryChannel,
    reachability: Reachability,
    heartbeat: HeartbeatTimer,
    first_tick: bool,
}

/// Runs ticks and handles pause/resume.
pub(crate) struct Orchestrator {
    shared: Arc<Shared>,
    cancel: Arc<CancelSignal>,
    paused: AtomicBool,
    state: Mutex<TickState>,
    platform: Box<dyn PlatformInfo>,
    advertising: Box<dyn AdvertisingIdProvider>,
}

impl Orchestrator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        channel: DeliveryChannel,
        cancel: Arc<CancelSignal>,
        platform: Box<dyn PlatformInfo>,
        advertising: Box<dyn AdvertisingIdProvider>,
    ) -> Self {
        Self {
            shared,
            cancel,
            paused: AtomicBool::new(false),
            state: Mutex::new(TickState {
                sending: EventQueue::new(),
                channel,
                reachability: Reachability::new(),
                heartbeat: HeartbeatTimer::new(HEARTBEAT_INTERVAL),
                first_tick: true,
            }),
            platform,
            advertising,
        }
    }

    /// Run one tick on the calling thread. Returns immediately while paused.
    pub(crate) fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        if state.first_tick {
            self.initialize();
            state.first_tick = false;
        }
        self.process(&mut state);
    }

    /// A tick is running right now.
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self.state.try_lock(), Err(TryLockError::WouldBlock))
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop ticking, abort a running send, wait for the tick to end, then
    /// flush settings and the pending queue to disk.
    ///
    /// Pausing before the first tick runs the first-tick initialization so
    /// the stored queue is merged into pending instead of being overwritten.
    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        {
            let mut state = self.state.lock().unwrap();
            if state.first_tick {
                self.initialize();
                state.first_tick = false;
            }
        }

        self.shared.save_storage();
        self.shared.persist_pending();
        tracing::info!("Tracker paused");
    }

    /// Allow ticks again. Does not tick.
    pub(crate) fn resume(&self) {
        self.cancel.reset();
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("Tracker resumed");
    }

    fn initialize(&self) {
        if let Some(info) = self.advertising.advertising_info() {
            self.shared.set_id(IdentityKind::Advertising, &info.id);
            let enabled = !info.limit_ad_tracking;
            self.shared
                .update_settings(|settings| settings.analytics_enabled = enabled);
            self.shared
                .set_id(IdentityKind::AdTracking, if enabled { "1" } else { "0" });
            tracing::debug!(analytics_enabled = enabled, "Resolved advertising id");
        }

        let analytics_enabled = self.shared.settings().analytics_enabled;
        if !analytics_enabled {
            self.shared.pending.lock().unwrap().clear_and_destroy(None);
        }

        let mut stored = EventQueue::new();
        stored.restore(&self.shared.queue_file);
        let restored = stored.len();
        let has_platform = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.prepend_from(&mut stored, true);
            pending.has_event_of_type(events::PLATFORM)
        };

        if analytics_enabled && !has_platform {
            self.shared
                .enqueue(&events::platform(&self.platform.descriptor()));
        }

        tracing::info!(restored, analytics_enabled, "Tracker initialized");
    }

    fn process(&self, state: &mut TickState) {
        let settings = self.shared.settings();
        let TickState {
            sending,
            channel,
            reachability,
            heartbeat,
            ..
        } = state;

        {
            let mut pending = self.shared.pending.lock().unwrap();
            sending.prepend_from(&mut pending, false);
        }

        // Heartbeats bypass the analytics gate that applies to producers
        let now = Instant::now();
        if heartbeat.fire_if_due(now) {
            let event = events::heartbeat(settings.payable);
            let record = EventRecord::new(&self.shared.identities.lock().unwrap(), &event);
            sending.append(record);
        }

        if !sending.is_empty() {
            let options = settings.send_options();
            let verdict = reachability.check(now, settings.check_server_interval(), || {
                channel.check_server(&options)
            });

            {
                let mut stats = self.shared.stats.lock().unwrap();
                if verdict.probed() {
                    stats.probes += 1;
                }
                if verdict == Verdict::BackingOff {
                    stats.skipped += 1;
                }
            }

            if verdict.may_send() {
                self.deliver(sending, channel, reachability, &options);
            } else {
                tracing::debug!(records = sending.len(), verdict = ?verdict, "Server unavailable, keeping records");
                sending.persist(&self.shared.queue_file);
            }

            // A cancel raised during this attempt is consumed here, not by
            // the probe that may have preceded the send
            self.cancel.reset();

            let available = reachability.is_available();
            self.shared
                .update_settings(|settings| settings.server_available = available);
        }

        let mut pending = self.shared.pending.lock().unwrap();
        pending.prepend_from(sending, false);
    }

    fn deliver(
        &self,
        sending: &mut EventQueue,
        channel: &DeliveryChannel,
        reachability: &mut Reachability,
        options: &SendOptions,
    ) {
        let records = sending.len();
        if channel.send(sending, options) {
            sending.clear_and_destroy(Some(&self.shared.queue_file));
            reachability.mark_available();

            let mut stats = self.shared.stats.lock().unwrap();
            stats.batches_sent += 1;
            stats.records_sent += records;
            tracing::info!(records, "Delivered batch");
        } else {
            sending.persist(&self.shared.queue_file);
            reachability.mark_unavailable();

            self.shared.stats.lock().unwrap().failures += 1;
            tracing::info!(records, "Delivery failed, batch kept for retry");
        }
    }
}
