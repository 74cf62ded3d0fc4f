//! # tally-core
//!
//! Core library for tally - store-and-forward delivery of analytics events.
//!
//! This library provides:
//! - Identity sets and event records
//! - A durable, ordered event queue with binary persistence
//! - A signed HTTP delivery channel with timeouts and cancellation
//! - A background orchestrator with heartbeat and reachability backoff
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through two queues:
//! - **Pending:** producers append through a [`TrackerHandle`]
//! - **Sending:** each tick moves pending here, delivers it, and splices
//!   anything undelivered back in front of pending
//!
//! Undelivered batches are written to `queue.bin` and survive restarts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tally_core::{Config, Tracker};
//!
//! let config = Config::load().expect("failed to load config");
//! let tracker = Tracker::builder(&config).start().expect("failed to start tracker");
//!
//! let handle = tracker.handle();
//! handle.set_custom_id("player-42");
//! handle.track_milestone("level", "3");
//!
//! tracker.terminate();
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, TestMode};
pub use error::{Error, Result};
pub use identity::{IdentityKind, IdentitySet};
pub use logging::DiagnosticLog;
pub use orchestrator::DeliveryStats;
pub use queue::{EventQueue, EventRecord, QueueFile};
pub use tracker::{Tracker, TrackerBuilder, TrackerHandle};

// Public modules
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod storage;
pub mod tracker;
