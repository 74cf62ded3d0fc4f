//! Runtime properties shared between producers and the worker

use std::time::Duration;

use crate::config::{DeliveryConfig, TestMode};
use crate::delivery::SendOptions;

pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);
pub const MAX_TICK_INTERVAL: Duration = Duration::from_millis(60_000);
pub const MIN_SEND_TIMEOUT: Duration = Duration::from_millis(100);
pub const MIN_CHECK_SERVER_INTERVAL: Duration = Duration::from_millis(100);

/// Mutable tracker properties. Setters clamp to the supported ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub initialized: bool,
    pub analytics_enabled: bool,
    pub payable: bool,
    pub server_available: bool,
    pub test_mode: TestMode,
    pub simulated_latency: Duration,
    tick_interval: Duration,
    send_timeout: Duration,
    check_server_interval: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &DeliveryConfig, payable: bool) -> Self {
        let mut settings = Self {
            initialized: false,
            analytics_enabled: true,
            payable,
            server_available: true,
            test_mode: config.test_mode,
            simulated_latency: Duration::from_millis(config.simulated_latency_ms),
            tick_interval: MIN_TICK_INTERVAL,
            send_timeout: MIN_SEND_TIMEOUT,
            check_server_interval: MIN_CHECK_SERVER_INTERVAL,
        };
        settings.set_tick_interval(Duration::from_millis(config.tick_interval_ms));
        settings.set_send_timeout(Duration::from_millis(config.send_timeout_ms));
        settings.set_check_server_interval(Duration::from_millis(config.check_server_interval_ms));
        settings
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn set_tick_interval(&mut self, value: Duration) {
        self.tick_interval = value.clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL);
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn set_send_timeout(&mut self, value: Duration) {
        self.send_timeout = value.max(MIN_SEND_TIMEOUT);
    }

    pub fn check_server_interval(&self) -> Duration {
        self.check_server_interval
    }

    pub fn set_check_server_interval(&mut self, value: Duration) {
        self.check_server_interval = value.max(MIN_CHECK_SERVER_INTERVAL);
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            timeout: self.send_timeout,
            test_mode: self.test_mode,
            simulated_latency: self.simulated_latency,
        }
    }
}

/// Delivery counters since the tracker started
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches acknowledged by the collector
    pub batches_sent: usize,
    /// Records contained in acknowledged batches
    pub records_sent: usize,
    /// Send attempts that failed
    pub failures: usize,
    /// Reachability probes performed
    pub probes: usize,
    /// Ticks that held records but skipped sending while backing off
    pub skipped: usize,
}
