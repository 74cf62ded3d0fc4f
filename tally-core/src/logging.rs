//! Logging infrastructure for tally
//!
//! Logs are written to `~/.local/state/tally/tally.log` following XDG standards.
//! Tracker diagnostics can additionally be captured into an in-memory
//! [`DiagnosticLog`] that the host application reads back on demand.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::fmt::{self as stdfmt, Write as _};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::{Context, Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Only events from this crate end up in the diagnostic buffer.
const DIAGNOSTIC_TARGET: &str = "tally_core";

/// Upper bound on captured diagnostic text; the oldest lines go first.
pub const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory
/// - Log rotation
/// - Configurable log level via config or RUST_LOG env var
/// - Optional capture into a [`DiagnosticLog`]
pub fn init(
    config: &LoggingConfig,
    diagnostics: Option<Arc<DiagnosticLog>>,
) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation, keeping at most `max_files` old logs
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tally.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;

    // Non-blocking writer for better performance
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Build the filter from config or env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // File layer - structured logging with timestamps
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let diagnostic_layer = diagnostics.as_ref().map(|log| log.layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(diagnostic_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        diagnostics = diagnostics.is_some(),
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Install a subscriber that only feeds a [`DiagnosticLog`]
///
/// For hosts that want [`TrackerHandle::log`](crate::TrackerHandle::log)
/// without file logging. Fails if a global subscriber is already set.
pub fn init_diagnostics(diagnostics: Arc<DiagnosticLog>, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(diagnostics.layer())
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

/// In-memory diagnostic log.
///
/// Has its own lock so that logging never contends with the pending queue or
/// identity locks. Disabling the log drops everything captured so far.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    buffer: Mutex<LogBuffer>,
}

#[derive(Debug, Default)]
struct LogBuffer {
    enabled: bool,
    text: String,
}

impl DiagnosticLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            buffer: Mutex::new(LogBuffer {
                enabled,
                text: String::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.buffer.lock().unwrap().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.enabled = enabled;
        if !enabled {
            buffer.text.clear();
        }
    }

    /// Everything captured since the log was last enabled.
    pub fn contents(&self) -> String {
        self.buffer.lock().unwrap().text.clone()
    }

    /// Append one line; ignored while disabled.
    ///
    /// Once the text exceeds [`MAX_DIAGNOSTIC_BYTES`], whole lines are
    /// dropped from the front.
    pub fn append(&self, line: &str) {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.enabled {
            return;
        }
        buffer.text.push_str(line);
        buffer.text.push('\n');

        let len = buffer.text.len();
        if len > MAX_DIAGNOSTIC_BYTES {
            let excess = len - MAX_DIAGNOSTIC_BYTES;
            let cut = buffer.text.as_bytes()[excess..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(len, |i| excess + i + 1);
            buffer.text.drain(..cut);
        }
    }

    /// A tracing layer feeding this log.
    pub fn layer(self: &Arc<Self>) -> DiagnosticLayer {
        DiagnosticLayer {
            log: Arc::clone(self),
        }
    }
}

/// Tracing layer that renders tally-core events as single diagnostic lines.
pub struct DiagnosticLayer {
    log: Arc<DiagnosticLog>,
}

impl<S: Subscriber> Layer<S> for DiagnosticLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !target.starts_with(DIAGNOSTIC_TARGET) || !self.log.is_enabled() {
            return;
        }

        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.log
            .append(&format!("[{}] {}{}", target, line.message, line.fields));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
