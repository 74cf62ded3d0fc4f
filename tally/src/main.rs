//! tally - command line front end for the tally delivery pipeline
//!
//! This tool provides commands for:
//! - Checking configuration and the persisted queue
//! - Sending events through a short-lived tracker
//! - Inspecting and purging the persisted queue
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue: $XDG_DATA_HOME/tally/queue.bin (~/.local/share/tally/queue.bin)
//! - Config: $XDG_CONFIG_HOME/tally/config.toml (~/.config/tally/config.toml)

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tally_core::{Config, DiagnosticLog, EventQueue, QueueFile, TestMode, Tracker};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Store-and-forward analytics event delivery")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file to the XDG state directory)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured test mode (normal, simulate-success, simulate-offline)
    #[arg(long, global = true)]
    test_mode: Option<TestMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and persisted queue status
    Status,

    /// Queue events and deliver them
    Send {
        /// Events as JSON objects with a "type" field
        events: Vec<String>,

        /// Also read one JSON event per line from stdin
        #[arg(long)]
        stdin: bool,

        /// Maximum time to wait for delivery in milliseconds
        #[arg(long, default_value_t = 5_000)]
        wait_ms: u64,
    },

    /// Print the persisted queue as JSON
    Inspect,

    /// Delete the persisted queue
    Purge,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(mode) = args.test_mode {
        config.delivery.test_mode = mode;
    }

    let diagnostics = Arc::new(DiagnosticLog::new(config.logging.diagnostics));

    // Initialize logging if verbose; the guard must outlive the command
    let _log_guard = if args.verbose {
        Some(
            tally_core::logging::init(&config.logging, Some(Arc::clone(&diagnostics)))
                .context("failed to initialize logging")?,
        )
    } else {
        if diagnostics.is_enabled() {
            tally_core::logging::init_diagnostics(Arc::clone(&diagnostics), &config.logging.level)
                .context("failed to initialize diagnostics")?;
        }
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Send {
            events,
            stdin,
            wait_ms,
        } => cmd_send(&config, diagnostics, events, stdin, wait_ms),
        Command::Inspect => cmd_inspect(),
        Command::Purge => cmd_purge(),
    }
}

fn queue_file() -> QueueFile {
    QueueFile::new(Config::queue_path(&Config::data_dir()))
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("tally Configuration");
    println!("===================");
    println!();

    let delivery = &config.delivery;

    println!("Endpoint:        {}", delivery.endpoint);
    println!(
        "API Key:         {}",
        if delivery.api_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!(
        "Secret Key:      {}",
        if delivery.secret_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Test Mode:       {}", delivery.test_mode.as_str());
    println!("Tick Interval:   {}ms", delivery.tick_interval_ms);
    println!("Send Timeout:    {}ms", delivery.send_timeout_ms);
    println!("Check Interval:  {}ms", delivery.check_server_interval_ms);
    println!("Payable:         {}", config.tracker.payable);
    println!("Data Dir:        {}", Config::data_dir().display());

    let file = queue_file();
    println!();
    match file.read() {
        Ok(Some(records)) => println!("Persisted:       {} records", records.len()),
        Ok(None) => println!("Persisted:       none"),
        Err(e) => println!("Persisted:       unreadable ({})", e),
    }

    println!();
    if delivery.is_ready() {
        println!("Status: Ready to send");
    } else {
        println!("Status: Not ready (missing required configuration)");
        println!();
        println!("Add your keys to {}:", Config::config_path().display());
        println!();
        println!("  [delivery]");
        println!("  api_key = \"your-api-key\"");
        println!("  secret_key = \"your-secret-key\"");
    }

    Ok(())
}

fn cmd_send(
    config: &Config,
    diagnostics: Arc<DiagnosticLog>,
    raw_events: Vec<String>,
    read_stdin: bool,
    wait_ms: u64,
) -> Result<()> {
    let mut events = raw_events
        .iter()
        .map(|raw| parse_event(raw))
        .collect::<Result<Vec<_>>>()?;

    if read_stdin {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("failed to read stdin")?;
            if !line.trim().is_empty() {
                events.push(parse_event(&line)?);
            }
        }
    }

    if !config.delivery.is_ready() {
        bail!("delivery is not configured; run 'tally status' for details");
    }

    let tracker = Tracker::builder(config)
        .diagnostics(diagnostics)
        .start()
        .context("failed to start tracker")?;
    let handle = tracker.handle();

    let queued = events.len();
    tracing::debug!(events = queued, "Queueing events from command line");
    for event in events {
        handle.track_event(event);
    }

    // Set up signal handler to stop waiting early
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!(
        "Queued {} events (test mode: {}), waiting up to {}ms...",
        queued,
        handle.test_mode().as_str(),
        wait_ms
    );

    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if handle.stats().batches_sent > 0 && handle.pending_len() == 0 && !tracker.is_busy() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let stats = handle.stats();
    let server_available = handle.server_available();
    tracker.terminate();
    let kept = handle.pending_len();
    tracing::info!(
        batches = stats.batches_sent,
        records = stats.records_sent,
        kept,
        "Send finished"
    );

    println!();
    println!("Delivery Summary");
    println!("----------------");
    println!("Batches sent:    {}", stats.batches_sent);
    println!("Records sent:    {}", stats.records_sent);
    println!("Failed attempts: {}", stats.failures);
    println!("Probes:          {}", stats.probes);
    println!("Skipped ticks:   {}", stats.skipped);
    println!("Server:          {}", if server_available { "available" } else { "unavailable" });
    if kept > 0 {
        println!("Kept for retry:  {} records", kept);
    }

    let log = handle.log();
    if !log.is_empty() {
        println!();
        println!("Diagnostics");
        println!("-----------");
        print!("{}", log);
    }

    Ok(())
}

fn parse_event(raw: &str) -> Result<Value> {
    let event: Value =
        serde_json::from_str(raw).with_context(|| format!("invalid event JSON: {}", raw))?;
    match event.get("type").and_then(Value::as_str) {
        Some(event_type) if !event_type.is_empty() => Ok(event),
        _ => bail!("event must be a JSON object with a \"type\" field: {}", raw),
    }
}

fn cmd_inspect() -> Result<()> {
    let file = queue_file();
    if !file.exists() {
        println!("No persisted queue at {}", file.path().display());
        return Ok(());
    }

    let records = file
        .read()
        .with_context(|| format!("failed to read {}", file.path().display()))?
        .unwrap_or_default();

    let mut queue = EventQueue::new();
    for record in records {
        queue.append(record);
    }

    let batch: Value =
        serde_json::from_str(queue.to_json_string()).context("persisted queue is not valid JSON")?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

fn cmd_purge() -> Result<()> {
    let file = queue_file();
    if !file.exists() {
        println!("Nothing to purge");
        return Ok(());
    }

    file.remove()
        .with_context(|| format!("failed to delete {}", file.path().display()))?;
    tracing::info!(path = %file.path().display(), "Purged persisted queue");
    println!("Deleted {}", file.path().display());
    Ok(())
}
