//! Integration tests for the tally delivery pipeline
//!
//! Trackers run against temporary data directories with the simulated test
//! modes, so no network access is needed.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tally_core::config::{Config, DeliveryConfig, TestMode};
use tally_core::queue::{EventRecord, QueueFile};
use tally_core::{IdentityKind, Tracker};
use tempfile::TempDir;

fn config(test_mode: TestMode) -> Config {
    Config {
        delivery: DeliveryConfig {
            api_key: Some("test-key".to_string()),
            secret_key: Some("test-secret".to_string()),
            test_mode,
            simulated_latency_ms: 5,
            check_server_interval_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn manual_tracker(dir: &Path, test_mode: TestMode) -> Tracker {
    Tracker::builder(&config(test_mode))
        .data_dir(dir)
        .spawn_worker(false)
        .start()
        .unwrap()
}

fn stored_records(dir: &Path) -> Vec<EventRecord> {
    QueueFile::new(dir.join("queue.bin"))
        .read()
        .unwrap()
        .unwrap_or_default()
}

fn stored_types(dir: &Path) -> Vec<String> {
    stored_records(dir)
        .iter()
        .map(|r| r.event_type().to_string())
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes.
fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ============================================
// End-to-end delivery
// ============================================

#[test]
fn test_offline_then_online_delivery() {
    let dir = TempDir::new().unwrap();
    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    let handle = tracker.handle();

    handle.track_event(json!({"type": "a"}));
    handle.track_event(json!({"type": "b"}));

    assert!(handle.server_available());
    tracker.tick();
    assert_eq!(stored_types(dir.path()), vec!["a", "b", "platform", "heartbeat"]);
    assert!(!handle.server_available());
    assert_eq!(handle.pending_len(), 4);

    // The first probe after a failed send is not delayed
    handle.set_test_mode(TestMode::SimulateSuccess);
    tracker.tick();

    assert_eq!(handle.pending_len(), 0);
    assert!(!dir.path().join("queue.bin").exists());
    assert!(handle.server_available());

    let stats = handle.stats();
    assert_eq!(stats.batches_sent, 1);
    assert_eq!(stats.records_sent, 4);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.probes, 1);
}

#[test]
fn test_backoff_skips_sends_inside_interval() {
    let dir = TempDir::new().unwrap();
    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    let handle = tracker.handle();
    handle.set_check_server_interval(Duration::from_secs(60));

    handle.track_tutorial("1");
    // Failed send, then a failed probe that starts the interval
    tracker.tick();
    tracker.tick();
    handle.set_test_mode(TestMode::SimulateSuccess);
    tracker.tick();
    tracker.tick();

    let stats = handle.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.probes, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.batches_sent, 0);
    assert!(handle.pending_len() > 0);
}

#[test]
fn test_records_survive_restart_in_order() {
    let dir = TempDir::new().unwrap();
    {
        let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
        let handle = tracker.handle();
        handle.track_milestone("level", "1");
        tracker.tick();
        handle.track_milestone("level", "2");
        tracker.terminate();
    }
    assert_eq!(
        stored_types(dir.path()),
        vec!["milestone", "platform", "heartbeat", "milestone"]
    );

    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    tracker.handle().track_country("NL");
    tracker.tick();

    // Stored records first, no second platform event, a fresh heartbeat
    assert_eq!(
        stored_types(dir.path()),
        vec!["milestone", "platform", "heartbeat", "milestone", "country", "heartbeat"]
    );
}

#[test]
fn test_foreign_queue_version_is_discarded() {
    let dir = TempDir::new().unwrap();
    let mut bytes = 99i32.to_be_bytes().to_vec();
    bytes.extend_from_slice(&1i32.to_be_bytes());
    std::fs::write(dir.path().join("queue.bin"), bytes).unwrap();

    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    tracker.tick();

    assert_eq!(stored_types(dir.path()), vec!["platform", "heartbeat"]);
}

#[test]
fn test_heartbeat_once_per_interval() {
    let dir = TempDir::new().unwrap();
    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    tracker.tick();
    tracker.tick();
    tracker.tick();

    let heartbeats = stored_types(dir.path())
        .into_iter()
        .filter(|t| t == "heartbeat")
        .count();
    assert_eq!(heartbeats, 1);

    let record = stored_records(dir.path())
        .into_iter()
        .find(|r| r.event_type() == "heartbeat")
        .unwrap();
    let event: serde_json::Value = serde_json::from_str(record.payload()).unwrap();
    assert_eq!(event["is_payable"], true);
}

// ============================================
// Identities
// ============================================

#[test]
fn test_identity_update_respects_sticky_values() {
    let dir = TempDir::new().unwrap();
    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    let handle = tracker.handle();

    handle.set_facebook_id("fb-1");
    handle.track_event(json!({"type": "first"}));
    handle.track_event(json!({"type": "second"}));
    handle.clear_facebook_id();
    handle.track_event(json!({"type": "third"}));
    handle.set_facebook_id("fb-2");
    tracker.tick();

    let facebook: Vec<(String, String)> = stored_records(dir.path())
        .iter()
        .filter(|r| ["first", "second", "third"].contains(&r.event_type()))
        .map(|r| {
            (
                r.event_type().to_string(),
                r.identities().get(IdentityKind::Facebook).to_string(),
            )
        })
        .collect();
    assert_eq!(
        facebook,
        vec![
            ("first".to_string(), "fb-1".to_string()),
            ("second".to_string(), "fb-1".to_string()),
            ("third".to_string(), "fb-2".to_string()),
        ]
    );
}

#[test]
fn test_records_carry_sdk_id() {
    let dir = TempDir::new().unwrap();
    let tracker = manual_tracker(dir.path(), TestMode::SimulateOffline);
    let sdk_id = tracker.handle().id(IdentityKind::Sdk);
    tracker.tick();

    let records = stored_records(dir.path());
    assert!(!records.is_empty());
    assert!(records
        .iter()
        .all(|r| r.identities().get(IdentityKind::Sdk) == sdk_id));

    let wire: serde_json::Value = serde_json::from_str(&records[0].to_json_string()).unwrap();
    assert_eq!(wire["identifiers"]["sdk_id"], sdk_id.as_str());
}

// ============================================
// Worker thread
// ============================================

#[test]
fn test_worker_delivers_concurrent_producers() {
    let dir = TempDir::new().unwrap();
    let mut config = config(TestMode::SimulateSuccess);
    config.delivery.tick_interval_ms = 10;
    let tracker = Tracker::builder(&config)
        .data_dir(dir.path())
        .start()
        .unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = tracker.handle();
            thread::spawn(move || {
                for i in 0..25 {
                    handle.track_user_attribute(&format!("p{}", p), &i.to_string());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let handle = tracker.handle();
    // 100 attributes plus platform and the first heartbeat
    assert!(wait_for(Duration::from_secs(10), || {
        handle.stats().records_sent >= 102 && handle.pending_len() == 0
    }));
    tracker.terminate();
    assert!(stored_records(dir.path()).is_empty());
}

#[test]
fn test_pause_cancels_slow_send() {
    let dir = TempDir::new().unwrap();
    let mut config = config(TestMode::SimulateSuccess);
    config.delivery.simulated_latency_ms = 30_000;
    let tracker = Tracker::builder(&config)
        .data_dir(dir.path())
        .spawn_worker(false)
        .start()
        .unwrap();
    let handle = tracker.handle();
    handle.track_tutorial("start");

    thread::scope(|scope| {
        let ticking = scope.spawn(|| tracker.tick());

        assert!(wait_for(Duration::from_secs(5), || tracker.is_busy()));
        let started = Instant::now();
        tracker.pause();
        assert!(started.elapsed() < Duration::from_secs(5));
        ticking.join().unwrap();
    });

    assert!(tracker.is_paused());
    let stats = handle.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.probes, 0);
    assert_eq!(stats.batches_sent, 0);

    // The aborted batch is stored whole and in order
    assert_eq!(stored_types(dir.path()), vec!["tutorial", "platform", "heartbeat"]);
    assert_eq!(handle.pending_len(), 3);

    tracker.resume();
    assert!(!tracker.is_paused());
}
