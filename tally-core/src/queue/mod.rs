//! Durable event queue
//!
//! An ordered, mergeable collection of [`EventRecord`]s with a cached wire
//! serialization and binary persistence through a [`QueueFile`].

mod codec;
mod record;

pub use codec::{QueueFile, FORMAT_VERSION};
pub use record::{EventRecord, RecordChange};

use std::collections::LinkedList;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::identity::IdentityKind;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a queue for record owner tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl QueueId {
    fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// FIFO queue of event records.
#[derive(Debug)]
pub struct EventQueue {
    id: QueueId,
    records: LinkedList<EventRecord>,
    cached_json: Option<String>,
    json_dirty: bool,
    storage_dirty: bool,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            id: QueueId::next(),
            records: LinkedList::new(),
            cached_json: None,
            json_dirty: false,
            storage_dirty: false,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// True when the file on disk may differ from memory.
    pub fn is_storage_dirty(&self) -> bool {
        self.storage_dirty
    }

    /// Add a record at the back.
    pub fn append(&mut self, mut record: EventRecord) {
        record.set_owner(Some(self.id));
        self.records.push_back(record);
        self.mark_dirty();
    }

    /// Move every record of `other` in front of this queue's records.
    ///
    /// `other` is empty afterwards. With `reassign_owner` the moved records are
    /// tagged with this queue's id; otherwise they keep their previous owner.
    pub fn prepend_from(&mut self, other: &mut EventQueue, reassign_owner: bool) {
        if other.is_empty() {
            return;
        }

        if reassign_owner {
            for record in other.records.iter_mut() {
                record.set_owner(Some(self.id));
            }
        }

        if self.is_empty() {
            self.cached_json = other.cached_json.take();
            self.json_dirty = other.json_dirty;
            self.storage_dirty = other.storage_dirty;
        } else {
            self.mark_dirty();
        }

        let mut moved = std::mem::take(&mut other.records);
        moved.append(&mut self.records);
        self.records = moved;

        other.reset();
    }

    /// Wire form of the whole queue: `[record,record,...]`.
    pub fn to_json_string(&mut self) -> &str {
        if self.json_dirty || self.cached_json.is_none() {
            let mut json = String::from("[");
            for (i, record) in self.records.iter().enumerate() {
                if i > 0 {
                    json.push(',');
                }
                json.push_str(&record.to_json_string());
            }
            json.push(']');
            self.cached_json = Some(json);
            self.json_dirty = false;
        }
        self.cached_json.as_deref().unwrap_or("[]")
    }

    pub fn has_event_of_type(&self, event_type: &str) -> bool {
        self.records.iter().any(|r| r.event_type() == event_type)
    }

    /// Patch `kind` on every queued record.
    ///
    /// Returns how many records changed.
    pub fn update_identity(&mut self, kind: IdentityKind, value: &str) -> usize {
        let mut changed = 0;
        for record in self.records.iter_mut() {
            if let Some(change) = record.update_identity(kind, value) {
                changed += 1;
                tracing::trace!(owner = ?change.owner, kind = ?change.kind, "Record identity changed");
            }
        }
        if changed > 0 {
            self.mark_dirty();
        }
        changed
    }

    /// Write the queue to `file` if it changed since the last write.
    ///
    /// Returns `false` when the write failed; the queue stays dirty and the
    /// next call retries.
    pub fn persist(&mut self, file: &QueueFile) -> bool {
        if !self.storage_dirty {
            return true;
        }
        match file.write(self.records.iter(), self.records.len()) {
            Ok(()) => {
                self.storage_dirty = false;
                tracing::debug!(records = self.records.len(), path = %file.path().display(), "Persisted queue");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %file.path().display(), "Failed to persist queue");
                false
            }
        }
    }

    /// Load records stored in `file`, replacing the current content.
    ///
    /// A missing file leaves the queue untouched. A file written with another
    /// format version is deleted. Any other read failure leaves the queue
    /// empty and the file in place.
    pub fn restore(&mut self, file: &QueueFile) {
        match file.read() {
            Ok(None) => {}
            Ok(Some(records)) => {
                self.reset();
                for mut record in records {
                    record.set_owner(Some(self.id));
                    self.records.push_back(record);
                }
                self.json_dirty = true;
                self.storage_dirty = false;
                tracing::debug!(records = self.records.len(), "Restored queue");
            }
            Err(Error::UnsupportedVersion { found, expected }) => {
                tracing::warn!(found, expected, "Discarding queue file with foreign version");
                self.reset();
                if let Err(e) = file.remove() {
                    tracing::warn!(error = %e, "Failed to delete queue file");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %file.path().display(), "Failed to read queue file");
                self.reset();
            }
        }
    }

    /// Drop every record, optionally deleting the backing file.
    pub fn clear_and_destroy(&mut self, storage: Option<&QueueFile>) {
        self.reset();
        if let Some(file) = storage {
            if let Err(e) = file.remove() {
                tracing::warn!(error = %e, "Failed to delete queue file");
            }
        }
    }

    fn mark_dirty(&mut self) {
        self.json_dirty = true;
        self.storage_dirty = true;
    }

    fn reset(&mut self) {
        self.records.clear();
        self.cached_json = None;
        self.json_dirty = false;
        self.storage_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySet;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn record(event_type: &str) -> EventRecord {
        EventRecord::new(&IdentitySet::new(), &json!({ "type": event_type }))
    }

    fn types(queue: &EventQueue) -> Vec<String> {
        queue.iter().map(|r| r.event_type().to_string()).collect()
    }

    #[test]
    fn test_serialization_joins_records_in_order() {
        let mut queue = EventQueue::new();
        assert_eq!(queue.to_json_string(), "[]");

        let records = [record("a"), record("b"), record("c")];
        let expected = format!(
            "[{},{},{}]",
            records[0].to_json_string(),
            records[1].to_json_string(),
            records[2].to_json_string()
        );
        for r in records {
            queue.append(r);
        }
        assert_eq!(queue.to_json_string(), expected);

        let parsed: Value = serde_json::from_str(queue.to_json_string()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_cache_follows_appends() {
        let mut queue = EventQueue::new();
        queue.append(record("a"));
        let first = queue.to_json_string().to_string();
        queue.append(record("b"));
        assert_ne!(queue.to_json_string(), first);
        assert!(queue.to_json_string().contains("\"b\""));
    }

    #[test]
    fn test_prepend_places_other_first_and_empties_it() {
        let mut queue = EventQueue::new();
        queue.append(record("A"));
        queue.append(record("B"));

        let mut front = EventQueue::new();
        front.append(record("C"));

        queue.prepend_from(&mut front, true);
        assert_eq!(types(&queue), vec!["C", "A", "B"]);
        assert!(front.is_empty());
        assert!(queue.iter().all(|r| r.owner() == Some(queue.id())));
        assert!(queue.to_json_string().starts_with("[{\"identifiers\":{"));
    }

    #[test]
    fn test_prepend_without_reassign_keeps_owner() {
        let mut pending = EventQueue::new();
        pending.append(record("A"));
        let pending_id = pending.id();

        let mut sending = EventQueue::new();
        sending.prepend_from(&mut pending, false);
        assert_eq!(sending.iter().next().unwrap().owner(), Some(pending_id));
    }

    #[test]
    fn test_prepend_into_empty_inherits_flags() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));

        let mut source = EventQueue::new();
        source.append(record("A"));
        assert!(source.persist(&file));
        let cached = source.to_json_string().to_string();

        let mut target = EventQueue::new();
        target.prepend_from(&mut source, true);
        assert!(!target.is_storage_dirty());
        assert_eq!(target.to_json_string(), cached);

        let mut empty = EventQueue::new();
        target.prepend_from(&mut empty, true);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_persist_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));

        let mut ids = IdentitySet::new();
        ids.set(IdentityKind::Custom, "player");
        ids.set(IdentityKind::AdTracking, "1");

        let mut queue = EventQueue::new();
        queue.append(EventRecord::new(&ids, &json!({"type": "tutorial", "step": "1"})));
        queue.append(record("milestone"));
        assert!(queue.is_storage_dirty());
        assert!(queue.persist(&file));
        assert!(!queue.is_storage_dirty());

        let mut restored = EventQueue::new();
        restored.restore(&file);
        assert_eq!(types(&restored), vec!["tutorial", "milestone"]);
        assert!(!restored.is_storage_dirty());

        let first = restored.iter().next().unwrap();
        assert_eq!(first.identities().get(IdentityKind::Custom), "player");
        assert_eq!(first.identities().get(IdentityKind::AdTracking), "1");
        assert_eq!(restored.to_json_string(), queue.to_json_string());
    }

    #[test]
    fn test_restore_missing_file_leaves_queue_untouched() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));

        let mut queue = EventQueue::new();
        queue.append(record("A"));
        queue.restore(&file);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_restore_foreign_version_deletes_file() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));
        let mut bytes = 7i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&0i32.to_be_bytes());
        std::fs::write(file.path(), bytes).unwrap();

        let mut queue = EventQueue::new();
        queue.append(record("A"));
        queue.restore(&file);
        assert!(queue.is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_restore_corrupt_file_keeps_it() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));
        std::fs::write(file.path(), [0u8, 0, 0, 1, 0, 0]).unwrap();

        let mut queue = EventQueue::new();
        queue.restore(&file);
        assert!(queue.is_empty());
        assert!(file.exists());
    }

    #[test]
    fn test_persist_is_noop_when_clean() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));
        let mut queue = EventQueue::new();
        assert!(queue.persist(&file));
        assert!(!file.exists());
    }

    #[test]
    fn test_persist_failure_keeps_dirty_flag() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let file = QueueFile::new(blocker.join("queue.bin"));

        let mut queue = EventQueue::new();
        queue.append(record("A"));
        assert!(!queue.persist(&file));
        assert!(queue.is_storage_dirty());
    }

    #[test]
    fn test_identity_update_skips_sticky_values() {
        let mut with_fb = IdentitySet::new();
        with_fb.set(IdentityKind::Facebook, "existing");

        let mut queue = EventQueue::new();
        queue.append(EventRecord::new(&with_fb, &json!({"type": "a"})));
        queue.append(EventRecord::new(&with_fb, &json!({"type": "b"})));
        queue.append(record("c"));
        let before = queue.to_json_string().to_string();

        assert_eq!(queue.update_identity(IdentityKind::Facebook, "new"), 1);
        let values: Vec<_> = queue
            .iter()
            .map(|r| r.identities().get(IdentityKind::Facebook).to_string())
            .collect();
        assert_eq!(values, vec!["existing", "existing", "new"]);
        assert_ne!(queue.to_json_string(), before);
        assert!(queue.is_storage_dirty());
    }

    #[test]
    fn test_has_event_of_type_and_clear() {
        let dir = TempDir::new().unwrap();
        let file = QueueFile::new(dir.path().join("queue.bin"));

        let mut queue = EventQueue::new();
        queue.append(record("platform"));
        assert!(queue.has_event_of_type("platform"));
        assert!(!queue.has_event_of_type("heartbeat"));
        assert!(queue.persist(&file));

        queue.clear_and_destroy(Some(&file));
        assert!(queue.is_empty());
        assert!(!file.exists());
        assert_eq!(queue.to_json_string(), "[]");
    }
}
