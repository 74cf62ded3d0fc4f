//! A single queued event plus the identities it will be sent with.

use serde_json::Value;

use crate::identity::{IdentityKind, IdentitySet};

use super::QueueId;

/// One tracked event.
///
/// The payload and type tag never change after creation. Identity values can
/// be patched while the record waits in a queue; the change is reported back
/// to the caller as a [`RecordChange`] so the owning queue can invalidate its
/// caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    payload: String,
    event_type: String,
    identities: IdentitySet,
    owner: Option<QueueId>,
}

/// Notification that a record was mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    /// Queue the record was assigned to when it changed
    pub owner: Option<QueueId>,
    /// Identity kind that changed
    pub kind: IdentityKind,
}

impl EventRecord {
    /// Create a record from an event, taking a private copy of `identities`.
    pub fn new(identities: &IdentitySet, event: &Value) -> Self {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            payload: event.to_string(),
            event_type,
            identities: identities.clone(),
            owner: None,
        }
    }

    /// Rebuild a record from its stored parts.
    pub fn from_parts(payload: String, event_type: String, identities: IdentitySet) -> Self {
        Self {
            payload,
            event_type,
            identities,
            owner: None,
        }
    }

    /// Serialized event JSON
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Event type tag, `""` if the event had none
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn identities(&self) -> &IdentitySet {
        &self.identities
    }

    /// Queue this record was last assigned to
    pub fn owner(&self) -> Option<QueueId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<QueueId>) {
        self.owner = owner;
    }

    /// Patch one identity value (sticky kinds keep an existing value).
    pub fn update_identity(&mut self, kind: IdentityKind, value: &str) -> Option<RecordChange> {
        if self.identities.update(kind, value) {
            Some(RecordChange {
                owner: self.owner,
                kind,
            })
        } else {
            None
        }
    }

    /// Wire form: `{"identifiers":{...},"event":<payload>}`
    pub fn to_json_string(&self) -> String {
        format!(
            "{{\"identifiers\":{},\"event\":{}}}",
            self.identities.to_json(),
            self.payload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_is_extracted_once() {
        let record = EventRecord::new(&IdentitySet::new(), &json!({"type": "tutorial", "step": "2"}));
        assert_eq!(record.event_type(), "tutorial");
        assert!(record.owner().is_none());

        let untyped = EventRecord::new(&IdentitySet::new(), &json!({"step": "2"}));
        assert_eq!(untyped.event_type(), "");
    }

    #[test]
    fn test_record_keeps_private_identity_copy() {
        let mut ids = IdentitySet::new();
        ids.set(IdentityKind::Custom, "player-1");
        let record = EventRecord::new(&ids, &json!({"type": "country", "value": "NL"}));

        ids.set(IdentityKind::Custom, "player-2");
        assert_eq!(record.identities().get(IdentityKind::Custom), "player-1");
    }

    #[test]
    fn test_wire_form_is_valid_json() {
        let mut ids = IdentitySet::new();
        ids.set(IdentityKind::Sdk, "sdk-1");
        let record = EventRecord::new(&ids, &json!({"type": "milestone", "name": "boss", "value": "1"}));

        let parsed: Value = serde_json::from_str(&record.to_json_string()).unwrap();
        assert_eq!(parsed["identifiers"]["sdk_id"], "sdk-1");
        assert_eq!(parsed["event"]["type"], "milestone");
        assert_eq!(parsed["event"]["name"], "boss");
    }

    #[test]
    fn test_update_identity_reports_change() {
        let mut record = EventRecord::new(&IdentitySet::new(), &json!({"type": "heartbeat"}));
        let change = record.update_identity(IdentityKind::Facebook, "fb").unwrap();
        assert_eq!(change.kind, IdentityKind::Facebook);
        assert_eq!(change.owner, None);

        // Sticky: second update is ignored
        assert!(record.update_identity(IdentityKind::Facebook, "other").is_none());
        assert_eq!(record.identities().get(IdentityKind::Facebook), "fb");
    }
}
