//! Identity kinds and identity sets
//!
//! Every queued event carries a snapshot of the identities known when it was
//! tracked. The snapshot is a plain value: cloning an [`IdentitySet`] yields an
//! independent copy.
//!
//! | Kind | Class | Meaning |
//! |------|-------|---------|
//! | `Custom`, `Facebook`, `Twitter`, `GooglePlus`, `Sdk` | sticky | once set on a record, later updates are ignored |
//! | `Advertising`, `AdTracking` | normal | always overwritten |
//! | `DeviceId`, `DeviceSerial` | computed | read from the host once per process, never stored |

use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Number of identity kinds.
pub const KIND_COUNT: usize = 9;

/// Kind of identity attached to events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Custom,
    Facebook,
    Twitter,
    GooglePlus,
    Sdk,
    Advertising,
    AdTracking,
    DeviceId,
    DeviceSerial,
}

impl IdentityKind {
    pub const ALL: [IdentityKind; KIND_COUNT] = [
        IdentityKind::Custom,
        IdentityKind::Facebook,
        IdentityKind::Twitter,
        IdentityKind::GooglePlus,
        IdentityKind::Sdk,
        IdentityKind::Advertising,
        IdentityKind::AdTracking,
        IdentityKind::DeviceId,
        IdentityKind::DeviceSerial,
    ];

    /// Stable id used by the persisted queue format.
    pub fn id(&self) -> u8 {
        match self {
            IdentityKind::Custom => 0,
            IdentityKind::Facebook => 1,
            IdentityKind::Twitter => 2,
            IdentityKind::GooglePlus => 3,
            IdentityKind::Sdk => 4,
            IdentityKind::Advertising => 5,
            IdentityKind::AdTracking => 6,
            IdentityKind::DeviceId => 7,
            IdentityKind::DeviceSerial => 8,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Field name used in the `identifiers` object on the wire.
    pub fn json_name(&self) -> &'static str {
        match self {
            IdentityKind::Custom => "custom_user_id",
            IdentityKind::Facebook => "facebook_user_id",
            IdentityKind::Twitter => "twitter_user_id",
            IdentityKind::GooglePlus => "google_plus_user_id",
            IdentityKind::Sdk => "sdk_id",
            IdentityKind::Advertising => "advertiser_id",
            IdentityKind::AdTracking => "ad_tracking",
            IdentityKind::DeviceId => "device_id",
            IdentityKind::DeviceSerial => "device_serial",
        }
    }

    /// Sticky kinds keep their first non-empty value on queued records.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            IdentityKind::Custom
                | IdentityKind::Facebook
                | IdentityKind::Twitter
                | IdentityKind::GooglePlus
                | IdentityKind::Sdk
        )
    }

    /// Computed kinds come from the host and are never stored.
    pub fn is_computed(&self) -> bool {
        matches!(self, IdentityKind::DeviceId | IdentityKind::DeviceSerial)
    }

    fn index(&self) -> usize {
        usize::from(self.id())
    }
}

/// Identity values for every kind; missing values are `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    values: [String; KIND_COUNT],
}

impl IdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for a kind, resolving computed kinds from the host.
    pub fn get(&self, kind: IdentityKind) -> &str {
        if kind.is_computed() {
            device_identity().get(kind)
        } else {
            &self.values[kind.index()]
        }
    }

    /// Overwrite the value for a kind. Computed kinds are ignored.
    pub fn set(&mut self, kind: IdentityKind, value: impl Into<String>) {
        if !kind.is_computed() {
            self.values[kind.index()] = value.into();
        }
    }

    /// Apply a producer-side update to a queued snapshot.
    ///
    /// Sticky kinds that already hold a value are left alone. Returns `true`
    /// when the stored value actually changed.
    pub fn update(&mut self, kind: IdentityKind, value: &str) -> bool {
        if kind.is_computed() {
            return false;
        }
        let current = &self.values[kind.index()];
        if kind.is_sticky() && !current.is_empty() {
            return false;
        }
        if current == value {
            return false;
        }
        self.values[kind.index()] = value.to_string();
        true
    }

    /// Stored (non-computed) kinds with non-empty values, in kind order.
    pub fn stored(&self) -> impl Iterator<Item = (IdentityKind, &str)> + '_ {
        IdentityKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_computed())
            .map(move |kind| (kind, self.values[kind.index()].as_str()))
            .filter(|(_, value)| !value.is_empty())
    }

    /// The `identifiers` JSON object (non-empty values only).
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for kind in IdentityKind::ALL {
            let value = self.get(kind);
            if !value.is_empty() {
                map.insert(kind.json_name().to_string(), Value::String(value.to_string()));
            }
        }
        Value::Object(map)
    }
}

/// Host-derived identities, resolved on first use.
#[derive(Debug, Default)]
struct DeviceIdentity {
    device_id: String,
    device_serial: String,
}

impl DeviceIdentity {
    fn get(&self, kind: IdentityKind) -> &str {
        match kind {
            IdentityKind::DeviceId => &self.device_id,
            IdentityKind::DeviceSerial => &self.device_serial,
            _ => "",
        }
    }
}

static DEVICE_IDENTITY: OnceLock<DeviceIdentity> = OnceLock::new();

fn device_identity() -> &'static DeviceIdentity {
    DEVICE_IDENTITY.get_or_init(|| {
        let identity = DeviceIdentity {
            device_id: read_trimmed(&["/etc/machine-id", "/var/lib/dbus/machine-id"]),
            device_serial: read_trimmed(&["/sys/class/dmi/id/product_serial"]),
        };
        tracing::debug!(
            has_device_id = !identity.device_id.is_empty(),
            has_device_serial = !identity.device_serial.is_empty(),
            "Resolved device identity"
        );
        identity
    })
}

/// First readable, non-empty file among `paths`, trimmed; `""` otherwise.
fn read_trimmed(paths: &[&str]) -> String {
    paths
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|content| content.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Resolve computed identities now instead of on first serialization.
pub fn resolve_device_identity() {
    let _ = device_identity();
}
