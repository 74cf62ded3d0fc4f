//! Event payload builders
//!
//! Every event is a flat JSON object with a `type` tag. Timestamped events
//! carry `timestamp` formatted as `YYYY-MM-DD HH:MM:SS` in UTC.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::platform::PlatformDescriptor;

pub const REVENUE: &str = "revenue";
pub const HEARTBEAT: &str = "heartbeat";
pub const ITEM_PURCHASE: &str = "item_purchase";
pub const TUTORIAL: &str = "tutorial";
pub const MILESTONE: &str = "milestone";
pub const MARKETING: &str = "marketing";
pub const USER_ATTRIBUTE: &str = "user_attribute";
pub const COUNTRY: &str = "country";
pub const PLATFORM: &str = "platform";

/// Format used for the `timestamp` field.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Start an event of `event_type`, optionally stamped with the current time.
fn create(event_type: &str, timestamped: bool) -> Map<String, Value> {
    let mut event = Map::new();
    event.insert("type".to_string(), Value::String(event_type.to_string()));
    if timestamped {
        event.insert(
            "timestamp".to_string(),
            Value::String(format_timestamp(Utc::now())),
        );
    }
    event
}

/// Insert a string field unless it is empty.
fn put_field(event: &mut Map<String, Value>, name: &str, value: &str) {
    if !value.is_empty() {
        event.insert(name.to_string(), Value::String(value.to_string()));
    }
}

pub fn revenue(amount: f64, currency: &str, reward: Option<&str>) -> Value {
    let mut event = create(REVENUE, true);
    event.insert("amount".to_string(), json!(amount));
    event.insert("currency".to_string(), json!(currency));
    if let Some(reward) = reward {
        event.insert("reward".to_string(), json!(reward));
    }
    Value::Object(event)
}

pub fn revenue_with_virtual_currency(
    amount: f64,
    currency: &str,
    vc_amount: f64,
    reward: Option<&str>,
) -> Value {
    let mut event = create(REVENUE, true);
    event.insert("amount".to_string(), json!(amount));
    event.insert("currency".to_string(), json!(currency));
    event.insert("vc_amount".to_string(), json!(vc_amount));
    if let Some(reward) = reward {
        event.insert("reward".to_string(), json!(reward));
    }
    Value::Object(event)
}

pub fn item_purchase(name: &str, vc_amount: Option<f64>) -> Value {
    let mut event = create(ITEM_PURCHASE, true);
    event.insert("name".to_string(), json!(name));
    if let Some(vc_amount) = vc_amount {
        event.insert("vc_amount".to_string(), json!(vc_amount));
    }
    Value::Object(event)
}

pub fn tutorial(step: &str) -> Value {
    let mut event = create(TUTORIAL, true);
    event.insert("step".to_string(), json!(step));
    Value::Object(event)
}

pub fn milestone(name: &str, value: &str) -> Value {
    let mut event = create(MILESTONE, true);
    event.insert("name".to_string(), json!(name));
    event.insert("value".to_string(), json!(value));
    Value::Object(event)
}

/// Attribution data; empty parameters are left out.
pub fn marketing(partner: &str, campaign: &str, ad: &str, subid: &str, subsubid: &str) -> Value {
    let mut event = create(MARKETING, false);
    put_field(&mut event, "partner", partner);
    put_field(&mut event, "campaign", campaign);
    put_field(&mut event, "ad", ad);
    put_field(&mut event, "subid", subid);
    put_field(&mut event, "subsubid", subsubid);
    Value::Object(event)
}

pub fn user_attribute(name: &str, value: &str) -> Value {
    let mut event = create(USER_ATTRIBUTE, false);
    event.insert("name".to_string(), json!(name));
    event.insert("value".to_string(), json!(value));
    Value::Object(event)
}

pub fn country(country: &str) -> Value {
    let mut event = create(COUNTRY, false);
    event.insert("value".to_string(), json!(country));
    Value::Object(event)
}

pub fn heartbeat(payable: bool) -> Value {
    let mut event = create(HEARTBEAT, true);
    event.insert("is_payable".to_string(), json!(payable));
    Value::Object(event)
}

/// One-time description of the host.
pub fn platform(descriptor: &PlatformDescriptor) -> Value {
    let mut event = create(PLATFORM, false);
    put_field(&mut event, "manufacturer", &descriptor.manufacturer);
    put_field(&mut event, "device_model", &descriptor.model);
    put_field(&mut event, "os_name", &descriptor.os_name);
    put_field(&mut event, "os_version", &descriptor.os_version);
    put_field(&mut event, "arch", &descriptor.arch);
    put_field(&mut event, "locale", &descriptor.locale);
    Value::Object(event)
}
