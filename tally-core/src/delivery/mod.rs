//! Delivery of queued events to the collector
//!
//! This module provides:
//! - HMAC request signing
//! - Response interpretation
//! - A blocking channel with send timeout and cooperative cancellation

mod cancel;
mod channel;
mod response;
mod signing;

pub use cancel::CancelSignal;
pub use channel::{DeliveryChannel, SendOptions, SDK_TYPE};
pub use response::{interpret, DeliveryResponse, INVALID_BODY_CODE};
pub use signing::{sanitize_key, sign};
