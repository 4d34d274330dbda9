//! Reconnecting subscriber client.
//!
//! Mirrors what a browser page does against the hub: open a WebSocket,
//! hand every payload to the caller, and when the connection drops wait a
//! bit and connect again.

mod backoff;
mod client;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use client::{Subscriber, SubscriberConfig, SubscriberStats};
