//! Event fan-out to every registered subscriber.
//!
//! The ingress listener pushes events into a single queue and exactly one
//! broadcaster task drains it, so every subscriber sees events in the order
//! they were received.

mod broadcaster;

pub use broadcaster::{
    event_queue, Broadcaster, BroadcasterStatsSnapshot, DeliveryResult, EventReceiver, EventSender,
};
