//! Event payloads flowing through the hub.
//!
//! The hub itself only ever handles [`Event`]: opaque bytes that are forwarded
//! verbatim from the ingress listener to every subscriber. [`DomainEvent`] is the
//! typed shape producers serialize before publishing; the hub never parses it.

mod domain;

pub use domain::DomainEvent;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// An immutable payload received on the ingress side.
#[derive(Debug, Clone)]
pub struct Event {
    payload: Bytes,
    is_text: bool,
    received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let is_text = std::str::from_utf8(&payload).is_ok();
        Self {
            payload,
            is_text,
            received_at: Utc::now(),
        }
    }

    /// Raw bytes exactly as the producer wrote them
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8, when it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }

    pub fn is_text(&self) -> bool {
        self.is_text
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
