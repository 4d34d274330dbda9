use crate::event::Event;

/// WebSocket close code sent when the hub is going away (RFC 6455 §7.4.1)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frames queued for a single subscriber connection.
///
/// The hub never wraps event payloads: `Event` frames carry the ingress bytes
/// unchanged. The other variants are transport-level control frames.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Event(Event),
    Ping,
    Close { code: u16, reason: String },
}

impl OutboundFrame {
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::Close {
            code: CLOSE_GOING_AWAY,
            reason: reason.into(),
        }
    }

    /// Label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Ping => "ping",
            Self::Close { .. } => "close",
        }
    }
}
