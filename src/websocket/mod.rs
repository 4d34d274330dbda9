mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{OutboundFrame, CLOSE_GOING_AWAY};
