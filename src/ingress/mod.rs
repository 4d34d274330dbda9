//! Internal ingress for trusted producers.
//!
//! Producers on the same host open a TCP connection, write one payload and
//! close. The listener forwards the exact bytes to the broadcaster queue and
//! never answers. Nothing here authenticates the producer: binding to a
//! loopback address is the trust boundary.

mod listener;
mod reader;

pub use listener::{IngressListener, IngressStats, IngressStatsSnapshot};
pub use reader::{read_payload, PayloadRead};
