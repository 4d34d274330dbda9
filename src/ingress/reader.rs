use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// What a producer connection yielded
#[derive(Debug)]
pub enum PayloadRead {
    /// Peer closed after writing at least one byte
    Complete(Bytes),
    /// Peer closed without writing anything
    Empty,
    /// The deadline passed before the peer closed; partial bytes are discarded
    TimedOut { received: usize },
    /// The payload exceeded the configured limit
    TooLarge { limit: usize },
    /// Reset or other I/O failure
    Failed(std::io::Error),
}

impl PayloadRead {
    /// Label used for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Complete(_) => "forwarded",
            Self::Empty => "empty",
            Self::TimedOut { .. } => "timed_out",
            Self::TooLarge { .. } => "too_large",
            Self::Failed(_) => "failed",
        }
    }
}

/// Read until EOF, bounded by `deadline` and `max_bytes`
pub async fn read_payload<R>(reader: &mut R, deadline: Duration, max_bytes: usize) -> PayloadRead
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    // One byte past the limit tells "exactly at the limit" from "over it"
    let mut limited = reader.take((max_bytes as u64).saturating_add(1));
    let result = timeout(deadline, limited.read_to_end(&mut buf)).await;

    match result {
        Ok(Ok(_)) if buf.len() > max_bytes => PayloadRead::TooLarge { limit: max_bytes },
        Ok(Ok(0)) => PayloadRead::Empty,
        Ok(Ok(_)) => PayloadRead::Complete(Bytes::from(buf)),
        Ok(Err(e)) => PayloadRead::Failed(e),
        Err(_) => PayloadRead::TimedOut {
            received: buf.len(),
        },
    }
}
