//! Consumer client for the share message bus.
//!
//! The broker speaks a one-line handshake followed by binary frames: a
//! consumer sends `SUB <topic> <group>\n` after connecting, then reads
//! frames of a `u32` little-endian length prefix plus payload, one bus
//! message per frame. Consumers in different groups each see the full
//! stream, so the live and writer pipelines subscribe independently.
//!
//! The client keeps a persistent connection and reconnects with exponential
//! backoff. Once the broker stays unreachable past the bounded retry
//! attempts the error is surfaced so the calling loop can exit and let
//! supervision restart the service.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Upper bound on a single frame; anything larger is a broker fault.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

const RECONNECT_MIN_MS: u64 = 100;
const RECONNECT_MAX_MS: u64 = 5_000;
const MAX_CONNECT_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("bus i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("bus frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    Oversized(usize),
}

pub struct BusConsumer {
    address: String,
    topic: String,
    group: String,
    stream: Option<BufReader<TcpStream>>,
    backoff_min_ms: u64,
    backoff_max_ms: u64,
    max_attempts: u32,
}

impl BusConsumer {
    pub fn new(
        address: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            topic: topic.into(),
            group: group.into(),
            stream: None,
            backoff_min_ms: RECONNECT_MIN_MS,
            backoff_max_ms: RECONNECT_MAX_MS,
            max_attempts: MAX_CONNECT_ATTEMPTS,
        }
    }

    /// Override the reconnect policy (mainly for tests).
    pub fn with_backoff(mut self, min_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        self.backoff_min_ms = min_ms;
        self.backoff_max_ms = max_ms.max(min_ms);
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Receive the next message payload, connecting or reconnecting as
    /// needed. Errors only once the broker is considered gone.
    pub async fn recv(&mut self) -> Result<Vec<u8>, BusError> {
        loop {
            if self.stream.is_none() {
                self.stream = Some(self.connect().await?);
            }
            let result = match self.stream.as_mut() {
                Some(stream) => read_frame(stream).await,
                None => continue,
            };
            match result {
                Ok(payload) => return Ok(payload),
                Err(BusError::Oversized(len)) => return Err(BusError::Oversized(len)),
                Err(e) => {
                    warn!("bus read failed, reconnecting: {e}");
                    self.stream = None;
                    tokio::time::sleep(Duration::from_millis(self.backoff_min_ms)).await;
                }
            }
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>, BusError> {
        let mut backoff = self.backoff_min_ms;
        let mut attempts = 0;
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(mut stream) => {
                    let subscribe = format!("SUB {} {}\n", self.topic, self.group);
                    stream.write_all(subscribe.as_bytes()).await?;
                    stream.flush().await?;
                    debug!(
                        "subscribed to {} as group {} via {}",
                        self.topic, self.group, self.address
                    );
                    return Ok(BufReader::new(stream));
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(BusError::Unreachable {
                            attempts,
                            source: e,
                        });
                    }
                    warn!("broker connect failed ({e}), retrying in {backoff} ms");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(self.backoff_max_ms);
                }
            }
        }
    }
}

async fn read_frame(stream: &mut BufReader<TcpStream>) -> Result<Vec<u8>, BusError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(BusError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}
