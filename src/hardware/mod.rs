// src/hardware/mod.rs - Byte channel to the bath controller board
pub mod serial;
pub mod stream;

pub use serial::SerialLink;
pub use stream::StreamLink;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to open serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out after {waited:?} waiting for {expected} bytes ({received} received)")]
    Timeout {
        expected: usize,
        received: usize,
        waited: Duration,
    },
    #[error("Device channel closed")]
    Closed,
}

/// Raw byte channel to the device.
///
/// A link is not meant to be shared: a protocol exchange spans several reads and
/// writes, so anything driving the same link from two tasks has to hold a lock
/// across the whole exchange.
#[async_trait]
pub trait DeviceLink: Send {
    /// Drop everything buffered in either direction.
    async fn flush(&mut self) -> Result<(), LinkError>;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Wait until exactly `n` bytes have arrived and return them.
    ///
    /// Fails with [`LinkError::Timeout`] once `timeout` elapses; bytes received so far
    /// stay buffered for the next call.
    async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Non-blocking check for pending input.
    ///
    /// `Ok(false)` means the channel is open and idle. A channel the peer has
    /// closed is [`LinkError::Closed`], never `Ok(false)`.
    async fn has_data(&mut self) -> Result<bool, LinkError>;
}

/// Input bytes pulled off the wire but not yet consumed by a `read_exact`.
#[derive(Debug, Default)]
pub(crate) struct RxBuffer {
    bytes: VecDeque<u8>,
}

impl RxBuffer {
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk.iter().copied());
    }

    /// Removes the first `n` bytes. Caller checks `len() >= n` first.
    pub(crate) fn take(&mut self, n: usize) -> Vec<u8> {
        self.bytes.drain(..n).collect()
    }

    /// Empties the buffer, returning how many bytes were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.bytes.len();
        self.bytes.clear();
        dropped
    }
}

/// Size of a single read off the port.
pub(crate) const READ_CHUNK: usize = 256;
