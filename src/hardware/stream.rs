// src/hardware/stream.rs - Device link over any async byte stream
use super::{DeviceLink, LinkError, READ_CHUNK, RxBuffer};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};

/// Adapts an in-memory or socket stream to [`DeviceLink`].
///
/// `flush` can only drop what this side has buffered; there is no OS queue to discard.
#[derive(Debug)]
pub struct StreamLink<S> {
    stream: S,
    rx: RxBuffer,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rx: RxBuffer::default(),
        }
    }

    async fn fill(&mut self) -> Result<usize, LinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(LinkError::Closed);
        }
        self.rx.extend(&chunk[..n]);
        Ok(n)
    }
}

#[async_trait]
impl<S> DeviceLink for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn flush(&mut self) -> Result<(), LinkError> {
        let dropped = self.rx.clear();
        if dropped > 0 {
            tracing::debug!("Discarded {} stale bytes", dropped);
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        tracing::debug!("Stream TX {:02X?}", bytes);
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + timeout;
        while self.rx.len() < n {
            let filled = timeout_at(deadline, self.fill()).await;
            match filled {
                Ok(result) => {
                    result?;
                }
                Err(_) => {
                    return Err(LinkError::Timeout {
                        expected: n,
                        received: self.rx.len(),
                        waited: timeout,
                    });
                }
            }
        }
        Ok(self.rx.take(n))
    }

    async fn has_data(&mut self) -> Result<bool, LinkError> {
        if !self.rx.is_empty() {
            return Ok(true);
        }
        let polled = tokio::time::timeout(Duration::ZERO, self.fill()).await;
        match polled {
            Ok(result) => result.map(|n| n > 0),
            Err(_) => Ok(false),
        }
    }
}
