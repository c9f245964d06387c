// src/hardware/serial.rs - serial2-tokio backed device link
use super::{DeviceLink, LinkError, READ_CHUNK, RxBuffer};
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Device link over a real serial port.
pub struct SerialLink {
    port: SerialPort,
    port_name: String,
    rx: RxBuffer,
}

impl SerialLink {
    /// Open `port_name` at `baud`. Must be called from inside a tokio runtime.
    pub fn open(port_name: &str, baud: u32) -> Result<Self, LinkError> {
        tracing::info!("Opening {} at {} baud", port_name, baud);
        let port = SerialPort::open(port_name, baud).map_err(|source| LinkError::Open {
            port: port_name.to_string(),
            source,
        })?;
        Ok(Self {
            port,
            port_name: port_name.to_string(),
            rx: RxBuffer::default(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Serial ports the OS currently reports.
    pub fn available_ports() -> Vec<String> {
        match SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                tracing::warn!("Could not enumerate serial ports: {}", e);
                vec![]
            }
        }
    }

    async fn fill(&mut self) -> Result<usize, LinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.port.read(&mut chunk).await?;
        if n == 0 {
            return Err(LinkError::Closed);
        }
        tracing::trace!("Serial RX {} bytes", n);
        self.rx.extend(&chunk[..n]);
        Ok(n)
    }
}

#[async_trait]
impl DeviceLink for SerialLink {
    async fn flush(&mut self) -> Result<(), LinkError> {
        let dropped = self.rx.clear();
        if dropped > 0 {
            tracing::debug!("Discarded {} stale bytes from {}", dropped, self.port_name);
        }
        self.port.discard_buffers()?;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        tracing::debug!("Serial TX {:02X?}", bytes);
        self.port.write_all(bytes).await?;
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

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port_name", &self.port_name)
            .field("buffered", &self.rx.len())
            .finish()
    }
}
