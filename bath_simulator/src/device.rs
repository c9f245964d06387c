// bath_simulator/src/device.rs - Firmware side of the request/ACK protocol
use crate::physics::BathPhysics;
use bath_rs::protocol::{ControlByte, FRAME_LEN, checksum};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Faults injected on a fixed cadence. `Some(n)` hits every n-th occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultPlan {
    /// NAK the ready check of every n-th exchange.
    pub deny_every: Option<u32>,
    /// Send a bad checksum on every n-th temperature frame.
    pub corrupt_every: Option<u32>,
}

/// Counters reported when the host hangs up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub exchanges: u32,
    pub frames_sent: u32,
    pub frames_acknowledged: u32,
    pub corrupted: u32,
    pub denied: u32,
    pub element_commands: u32,
    pub rejected_commands: u32,
}

pub struct SimulatedDevice {
    physics: Arc<Mutex<BathPhysics>>,
    faults: FaultPlan,
    stats: DeviceStats,
}

fn hits(every: Option<u32>, count: u32) -> bool {
    matches!(every, Some(n) if n > 0 && count % n == 0)
}

impl SimulatedDevice {
    pub fn new(physics: Arc<Mutex<BathPhysics>>) -> Self {
        Self {
            physics,
            faults: FaultPlan::default(),
            stats: DeviceStats::default(),
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Answers the host until it closes its end of the stream.
    pub async fn serve<S>(mut self, mut stream: S) -> io::Result<DeviceStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let byte = match stream.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            match ControlByte::from_byte(byte) {
                Some(ControlByte::Ready) => {
                    if !self.exchange(&mut stream).await? {
                        break;
                    }
                }
                // Closing ACK after a temperature frame.
                Some(ControlByte::Accept) => self.stats.frames_acknowledged += 1,
                Some(ControlByte::EmergencyStop) => {
                    tracing::warn!("Emergency stop, element off");
                    self.physics.lock().await.cut_element();
                }
                _ => tracing::debug!("Ignoring stray byte 0x{:02X}", byte),
            }
        }
        tracing::info!("Host disconnected");
        Ok(self.stats)
    }

    /// Handles one exchange after ENQ. Returns false if the host hung up mid-exchange.
    async fn exchange<S>(&mut self, stream: &mut S) -> io::Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.stats.exchanges += 1;
        if hits(self.faults.deny_every, self.stats.exchanges) {
            self.stats.denied += 1;
            tracing::warn!("Denying exchange {}", self.stats.exchanges);
            stream.write_all(&[ControlByte::Deny.as_byte()]).await?;
            return Ok(true);
        }
        stream.write_all(&[ControlByte::Accept.as_byte()]).await?;

        let request = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };
        match ControlByte::from_byte(request) {
            Some(ControlByte::TemperatureRequest) => {
                stream.write_all(&[ControlByte::Accept.as_byte()]).await?;
                self.send_temperatures(stream).await?;
            }
            Some(ControlByte::SetElementRequest) => {
                stream.write_all(&[ControlByte::Accept.as_byte()]).await?;
                let mut frame = [0u8; FRAME_LEN];
                match stream.read_exact(&mut frame).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                    Err(e) => return Err(e),
                }
                self.apply_element_frame(stream, &frame).await?;
            }
            _ => {
                tracing::warn!("Unknown request 0x{:02X}", request);
                stream.write_all(&[ControlByte::Deny.as_byte()]).await?;
            }
        }
        Ok(true)
    }

    async fn send_temperatures<S>(&mut self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let reading = self.physics.lock().await.measure();
        let mut frame = reading.to_frame();
        self.stats.frames_sent += 1;
        if hits(self.faults.corrupt_every, self.stats.frames_sent) {
            self.stats.corrupted += 1;
            frame[FRAME_LEN - 1] = frame[FRAME_LEN - 1].wrapping_add(1);
            tracing::warn!("Corrupting temperature frame {}", self.stats.frames_sent);
        }
        stream.write_all(&frame).await
    }

    async fn apply_element_frame<S>(&mut self, stream: &mut S, frame: &[u8; FRAME_LEN]) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let value = [frame[0], frame[1], frame[2], frame[3]];
        if checksum::compute(&value) != frame[FRAME_LEN - 1] {
            self.stats.rejected_commands += 1;
            tracing::warn!("Element frame checksum mismatch, rejecting");
            return stream.write_all(&[ControlByte::Deny.as_byte()]).await;
        }
        let on_time_ms = u32::from_be_bytes(value);
        self.stats.element_commands += 1;
        self.physics.lock().await.energize(on_time_ms as f64 / 1000.0);
        tracing::debug!("Element on for {} ms", on_time_ms);
        stream.write_all(&[ControlByte::Accept.as_byte()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bath_rs::protocol::{HandshakePhase, StaleReason, TemperatureReading};
    use bath_rs::{ProtocolError, ProtocolSession, ReadOutcome, StreamLink, TuningParameters};
    use std::time::Duration;

    fn physics() -> Arc<Mutex<BathPhysics>> {
        let tuning = TuningParameters {
            mass: 0.5,
            ..Default::default()
        };
        let mut bath = BathPhysics::new(&tuning, 20.0, 3);
        bath.bath_c = 35.25;
        Arc::new(Mutex::new(bath))
    }

    #[tokio::test]
    async fn test_host_reads_and_commands_simulated_board() {
        let physics = physics();
        let (host, board) = tokio::io::duplex(1024);
        let device = tokio::spawn(SimulatedDevice::new(physics.clone()).serve(board));

        let mut session = ProtocolSession::new(StreamLink::new(host), Duration::from_secs(1));
        let outcome = session.read_temperatures().await.unwrap();
        assert_eq!(
            outcome,
            ReadOutcome::Reading(TemperatureReading {
                environment: 20.0,
                bath: 35.25
            })
        );
        session.set_element_time(4500).await.unwrap();
        assert!((physics.lock().await.element_remaining() - 4.5).abs() < 1e-9);

        drop(session);
        let stats = device.await.unwrap().unwrap();
        assert_eq!(stats.exchanges, 2);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_acknowledged, 1);
        assert_eq!(stats.element_commands, 1);
    }

    #[tokio::test]
    async fn test_corrupted_frame_reads_stale() {
        let (host, board) = tokio::io::duplex(1024);
        let faults = FaultPlan {
            corrupt_every: Some(1),
            ..Default::default()
        };
        let device = tokio::spawn(SimulatedDevice::new(physics()).with_faults(faults).serve(board));

        let mut session = ProtocolSession::new(StreamLink::new(host), Duration::from_secs(1));
        let outcome = session.read_temperatures().await.unwrap();
        assert!(matches!(
            outcome,
            ReadOutcome::Stale(StaleReason::ChecksumMismatch { .. })
        ));

        drop(session);
        let stats = device.await.unwrap().unwrap();
        assert_eq!(stats.corrupted, 1);
        assert_eq!(stats.frames_acknowledged, 0);
    }

    #[tokio::test]
    async fn test_denied_exchange_reaches_host() {
        let (host, board) = tokio::io::duplex(1024);
        let faults = FaultPlan {
            deny_every: Some(2),
            ..Default::default()
        };
        tokio::spawn(SimulatedDevice::new(physics()).with_faults(faults).serve(board));

        let mut session = ProtocolSession::new(StreamLink::new(host), Duration::from_secs(1));
        session.read_temperatures().await.unwrap();
        let err = session.set_element_time(1000).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::HandshakeDenied {
                phase: HandshakePhase::Ready,
                ..
            }
        ));
    }

    #[test]
    fn test_fault_cadence() {
        assert!(!hits(None, 3));
        assert!(!hits(Some(0), 3));
        assert!(hits(Some(3), 3));
        assert!(hits(Some(3), 6));
        assert!(!hits(Some(3), 4));
    }
}
