// src/protocol/mod.rs - Request/ACK exchanges with the bath controller board
pub mod checksum;

use crate::hardware::{DeviceLink, LinkError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Fixed width of every payload frame in either direction, checksum included.
pub const FRAME_LEN: usize = 64;

/// Bytes of an element-time frame carrying the on-time value.
pub const ELEMENT_PAYLOAD_LEN: usize = 4;

/// Zero filler between the on-time value and the checksum.
pub const ELEMENT_FILLER_LEN: usize = FRAME_LEN - ELEMENT_PAYLOAD_LEN - 1;

/// Temperatures travel as hundredths of a degree.
const TEMPERATURE_SCALE: f64 = 100.0;

/// Highest temperature a frame can carry, °C.
pub const MAX_FRAME_TEMPERATURE: f64 = u16::MAX as f64 / TEMPERATURE_SCALE;

/// Single-byte control codes (ASCII control characters on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlByte {
    /// ENQ
    Ready = 0x05,
    /// ACK
    Accept = 0x06,
    /// DC1
    TemperatureRequest = 0x11,
    /// DC2
    SetElementRequest = 0x12,
    /// NAK
    Deny = 0x15,
    /// CAN. Understood by the firmware; the control loop never sends it.
    EmergencyStop = 0x18,
}

impl ControlByte {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x05 => Some(Self::Ready),
            0x06 => Some(Self::Accept),
            0x11 => Some(Self::TemperatureRequest),
            0x12 => Some(Self::SetElementRequest),
            0x15 => Some(Self::Deny),
            0x18 => Some(Self::EmergencyStop),
            _ => None,
        }
    }
}

/// Where in an exchange the device refused to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Ready,
    Request(ControlByte),
    Payload,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::Ready => write!(f, "ready check"),
            HandshakePhase::Request(code) => write!(f, "{:?} request", code),
            HandshakePhase::Payload => write!(f, "payload acknowledgement"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Device denied {phase} (replied 0x{reply:02X})")]
    HandshakeDenied { phase: HandshakePhase, reply: u8 },
    #[error("Device stopped responding: {0}")]
    Timeout(LinkError),
    #[error("Link error: {0}")]
    Link(LinkError),
    #[error("Link returned {received} bytes for a {expected}-byte frame")]
    FrameLength { expected: usize, received: usize },
}

impl From<LinkError> for ProtocolError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Timeout { .. } => ProtocolError::Timeout(err),
            other => ProtocolError::Link(other),
        }
    }
}

/// One decoded temperature frame, degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub environment: f64,
    pub bath: f64,
}

impl TemperatureReading {
    /// Decodes the two big-endian hundredths-of-a-degree words at the head of a frame.
    pub fn from_frame(frame: &[u8; FRAME_LEN]) -> Self {
        let environment = u16::from_be_bytes([frame[0], frame[1]]) as f64 / TEMPERATURE_SCALE;
        let bath = u16::from_be_bytes([frame[2], frame[3]]) as f64 / TEMPERATURE_SCALE;
        Self { environment, bath }
    }

    /// Builds the 64-byte frame the board would send for these temperatures.
    ///
    /// Values outside 0..=655.35 °C are clamped to that range; NaN encodes as 0.
    pub fn to_frame(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        let env = encode_temperature(self.environment);
        let bath = encode_temperature(self.bath);
        frame[0..2].copy_from_slice(&env.to_be_bytes());
        frame[2..4].copy_from_slice(&bath.to_be_bytes());
        frame[FRAME_LEN - 1] = checksum::compute(&frame[..FRAME_LEN - 1]);
        frame
    }
}

fn encode_temperature(celsius: f64) -> u16 {
    if celsius.is_nan() {
        return 0;
    }
    (celsius.clamp(0.0, MAX_FRAME_TEMPERATURE) * TEMPERATURE_SCALE).round() as u16
}

/// Why a read produced nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    ChecksumMismatch { expected: u8, received: u8 },
    /// The board zeroes a temperature it has not sampled yet.
    ZeroReading,
}

/// Result of a temperature exchange that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadOutcome {
    Reading(TemperatureReading),
    Stale(StaleReason),
}

/// Builds the fixed-width element-time frame: 4 big-endian bytes, zero filler,
/// checksum of the 4 value bytes.
pub fn element_frame(on_time_ms: u32) -> [u8; FRAME_LEN] {
    let value = on_time_ms.to_be_bytes();
    let mut frame = [0u8; FRAME_LEN];
    frame[..ELEMENT_PAYLOAD_LEN].copy_from_slice(&value);
    frame[FRAME_LEN - 1] = checksum::compute(&value);
    frame
}

/// Drives the two exchanges the board supports over a [`DeviceLink`].
///
/// Exchanges borrow the session mutably, so two of them can never interleave on
/// one link. Share a session between tasks only behind a lock held for the
/// whole call.
pub struct ProtocolSession<L> {
    link: L,
    reply_timeout: Duration,
}

impl<L: DeviceLink> ProtocolSession<L> {
    pub fn new(link: L, reply_timeout: Duration) -> Self {
        Self {
            link,
            reply_timeout,
        }
    }

    /// Direct access to the link between exchanges.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Ready check, temperature request, then the 64-byte temperature frame.
    ///
    /// A frame failing its checksum is reported as [`ReadOutcome::Stale`] and left
    /// unacknowledged; only a good frame gets the closing ACK.
    pub async fn read_temperatures(&mut self) -> Result<ReadOutcome, ProtocolError> {
        self.handshake(ControlByte::TemperatureRequest).await?;

        let bytes = self.link.read_exact(FRAME_LEN, self.reply_timeout).await?;
        let frame: [u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| ProtocolError::FrameLength {
                expected: FRAME_LEN,
                received: bytes.len(),
            })?;
        if !checksum::verify(&frame) {
            let expected = checksum::compute(&frame[..FRAME_LEN - 1]);
            let received = frame[FRAME_LEN - 1];
            tracing::warn!(
                "Temperature frame checksum mismatch (expected 0x{:02X}, got 0x{:02X}): {:02X?}",
                expected,
                received,
                frame
            );
            return Ok(ReadOutcome::Stale(StaleReason::ChecksumMismatch { expected, received }));
        }

        let reading = TemperatureReading::from_frame(&frame);
        self.link.write(&[ControlByte::Accept.as_byte()]).await?;
        tracing::debug!(
            "Temperatures: environment {:.2}°C, bath {:.2}°C",
            reading.environment,
            reading.bath
        );

        if reading.environment == 0.0 || reading.bath == 0.0 {
            return Ok(ReadOutcome::Stale(StaleReason::ZeroReading));
        }
        Ok(ReadOutcome::Reading(reading))
    }

    /// Ready check, element request, then the element-time frame.
    pub async fn set_element_time(&mut self, on_time_ms: u32) -> Result<(), ProtocolError> {
        self.handshake(ControlByte::SetElementRequest).await?;

        let frame = element_frame(on_time_ms);
        self.link.write(&frame).await?;
        self.expect_accept(HandshakePhase::Payload).await?;
        tracing::debug!("Element on-time {} ms accepted", on_time_ms);
        Ok(())
    }

    async fn handshake(&mut self, request: ControlByte) -> Result<(), ProtocolError> {
        self.link.flush().await?;
        self.link.write(&[ControlByte::Ready.as_byte()]).await?;
        self.expect_accept(HandshakePhase::Ready).await?;
        self.link.write(&[request.as_byte()]).await?;
        self.expect_accept(HandshakePhase::Request(request)).await
    }

    async fn expect_accept(&mut self, phase: HandshakePhase) -> Result<(), ProtocolError> {
        let reply = self.link.read_exact(1, self.reply_timeout).await?[0];
        if reply != ControlByte::Accept.as_byte() {
            tracing::error!("Device denied {} (reply 0x{:02X})", phase, reply);
            return Err(ProtocolError::HandshakeDenied { phase, reply });
        }
        Ok(())
    }
}

impl<L> fmt::Debug for ProtocolSession<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}
