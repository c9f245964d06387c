// src/lib.rs - Bath heater control: device protocol, thermal model and control loop
pub mod config;
pub mod control;
pub mod hardware;
pub mod protocol;
pub mod state;

pub use config::{Config, ConfigError, TuningParameters, load_config};
pub use control::{ControlError, ControlLoop, CycleReport, StepOutcome};
pub use hardware::{DeviceLink, LinkError, SerialLink, StreamLink};
pub use protocol::{ProtocolError, ProtocolSession, ReadOutcome, TemperatureReading};
pub use state::{BathState, SessionStatus, SharedState};
