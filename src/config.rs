//! # Bath Controller Configuration
//!
//! Serial connection, physical tuning of the bath, and control-loop timing.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB1"
//! baud = 115200
//!
//! [tuning]
//! heat_capacity = 1.0
//! mass = 0.5
//! emissivity = 0.95
//! area = 0.05
//! resistance = 10.0
//! voltage = 24.0
//! p = 1.0
//! i = 0.0
//! d = 0.0
//!
//! [control]
//! target = 60.0
//! ```
//!
//! Every `[control]` key and the `[connection]` timing keys have defaults.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub tuning: TuningParameters,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Serial link to the controller board.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Upper bound on any single wait for a device reply.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause after opening the port while the board resets.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: "".to_string(),
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Physical description of the bath plus raw PID gains.
///
/// Read fresh every control cycle, so edits between cycles take effect immediately.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TuningParameters {
    /// Specific heat of the medium, cal·g⁻¹·°C⁻¹.
    pub heat_capacity: f64,
    /// Medium mass, kg.
    pub mass: f64,
    pub emissivity: f64,
    /// Radiating surface, m².
    pub area: f64,
    /// Element resistance, Ω.
    pub resistance: f64,
    /// Element supply voltage, V.
    pub voltage: f64,
    /// Raw gains as entered; the gain schedule scales them before use.
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            heat_capacity: 1.0,
            mass: 1.0,
            emissivity: 0.95,
            area: 0.05,
            resistance: 10.0,
            voltage: 24.0,
            p: 1.0,
            i: 0.0,
            d: 0.0,
        }
    }
}

impl TuningParameters {
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("heat_capacity", self.heat_capacity),
            ("mass", self.mass),
            ("emissivity", self.emissivity),
            ("area", self.area),
            ("resistance", self.resistance),
            ("voltage", self.voltage),
            ("p", self.p),
            ("i", self.i),
            ("d", self.d),
        ];
        for (name, value) in all {
            if !value.is_finite() {
                return Err(format!("Tuning '{}' must be a finite number (got {})", name, value));
            }
        }
        let positive = [
            ("heat_capacity", self.heat_capacity),
            ("mass", self.mass),
            ("resistance", self.resistance),
            ("voltage", self.voltage),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(format!("Tuning '{}' must be > 0 (got {})", name, value));
            }
        }
        if !(0.0..=1.0).contains(&self.emissivity) {
            return Err(format!("Tuning 'emissivity' must be between 0 and 1 (got {})", self.emissivity));
        }
        if self.area < 0.0 {
            return Err(format!("Tuning 'area' must be >= 0 (got {})", self.area));
        }
        Ok(())
    }
}

/// Control loop timing and policy selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Wall-clock seconds between control decisions while heating.
    #[serde(default = "default_cycle_period_secs")]
    pub cycle_period_secs: f64,
    /// Seconds between temperature polls while idle.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: f64,
    /// Longest element on-time ever commanded.
    #[serde(default = "default_max_on_time_ms")]
    pub max_on_time_ms: u32,
    /// Raw P/I/D are divided by this before reaching the PID.
    #[serde(default = "default_gain_divisor")]
    pub gain_divisor: f64,
    /// Add radiated power to the deficit each cycle.
    #[serde(default)]
    pub radiative_compensation: bool,
    /// Heat toward this temperature as soon as the loop starts.
    #[serde(default)]
    pub target: Option<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_period_secs: default_cycle_period_secs(),
            idle_poll_secs: default_idle_poll_secs(),
            max_on_time_ms: default_max_on_time_ms(),
            gain_divisor: default_gain_divisor(),
            radiative_compensation: false,
            target: None,
        }
    }
}

impl ControlConfig {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_period_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs_f64(self.idle_poll_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.cycle_period_secs > 0.0) {
            return Err("Control 'cycle_period_secs' must be > 0".to_string());
        }
        if !(self.idle_poll_secs > 0.0) {
            return Err("Control 'idle_poll_secs' must be > 0".to_string());
        }
        if !(self.gain_divisor > 0.0) {
            return Err("Control 'gain_divisor' must be > 0".to_string());
        }
        if self.max_on_time_ms == 0 {
            return Err("Control 'max_on_time_ms' must be > 0".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tuning.validate().map_err(ConfigError::Invalid)?;
        self.control.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

fn default_baud() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 5000 }
fn default_settle_delay_ms() -> u64 { 3000 }
fn default_cycle_period_secs() -> f64 { 10.0 }
fn default_idle_poll_secs() -> f64 { 5.0 }
fn default_max_on_time_ms() -> u32 { 10000 }
fn default_gain_divisor() -> f64 { 1000.0 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_timing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.connection.baud, 115200);
        assert_eq!(config.connection.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.control.cycle_period(), Duration::from_secs(10));
        assert_eq!(config.control.idle_poll(), Duration::from_secs(5));
        assert_eq!(config.control.max_on_time_ms, 10000);
        assert!(!config.control.radiative_compensation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tuning_section_parses() {
        let toml_str = r#"
            [connection]
            port = "/dev/ttyUSB1"

            [tuning]
            heat_capacity = 1.0
            mass = 0.5
            emissivity = 0.9
            area = 0.02
            resistance = 10.0
            voltage = 24.0
            p = 2.0
            i = 0.5
            d = 0.1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB1");
        assert_eq!(config.tuning.mass, 0.5);
        assert_eq!(config.tuning.d, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_physical_tuning() {
        let mut config = Config::default();
        config.tuning.resistance = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.tuning.emissivity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tuning.mass = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tuning.voltage = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tuning.i = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_control_timing() {
        let mut config = Config::default();
        config.control.cycle_period_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.gain_divisor = -1.0;
        assert!(config.validate().is_err());
    }
}
