// src/control/policy.rs - Pluggable gain scheduling and loss compensation
use super::pid::PidGains;
use super::thermal;
use crate::config::TuningParameters;

/// Maps the operator's raw gains to the gains the PID runs with this cycle.
pub trait GainSchedule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `deficit` is this cycle's energy deficit, `initial_deficit` the one seen on the
    /// first cycle of the heating session.
    fn gains(&self, tuning: &TuningParameters, deficit: f64, initial_deficit: f64) -> PidGains;
}

/// One set of gains for the whole session: raw values over a fixed divisor.
#[derive(Debug, Clone, Copy)]
pub struct SingleStage {
    pub divisor: f64,
}

impl SingleStage {
    pub fn new(divisor: f64) -> Self {
        Self { divisor }
    }
}

impl GainSchedule for SingleStage {
    fn name(&self) -> &'static str {
        "single stage"
    }

    fn gains(&self, tuning: &TuningParameters, _deficit: f64, _initial_deficit: f64) -> PidGains {
        PidGains {
            kp: tuning.p / self.divisor,
            ki: tuning.i / self.divisor,
            kd: tuning.d / self.divisor,
        }
    }
}

/// Energy, in joules, the bath is expected to lose before the next decision.
pub trait LossModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn expected_loss(&self, tuning: &TuningParameters, bath_c: f64, ambient_c: f64) -> f64;
}

/// Ignores losses; the deficit is just desired minus stored energy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn name(&self) -> &'static str {
        "none"
    }

    fn expected_loss(&self, _tuning: &TuningParameters, _bath_c: f64, _ambient_c: f64) -> f64 {
        0.0
    }
}

/// Adds one second's worth of radiated power at the measured bath temperature.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadiativeLoss;

impl LossModel for RadiativeLoss {
    fn name(&self) -> &'static str {
        "radiative"
    }

    fn expected_loss(&self, tuning: &TuningParameters, bath_c: f64, ambient_c: f64) -> f64 {
        thermal::radiative_loss_watts(tuning.emissivity, tuning.area, bath_c, ambient_c)
    }
}
