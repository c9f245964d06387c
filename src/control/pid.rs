// src/control/pid.rs - Wall-clock PID on the energy deficit
use std::time::Instant;

/// PID gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// PID controller driven by elapsed wall-clock time between calls.
///
/// The integral is unbounded and persists across calls until [`PidController::reset`].
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,

    integral: f64,
    previous_error: f64,
    previous_time: Instant,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self::with_start(kp, ki, kd, Instant::now())
    }

    /// Controller whose first `dt` is measured from `start`.
    pub fn with_start(kp: f64, ki: f64, kd: f64, start: Instant) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_error: 0.0,
            previous_time: start,
        }
    }

    pub fn compute(&mut self, error: f64) -> f64 {
        self.compute_at(error, Instant::now())
    }

    /// One PID step with `now` as the current time.
    pub fn compute_at(&mut self, error: f64, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.previous_time).as_secs_f64();
        let de = error - self.previous_error;

        let proportional = self.kp * error;
        self.integral += error * dt;
        let derivative = if dt > 0.0 { de / dt } else { 0.0 };

        self.previous_time = now;
        self.previous_error = error;

        proportional + self.ki * self.integral + self.kd * derivative
    }

    /// Clears integral and error history; the next `dt` is measured from now.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.previous_time = now;
    }

    pub fn set_kp(&mut self, kp: f64) {
        self.kp = kp;
    }

    pub fn set_ki(&mut self, ki: f64) {
        self.ki = ki;
    }

    pub fn set_kd(&mut self, kd: f64) {
        self.kd = kd;
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.kp = gains.kp;
        self.ki = gains.ki;
        self.kd = gains.kd;
    }

    pub fn kp(&self) -> f64 {
        self.kp
    }

    pub fn ki(&self) -> f64 {
        self.ki
    }

    pub fn kd(&self) -> f64 {
        self.kd
    }

    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pure_proportional_is_steady() {
        let start = Instant::now();
        let mut pid = PidController::with_start(1.0, 0.0, 0.0, start);
        let first = pid.compute_at(10.0, start + Duration::from_secs(1));
        let second = pid.compute_at(10.0, start + Duration::from_secs(2));
        assert_eq!(first, 10.0);
        assert_eq!(second, 10.0);
    }

    #[test]
    fn test_integral_accumulates_error_times_dt() {
        let start = Instant::now();
        let mut pid = PidController::with_start(0.0, 1.0, 0.0, start);
        pid.compute_at(4.0, start + Duration::from_secs(2));
        let out = pid.compute_at(4.0, start + Duration::from_secs(3));
        assert!((pid.integral() - 12.0).abs() < 1e-9);
        assert!((out - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_derivative_uses_error_slope() {
        let start = Instant::now();
        let mut pid = PidController::with_start(0.0, 0.0, 1.0, start);
        let first = pid.compute_at(10.0, start + Duration::from_secs(2));
        assert!((first - 5.0).abs() < 1e-9);
        let second = pid.compute_at(4.0, start + Duration::from_secs(4));
        assert!((second + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dt_skips_derivative() {
        let start = Instant::now();
        let mut pid = PidController::with_start(0.0, 1.0, 1.0, start);
        let out = pid.compute_at(10.0, start);
        assert_eq!(out, 0.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let start = Instant::now();
        let mut pid = PidController::with_start(1.0, 1.0, 0.0, start);
        pid.compute_at(5.0, start + Duration::from_secs(10));
        assert!(pid.integral() > 0.0);
        let restart = start + Duration::from_secs(20);
        pid.reset_at(restart);
        assert_eq!(pid.integral(), 0.0);
        let out = pid.compute_at(5.0, restart + Duration::from_secs(1));
        assert!((out - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_gain_setters() {
        let mut pid = PidController::new(0.0, 0.0, 0.0);
        pid.set_kp(1.5);
        pid.set_ki(0.25);
        pid.set_kd(-2.0);
        assert_eq!(
            pid.gains(),
            PidGains {
                kp: 1.5,
                ki: 0.25,
                kd: -2.0
            }
        );
        pid.set_gains(PidGains::default());
        assert_eq!(pid.kp(), 0.0);
        assert_eq!(pid.ki(), 0.0);
        assert_eq!(pid.kd(), 0.0);
    }
}
