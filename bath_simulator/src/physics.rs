// bath_simulator/src/physics.rs - Lumped thermal model of the bath and its element
use bath_rs::TuningParameters;
use bath_rs::control::thermal;
use bath_rs::protocol::TemperatureReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Integration step for [`BathPhysics::advance`], seconds.
const SUBSTEP: f64 = 0.1;

/// Remainders below this are float residue, not element time.
const EPSILON: f64 = 1e-9;

/// Default convective loss to the room, W/°C.
pub const DEFAULT_LOSS_COEFFICIENT: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct BathPhysics {
    pub bath_c: f64,
    pub ambient_c: f64,
    /// Joules to raise the whole bath by 1 °C.
    pub thermal_mass: f64,
    pub element_watts: f64,
    pub loss_coefficient: f64,
    pub emissivity: f64,
    pub area: f64,
    /// Peak-to-peak sensor noise, °C.
    pub sensor_noise: f64,
    /// Element time left from the last command, seconds.
    element_remaining: f64,
    elapsed: f64,
    energy_delivered: f64,
    rng: StdRng,
}

impl BathPhysics {
    pub fn new(tuning: &TuningParameters, ambient_c: f64, seed: u64) -> Self {
        Self {
            bath_c: ambient_c,
            ambient_c,
            thermal_mass: tuning.mass * 1000.0 * tuning.heat_capacity * thermal::CALORIES_TO_JOULES,
            element_watts: thermal::power_watts(tuning.resistance, tuning.voltage),
            loss_coefficient: DEFAULT_LOSS_COEFFICIENT,
            emissivity: tuning.emissivity,
            area: tuning.area,
            sensor_noise: 0.0,
            element_remaining: 0.0,
            elapsed: 0.0,
            energy_delivered: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_sensor_noise(mut self, noise_c: f64) -> Self {
        self.sensor_noise = noise_c;
        self
    }

    pub fn with_loss_coefficient(mut self, watts_per_c: f64) -> Self {
        self.loss_coefficient = watts_per_c;
        self
    }

    /// Switches the element on for `seconds`, replacing whatever was left of the
    /// previous command.
    pub fn energize(&mut self, seconds: f64) {
        self.element_remaining = seconds.max(0.0);
    }

    /// Switches the element off immediately.
    pub fn cut_element(&mut self) {
        self.element_remaining = 0.0;
    }

    pub fn element_on(&self) -> bool {
        self.element_remaining > 0.0
    }

    pub fn element_remaining(&self) -> f64 {
        self.element_remaining
    }

    /// Simulated seconds since creation.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Joules the element has put in so far.
    pub fn energy_delivered(&self) -> f64 {
        self.energy_delivered
    }

    /// Integrates element heating and losses over `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        let mut left = dt.max(0.0);
        while left > EPSILON {
            let step = left.min(SUBSTEP);
            let on = self.element_remaining.min(step);
            self.element_remaining -= on;
            if self.element_remaining < EPSILON {
                self.element_remaining = 0.0;
            }

            let energy_in = self.element_watts * on;
            let convective = self.loss_coefficient * (self.bath_c - self.ambient_c) * step;
            let radiative =
                thermal::radiative_loss_watts(self.emissivity, self.area, self.bath_c, self.ambient_c) * step;

            self.bath_c += (energy_in - convective - radiative) / self.thermal_mass;
            self.energy_delivered += energy_in;
            self.elapsed += step;
            left -= step;
        }
    }

    /// What the board's sensors would report right now.
    pub fn measure(&mut self) -> TemperatureReading {
        let bath_noise = self.noise();
        let env_noise = self.noise();
        TemperatureReading {
            environment: self.ambient_c + env_noise,
            bath: self.bath_c + bath_noise,
        }
    }

    fn noise(&mut self) -> f64 {
        if self.sensor_noise == 0.0 {
            return 0.0;
        }
        self.sensor_noise * (self.rng.random::<f64>() - 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossless() -> BathPhysics {
        let tuning = TuningParameters {
            mass: 0.5,
            emissivity: 0.0,
            ..Default::default()
        };
        BathPhysics::new(&tuning, 20.0, 7).with_loss_coefficient(0.0)
    }

    #[test]
    fn test_element_energy_raises_bath() {
        let mut bath = lossless();
        bath.energize(10.0);
        bath.advance(10.0);
        // 576 J into 2092 J/°C
        assert!((bath.bath_c - 20.0 - 576.0 / 2092.0).abs() < 1e-6);
        assert!((bath.energy_delivered() - 576.0).abs() < 1e-6);
        assert!(!bath.element_on());
    }

    #[test]
    fn test_short_command_only_heats_for_its_duration() {
        let mut bath = lossless();
        bath.energize(2.0);
        bath.advance(10.0);
        assert!((bath.energy_delivered() - 2.0 * 57.6).abs() < 1e-6);
        assert!((bath.elapsed() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_new_command_replaces_remaining_time() {
        let mut bath = lossless();
        bath.energize(8.0);
        bath.advance(1.0);
        bath.energize(3.0);
        assert!((bath.element_remaining() - 3.0).abs() < 1e-9);
        bath.cut_element();
        assert!(!bath.element_on());
    }

    #[test]
    fn test_hot_bath_cools_toward_ambient() {
        let tuning = TuningParameters {
            mass: 0.5,
            ..Default::default()
        };
        let mut bath = BathPhysics::new(&tuning, 20.0, 7);
        bath.bath_c = 60.0;
        bath.advance(600.0);
        assert!(bath.bath_c < 60.0);
        assert!(bath.bath_c > 20.0);
    }

    #[test]
    fn test_noise_stays_within_band() {
        let mut bath = lossless().with_sensor_noise(0.2);
        for _ in 0..100 {
            let reading = bath.measure();
            assert!((reading.bath - 20.0).abs() <= 0.1);
            assert!((reading.environment - 20.0).abs() <= 0.1);
        }
    }

    #[test]
    fn test_noiseless_measurement_is_exact() {
        let mut bath = lossless();
        assert_eq!(
            bath.measure(),
            TemperatureReading {
                environment: 20.0,
                bath: 20.0
            }
        );
    }
}
