// src/control/mod.rs - Closed-loop bath heating
pub mod pid;
pub mod policy;
pub mod thermal;

use crate::config::ControlConfig;
use crate::hardware::DeviceLink;
use crate::protocol::{ProtocolError, ProtocolSession, ReadOutcome, TemperatureReading};
use crate::state::{BathState, SessionStatus, SharedState};
use pid::PidController;
use policy::{GainSchedule, LossModel, NoLoss, RadiativeLoss, SingleStage};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Invalid control configuration: {0}")]
    InvalidConfig(String),
}

/// Applies the on-time clamp: nothing for non-positive (or NaN) requests, at most
/// `max_ms` otherwise. Fractions of a millisecond are truncated.
pub fn element_command(on_time_ms: f64, max_ms: u32) -> Option<u32> {
    if !(on_time_ms > 0.0) {
        return None;
    }
    if on_time_ms >= max_ms as f64 {
        return Some(max_ms);
    }
    match on_time_ms as u32 {
        0 => None,
        ms => Some(ms),
    }
}

/// Figures from one heating cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub set_point: f64,
    pub stored_energy: f64,
    pub deficit: f64,
    /// PID output in joules; `None` when the deficit did not call for heat.
    pub pid_output: Option<f64>,
    /// On-time actually commanded.
    pub on_time_ms: Option<u32>,
    pub target_reached: bool,
}

/// What a single [`ControlLoop::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Polled temperatures while idle.
    Idle,
    /// Idle→Heating: PID reset, first cycle runs on the next step.
    StartedHeating,
    /// Heating→Idle after the operator cleared `start`.
    StoppedHeating,
    Cycle(CycleReport),
    /// Heating, but nothing was commanded: the last read was stale or the tuning
    /// was unusable.
    SkippedCycle,
}

#[derive(Debug, Default)]
struct HeatingSession {
    initial_deficit: Option<f64>,
    target_reached: bool,
}

/// Polls the bath, runs the energy-deficit PID while heating is requested, and
/// commands element on-time once per cycle.
pub struct ControlLoop<L> {
    session: ProtocolSession<L>,
    state: SharedState,
    config: ControlConfig,
    pid: PidController,
    gain_schedule: Box<dyn GainSchedule>,
    loss_model: Box<dyn LossModel>,
    heating: Option<HeatingSession>,
}

impl<L: DeviceLink> ControlLoop<L> {
    pub fn new(
        session: ProtocolSession<L>,
        state: SharedState,
        config: ControlConfig,
    ) -> Result<Self, ControlError> {
        config.validate().map_err(ControlError::InvalidConfig)?;
        let loss_model: Box<dyn LossModel> = if config.radiative_compensation {
            Box::new(RadiativeLoss)
        } else {
            Box::new(NoLoss)
        };
        Ok(Self {
            session,
            state,
            gain_schedule: Box::new(SingleStage::new(config.gain_divisor)),
            loss_model,
            config,
            pid: PidController::new(0.0, 0.0, 0.0),
            heating: None,
        })
    }

    pub fn with_gain_schedule(mut self, schedule: Box<dyn GainSchedule>) -> Self {
        self.gain_schedule = schedule;
        self
    }

    pub fn with_loss_model(mut self, model: Box<dyn LossModel>) -> Self {
        self.loss_model = model;
        self
    }

    pub fn is_heating(&self) -> bool {
        self.heating.is_some()
    }

    /// Runs until `shutdown` fires or the device fails. Shutdown is only observed
    /// between steps; an exchange in flight always finishes first.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ControlError> {
        tracing::info!(
            "Control loop running: {:.1}s cycle, gains {}, losses {}",
            self.config.cycle_period_secs,
            self.gain_schedule.name(),
            self.loss_model.name()
        );
        loop {
            let step_start = Instant::now();
            let outcome = self.step().await?;
            let delay = self.next_delay(&outcome, step_start.elapsed());
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Control loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if self.heating.take().is_some() {
            self.state.set_status(SessionStatus::Idle).await;
        }
        Ok(())
    }

    /// Sleep before the next step. Heating cycles aim for one decision per cycle
    /// period; an overrun cycle starts the next one immediately.
    fn next_delay(&self, outcome: &StepOutcome, elapsed: Duration) -> Duration {
        match outcome {
            StepOutcome::Idle => self.config.idle_poll(),
            StepOutcome::StartedHeating | StepOutcome::StoppedHeating => Duration::ZERO,
            StepOutcome::Cycle(_) | StepOutcome::SkippedCycle => {
                self.config.cycle_period().saturating_sub(elapsed)
            }
        }
    }

    /// Advances the state machine by one step.
    pub async fn step(&mut self) -> Result<StepOutcome, ControlError> {
        if self.heating.is_none() {
            self.poll_temperatures().await?;
            let snapshot = self.state.snapshot().await;
            if snapshot.start && snapshot.target.is_some() && snapshot.data_fresh {
                self.enter_heating().await;
                return Ok(StepOutcome::StartedHeating);
            }
            return Ok(StepOutcome::Idle);
        }

        let snapshot = self.state.snapshot().await;
        if !snapshot.start {
            self.heating = None;
            self.state.set_status(SessionStatus::Idle).await;
            tracing::info!("Heating stopped");
            return Ok(StepOutcome::StoppedHeating);
        }
        self.heating_cycle(snapshot).await
    }

    async fn enter_heating(&mut self) {
        self.pid.reset();
        self.heating = Some(HeatingSession::default());
        self.state.set_target_reached(false).await;
        self.state.set_status(SessionStatus::Heating).await;
        tracing::info!("Heating started");
    }

    async fn heating_cycle(&mut self, snapshot: BathState) -> Result<StepOutcome, ControlError> {
        let (Some(reading), Some(target)) = (snapshot.fresh_reading(), snapshot.target) else {
            tracing::warn!("No fresh temperatures, element left off this cycle");
            self.poll_temperatures().await?;
            return Ok(StepOutcome::SkippedCycle);
        };
        let tuning = snapshot.tuning;
        if let Err(reason) = tuning.validate() {
            tracing::error!("Unusable tuning, element left off this cycle: {}", reason);
            self.poll_temperatures().await?;
            self.state
                .set_status(SessionStatus::DeviceError(format!("invalid tuning: {}", reason)))
                .await;
            return Ok(StepOutcome::SkippedCycle);
        }
        let ambient = reading.environment;
        let bath = reading.bath;

        let session = self.heating.get_or_insert_with(HeatingSession::default);
        if bath >= target && !session.target_reached {
            session.target_reached = true;
            tracing::info!("Target {:.2}°C reached", target);
        }
        let target_reached = session.target_reached;

        let set_point = thermal::stored_energy_joules(target, ambient, tuning.mass, tuning.heat_capacity);
        let stored_energy = thermal::stored_energy_joules(bath, ambient, tuning.mass, tuning.heat_capacity);
        let loss = self.loss_model.expected_loss(&tuning, bath, ambient);
        let deficit = set_point - stored_energy + loss;
        let initial_deficit = *session.initial_deficit.get_or_insert(deficit);
        tracing::info!(
            "Stored energy {:.1} J, set point {:.1} J, deficit {:.1} J",
            stored_energy,
            set_point,
            deficit
        );

        let mut pid_output = None;
        let mut on_time_ms = None;
        if deficit > 0.0 {
            let gains = self.gain_schedule.gains(&tuning, deficit, initial_deficit);
            self.pid.set_gains(gains);
            let output = self.pid.compute(deficit);
            pid_output = Some(output);

            let watts = thermal::power_watts(tuning.resistance, tuning.voltage);
            let requested_ms = thermal::on_time_seconds(output, watts) * 1000.0;
            tracing::info!("PID wants {:.1} J ({:.0} ms at {:.1} W)", output, requested_ms, watts);
            on_time_ms = if requested_ms.is_finite() {
                element_command(requested_ms, self.config.max_on_time_ms)
            } else {
                tracing::error!("On-time {} ms is not a number of milliseconds, element left off", requested_ms);
                None
            };

            if let Some(ms) = on_time_ms {
                if ms == self.config.max_on_time_ms {
                    tracing::info!("Element on for {} ms [CLAMPED]", ms);
                } else {
                    tracing::info!("Element on for {} ms", ms);
                }
                if let Err(e) = self.session.set_element_time(ms).await {
                    return Err(self.device_failure(e).await);
                }
            }
        }

        if target_reached {
            self.state.set_target_reached(true).await;
        }
        self.poll_temperatures().await?;

        Ok(StepOutcome::Cycle(CycleReport {
            set_point,
            stored_energy,
            deficit,
            pid_output,
            on_time_ms,
            target_reached,
        }))
    }

    /// One temperature exchange, published to the shared state.
    pub async fn poll_temperatures(&mut self) -> Result<Option<TemperatureReading>, ControlError> {
        match self.session.read_temperatures().await {
            Ok(ReadOutcome::Reading(reading)) => {
                self.state.record_reading(reading).await;
                let status = if self.heating.is_some() {
                    SessionStatus::Heating
                } else {
                    SessionStatus::Idle
                };
                self.state.set_status(status).await;
                Ok(Some(reading))
            }
            Ok(ReadOutcome::Stale(reason)) => {
                tracing::warn!("Temperature read discarded: {:?}", reason);
                self.state.mark_stale().await;
                self.state
                    .set_status(SessionStatus::DeviceError(format!("stale reading: {:?}", reason)))
                    .await;
                Ok(None)
            }
            Err(e) => Err(self.device_failure(e).await),
        }
    }

    async fn device_failure(&mut self, err: ProtocolError) -> ControlError {
        tracing::error!("Device failure: {}", err);
        self.state.mark_stale().await;
        self.state
            .set_status(SessionStatus::DeviceError(err.to_string()))
            .await;
        ControlError::Protocol(err)
    }
}

impl<L> std::fmt::Debug for ControlLoop<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("config", &self.config)
            .field("heating", &self.heating.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::StreamLink;
    use tokio_test::io::{Builder, Mock};

    fn quiet_loop() -> ControlLoop<StreamLink<Mock>> {
        let session = ProtocolSession::new(StreamLink::new(Builder::new().build()), Duration::from_secs(1));
        ControlLoop::new(session, SharedState::default(), ControlConfig::default()).unwrap()
    }

    fn cycle() -> StepOutcome {
        StepOutcome::Cycle(CycleReport {
            set_point: 100.0,
            stored_energy: 50.0,
            deficit: 50.0,
            pid_output: Some(50.0),
            on_time_ms: Some(868),
            target_reached: false,
        })
    }

    #[tokio::test]
    async fn test_cycle_sleeps_out_the_remaining_period() {
        let control = quiet_loop();
        let secs = Duration::from_secs;
        assert_eq!(control.next_delay(&cycle(), secs(3)), secs(7));
        assert_eq!(control.next_delay(&StepOutcome::SkippedCycle, secs(3)), secs(7));
        assert_eq!(control.next_delay(&cycle(), Duration::from_millis(9500)), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_overrun_cycle_starts_next_immediately() {
        let control = quiet_loop();
        assert_eq!(control.next_delay(&cycle(), Duration::from_secs(10)), Duration::ZERO);
        assert_eq!(control.next_delay(&cycle(), Duration::from_secs(12)), Duration::ZERO);
        assert_eq!(
            control.next_delay(&StepOutcome::SkippedCycle, Duration::from_secs(60)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_idle_and_transitions_pacing() {
        let control = quiet_loop();
        assert_eq!(control.next_delay(&StepOutcome::Idle, Duration::from_secs(1)), Duration::from_secs(5));
        assert_eq!(control.next_delay(&StepOutcome::Idle, Duration::from_secs(30)), Duration::from_secs(5));
        assert_eq!(control.next_delay(&StepOutcome::StartedHeating, Duration::ZERO), Duration::ZERO);
        assert_eq!(control.next_delay(&StepOutcome::StoppedHeating, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_element_command_clamps_long_requests() {
        assert_eq!(element_command(82986.1, 10000), Some(10000));
        assert_eq!(element_command(10000.0, 10000), Some(10000));
        assert_eq!(element_command(f64::INFINITY, 10000), Some(10000));
    }

    #[test]
    fn test_element_command_suppresses_non_positive() {
        assert_eq!(element_command(0.0, 10000), None);
        assert_eq!(element_command(-250.0, 10000), None);
        assert_eq!(element_command(f64::NAN, 10000), None);
        assert_eq!(element_command(0.4, 10000), None);
    }

    #[test]
    fn test_element_command_truncates_fraction() {
        assert_eq!(element_command(2500.9, 10000), Some(2500));
        assert_eq!(element_command(1.0, 10000), Some(1));
    }
}
