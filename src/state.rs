// src/state.rs - Shared state block between the control loop and its front end
use crate::config::TuningParameters;
use crate::protocol::TemperatureReading;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// What the control loop is doing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Heating,
    /// Last exchange failed; the string says how.
    DeviceError(String),
}

/// Snapshot of everything the control loop and its front end exchange.
#[derive(Debug, Clone)]
pub struct BathState {
    pub env_temp: Option<f64>,
    pub bath_temp: Option<f64>,
    /// Bumped on every accepted reading; compare values to detect new data.
    pub reading_seq: u64,
    /// Whether the most recent read produced a reading.
    pub data_fresh: bool,
    pub last_reading: Option<Instant>,
    /// Heating requested by the operator.
    pub start: bool,
    pub target: Option<f64>,
    pub target_reached: bool,
    pub status: SessionStatus,
    pub tuning: TuningParameters,
}

impl BathState {
    pub fn new(tuning: TuningParameters) -> Self {
        Self {
            env_temp: None,
            bath_temp: None,
            reading_seq: 0,
            data_fresh: false,
            last_reading: None,
            start: false,
            target: None,
            target_reached: false,
            status: SessionStatus::Idle,
            tuning,
        }
    }

    /// Latest reading, if the last read produced one.
    pub fn fresh_reading(&self) -> Option<TemperatureReading> {
        if !self.data_fresh {
            return None;
        }
        match (self.env_temp, self.bath_temp) {
            (Some(environment), Some(bath)) => Some(TemperatureReading { environment, bath }),
            _ => None,
        }
    }
}

impl Default for BathState {
    fn default() -> Self {
        Self::new(TuningParameters::default())
    }
}

/// Cloneable handle to the state block. All access goes through these accessors.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<BathState>>,
}

impl SharedState {
    pub fn new(tuning: TuningParameters) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BathState::new(tuning))),
        }
    }

    pub async fn snapshot(&self) -> BathState {
        self.inner.read().await.clone()
    }

    /// Stores a good reading and returns its sequence number.
    pub async fn record_reading(&self, reading: TemperatureReading) -> u64 {
        let mut state = self.inner.write().await;
        state.env_temp = Some(reading.environment);
        state.bath_temp = Some(reading.bath);
        state.reading_seq += 1;
        state.data_fresh = true;
        state.last_reading = Some(Instant::now());
        state.reading_seq
    }

    /// The last read produced nothing; previous temperatures are kept but flagged stale.
    pub async fn mark_stale(&self) {
        self.inner.write().await.data_fresh = false;
    }

    pub async fn request_start(&self, target: f64) {
        let mut state = self.inner.write().await;
        state.target = Some(target);
        state.start = true;
        tracing::info!("Heating requested, target {:.2}°C", target);
    }

    pub async fn request_stop(&self) {
        let mut state = self.inner.write().await;
        if state.start {
            tracing::info!("Heating stop requested");
        }
        state.start = false;
    }

    pub async fn set_tuning(&self, tuning: TuningParameters) {
        self.inner.write().await.tuning = tuning;
    }

    pub async fn set_status(&self, status: SessionStatus) {
        self.inner.write().await.status = status;
    }

    pub async fn set_target_reached(&self, reached: bool) {
        self.inner.write().await.target_reached = reached;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(TuningParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reading_sequence_is_monotonic() {
        let state = SharedState::default();
        let reading = TemperatureReading {
            environment: 20.0,
            bath: 25.0,
        };
        assert_eq!(state.record_reading(reading).await, 1);
        assert_eq!(state.record_reading(reading).await, 2);
        let snap = state.snapshot().await;
        assert_eq!(snap.reading_seq, 2);
        assert_eq!(snap.fresh_reading(), Some(reading));
    }

    #[tokio::test]
    async fn test_stale_keeps_last_values() {
        let state = SharedState::default();
        state
            .record_reading(TemperatureReading {
                environment: 20.0,
                bath: 25.0,
            })
            .await;
        state.mark_stale().await;
        let snap = state.snapshot().await;
        assert!(!snap.data_fresh);
        assert_eq!(snap.bath_temp, Some(25.0));
        assert_eq!(snap.fresh_reading(), None);
        assert_eq!(snap.reading_seq, 1);
    }

    #[tokio::test]
    async fn test_start_stop_requests() {
        let state = SharedState::default();
        state.request_start(60.0).await;
        let snap = state.snapshot().await;
        assert!(snap.start);
        assert_eq!(snap.target, Some(60.0));
        state.request_stop().await;
        assert!(!state.snapshot().await.start);
    }

    #[tokio::test]
    async fn test_clones_share_one_block() {
        let state = SharedState::default();
        let front_end = state.clone();
        front_end
            .set_tuning(TuningParameters {
                mass: 2.0,
                ..Default::default()
            })
            .await;
        assert_eq!(state.snapshot().await.tuning.mass, 2.0);
    }
}
