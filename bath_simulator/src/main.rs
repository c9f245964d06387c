// bath_simulator/src/main.rs - bath-sim: run the control loop against a simulated bath
use bath_rs::config::{self, ControlConfig};
use bath_rs::{ControlLoop, ProtocolSession, SharedState, StepOutcome, StreamLink, TuningParameters};
use bath_simulator::{BathPhysics, FaultPlan, SimulatedDevice};
use clap::Parser;
use csv::Writer;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "bath-sim", about = "Closed-loop run against a simulated bath, traced to CSV")]
struct Args {
    /// Take tuning and control settings from this file instead of the defaults
    #[arg(short, long)]
    config: Option<String>,

    /// Target temperature (°C)
    #[arg(short, long, default_value_t = 60.0)]
    target: f64,

    /// Room temperature (°C)
    #[arg(long, default_value_t = 20.0)]
    ambient: f64,

    /// Starting bath temperature (°C), defaults to ambient
    #[arg(long)]
    start: Option<f64>,

    /// Raw proportional gain, overriding the tuning
    #[arg(short)]
    p: Option<f64>,

    /// Control steps to simulate
    #[arg(long, default_value_t = 720)]
    steps: usize,

    /// Peak-to-peak sensor noise (°C)
    #[arg(long, default_value_t = 0.05)]
    noise: f64,

    /// Convective loss to the room (W/°C)
    #[arg(long, default_value_t = bath_simulator::physics::DEFAULT_LOSS_COEFFICIENT)]
    loss_coefficient: f64,

    /// Random seed for sensor noise
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Corrupt every n-th temperature frame
    #[arg(long)]
    corrupt_every: Option<u32>,

    /// Deny every n-th exchange
    #[arg(long)]
    deny_every: Option<u32>,

    /// CSV trace output
    #[arg(short, long, default_value = "./sim_output/bath_trace.csv")]
    output: PathBuf,

    /// Log every exchange
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct TraceRecord {
    step: usize,
    sim_time_s: f64,
    bath_c: f64,
    ambient_c: f64,
    measured_bath_c: Option<f64>,
    element_on: bool,
    outcome: &'static str,
    deficit_j: Option<f64>,
    on_time_ms: Option<u32>,
    target_reached: bool,
}

fn outcome_name(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Idle => "idle",
        StepOutcome::StartedHeating => "started",
        StepOutcome::StoppedHeating => "stopped",
        StepOutcome::Cycle(_) => "cycle",
        StepOutcome::SkippedCycle => "skipped",
    }
}

/// Simulated time that passes before the next step, mirroring the loop's own pacing.
fn step_duration(outcome: &StepOutcome, control: &ControlConfig) -> Duration {
    match outcome {
        StepOutcome::Idle => control.idle_poll(),
        StepOutcome::StartedHeating | StepOutcome::StoppedHeating => Duration::ZERO,
        StepOutcome::Cycle(_) | StepOutcome::SkippedCycle => control.cycle_period(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let (mut tuning, control_config) = match &args.config {
        Some(path) => {
            let config = config::load_config(path)?;
            (config.tuning, config.control)
        }
        None => (
            TuningParameters {
                mass: 0.5,
                p: 1000.0,
                ..Default::default()
            },
            ControlConfig::default(),
        ),
    };
    if let Some(p) = args.p {
        tuning.p = p;
    }

    let mut bath = BathPhysics::new(&tuning, args.ambient, args.seed)
        .with_sensor_noise(args.noise)
        .with_loss_coefficient(args.loss_coefficient);
    bath.bath_c = args.start.unwrap_or(args.ambient);
    let physics = Arc::new(Mutex::new(bath));

    let faults = FaultPlan {
        deny_every: args.deny_every,
        corrupt_every: args.corrupt_every,
    };
    let (host, board) = tokio::io::duplex(1024);
    let device = tokio::spawn(SimulatedDevice::new(physics.clone()).with_faults(faults).serve(board));

    let state = SharedState::new(tuning);
    state.request_start(args.target).await;
    let session = ProtocolSession::new(StreamLink::new(host), Duration::from_secs(1));
    let mut control = ControlLoop::new(session, state.clone(), control_config.clone())?;

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = Writer::from_path(&args.output)?;
    tracing::info!(
        "Simulating {} steps toward {:.1}°C, trace in {}",
        args.steps,
        args.target,
        args.output.display()
    );

    let mut failure = None;
    for step in 0..args.steps {
        let outcome = match control.step().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Control loop aborted at step {}: {}", step, e);
                failure = Some(e);
                break;
            }
        };

        let mut bath = physics.lock().await;
        bath.advance(step_duration(&outcome, &control_config).as_secs_f64());
        let snapshot = state.snapshot().await;
        let (deficit_j, on_time_ms) = match &outcome {
            StepOutcome::Cycle(report) => (Some(report.deficit), report.on_time_ms),
            _ => (None, None),
        };
        wtr.serialize(TraceRecord {
            step,
            sim_time_s: bath.elapsed(),
            bath_c: bath.bath_c,
            ambient_c: bath.ambient_c,
            measured_bath_c: snapshot.fresh_reading().map(|r| r.bath),
            element_on: bath.element_on(),
            outcome: outcome_name(&outcome),
            deficit_j,
            on_time_ms,
            target_reached: snapshot.target_reached,
        })?;
    }
    wtr.flush()?;

    let (final_temp, delivered) = {
        let bath = physics.lock().await;
        (bath.bath_c, bath.energy_delivered())
    };
    drop(control);
    let stats = device.await??;
    tracing::info!(
        "Final bath temperature {:.2}°C after {:.0} J from the element",
        final_temp,
        delivered
    );
    tracing::info!(
        "Device saw {} exchanges, {} element commands, {} corrupted frames, {} denials",
        stats.exchanges,
        stats.element_commands,
        stats.corrupted,
        stats.denied
    );

    match failure {
        Some(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>),
        None => Ok(()),
    }
}
