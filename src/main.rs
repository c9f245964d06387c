// src/main.rs - bath-host: drive the bath heater from the command line
use bath_rs::config;
use bath_rs::{ControlLoop, ProtocolSession, SerialLink, SharedState};
use clap::Parser;
use tokio::sync::broadcast;

#[derive(Debug, Parser)]
#[command(name = "bath-host", version, about = "Heat a liquid bath to a target temperature")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "bath.toml")]
    config: String,

    /// Serial port, overriding [connection].port
    #[arg(long)]
    port: Option<String>,

    /// Baud rate, overriding [connection].baud
    #[arg(long)]
    baud: Option<u32>,

    /// Start heating toward this temperature (°C); without it the bath is only monitored
    #[arg(short, long)]
    target: Option<f64>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log wire traffic
    #[arg(short, long)]
    verbose: bool,
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

    if args.list_ports {
        for port in SerialLink::available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    tracing::info!("Starting bath-host {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config);

    let mut config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(baud) = args.baud {
        config.connection.baud = baud;
    }
    if config.connection.port.is_empty() {
        tracing::error!("No serial port configured; set [connection].port or pass --port");
        return Err("no serial port configured".into());
    }

    tracing::info!(
        "Bath: {} kg, {} cal/g/°C, element {} Ω at {} V",
        config.tuning.mass,
        config.tuning.heat_capacity,
        config.tuning.resistance,
        config.tuning.voltage
    );

    let link = SerialLink::open(&config.connection.port, config.connection.baud)?;
    tracing::info!("Connected to {}", link.port_name());
    tracing::info!("Waiting {:?} for the board to settle", config.connection.settle_delay());
    tokio::time::sleep(config.connection.settle_delay()).await;

    let state = SharedState::new(config.tuning);
    if let Some(target) = args.target.or(config.control.target) {
        state.request_start(target).await;
    } else {
        tracing::info!("No target given, monitoring only");
    }

    let session = ProtocolSession::new(link, config.connection.read_timeout());
    let mut control = ControlLoop::new(session, state.clone(), config.control.clone())?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stop_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            stop_state.request_stop().await;
            let _ = shutdown_tx.send(());
        }
    });

    if let Err(e) = control.run(shutdown_rx).await {
        tracing::error!("Control loop aborted: {}", e);
        return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
    }

    let last = state.snapshot().await;
    if let (Some(env), Some(bath)) = (last.env_temp, last.bath_temp) {
        tracing::info!("Last reading: environment {:.2}°C, bath {:.2}°C", env, bath);
    }
    Ok(())
}
