use anyhow::Result;
use clap::Parser;
use device_simulator::config::{DeviceTimings, DmTimings, SimulatorConfig};
use device_simulator::fleet::{CoolerDeviceFactory, FleetManager, FleetReconciler, JsonFileRegistry};
use device_simulator::transport::LoggingTransportFactory;
use simulator_shared::timing;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run a fleet of simulated cooler devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host name for devices that do not carry their own
    #[arg(long, env = "SIMULATOR_HOST_NAME", default_value = "localhost")]
    host_name: String,

    /// JSON file with the desired device list
    #[arg(short, long, env = "SIMULATOR_REGISTRY", default_value = "devices.json")]
    registry: PathBuf,

    /// Seconds between two registry polls
    #[arg(
        long,
        env = "SIMULATOR_POLL_SECS",
        default_value_t = timing::DEVICE_POLL_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_secs: u64,

    /// Seconds to wait for a device to stop
    #[arg(long, env = "SIMULATOR_STOP_TIMEOUT_SECS", default_value_t = timing::DEVICE_STOP_TIMEOUT_SECS)]
    stop_timeout_secs: u64,

    /// Seconds between two command receive attempts
    #[arg(
        long,
        env = "SIMULATOR_RECEIVE_POLL_SECS",
        default_value_t = timing::RECEIVE_POLL_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    receive_poll_secs: u64,

    /// Seconds between two telemetry passes
    #[arg(
        long,
        env = "SIMULATOR_REPORT_INTERVAL_SECS",
        default_value_t = timing::REPORT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    report_interval_secs: u64,

    /// Seconds between two remote-monitor samples
    #[arg(
        long,
        env = "SIMULATOR_TELEMETRY_INTERVAL_SECS",
        default_value_t = timing::TELEMETRY_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    telemetry_interval_secs: u64,

    /// Seconds per firmware update phase
    #[arg(long, env = "SIMULATOR_FIRMWARE_STEP_SECS", default_value_t = timing::FIRMWARE_STEP_SECS)]
    firmware_step_secs: u64,

    /// Seconds per configuration update phase
    #[arg(long, env = "SIMULATOR_CONFIGURATION_STEP_SECS", default_value_t = timing::CONFIGURATION_STEP_SECS)]
    configuration_step_secs: u64,

    /// Seed for reproducible telemetry
    #[arg(long, env = "SIMULATOR_SEED")]
    seed: Option<u64>,

    /// Log level, used when RUST_LOG is not set
    #[arg(short, long, env = "SIMULATOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> SimulatorConfig {
        SimulatorConfig {
            host_name: self.host_name.clone(),
            registry_path: self.registry.clone(),
            device_poll_interval: Duration::from_secs(self.poll_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            device: DeviceTimings {
                receive_poll_interval: Duration::from_secs(self.receive_poll_secs),
                report_interval: Duration::from_secs(self.report_interval_secs),
                telemetry_interval: Duration::from_secs(self.telemetry_interval_secs),
                ..Default::default()
            },
            dm: DmTimings {
                firmware_step: Duration::from_secs(self.firmware_step_secs),
                configuration_step: Duration::from_secs(self.configuration_step_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = args.config();
    let registry = JsonFileRegistry::new(&config.registry_path);
    info!("Device simulator starting");
    info!("  Registry: {}", registry.path().display());
    info!("  Poll interval: {:?}", config.device_poll_interval);

    let factory = CoolerDeviceFactory::new(
        Arc::new(LoggingTransportFactory),
        config.host_name.clone(),
        config.device.clone(),
        config.dm.clone(),
        args.seed,
    );
    let reconciler = FleetReconciler::new(
        Arc::new(registry),
        Arc::new(factory),
        Arc::new(FleetManager::new(config.stop_timeout)),
        config.device_poll_interval,
    );

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    token.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    reconciler.process_devices(token).await;
    info!("Device simulator stopped");
    Ok(())
}
