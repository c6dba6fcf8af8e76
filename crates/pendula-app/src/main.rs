//! Pendula controller CLI.
//!
//! Drives the bilateral stimulation hardware and the sensor pipeline from
//! the command line; the desktop UI wraps the same crates.
//!
//! # Usage
//!
//! ```bash
//! # Probe and list connected peripherals
//! pendula devices
//!
//! # Flash the lightbar's all-on test pattern
//! pendula devices --test
//!
//! # Run a 24-cycle session at the configured speed
//! pendula run
//!
//! # One slow sweep on a 100-LED bar
//! pendula run --cycles 0 --leds 100 --speed 12
//!
//! # Stream the sensor and print heart-rate estimates for 30 s
//! pendula monitor --seconds 30
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pendula_core::engine::StimulationEngine;
use pendula_host::acquisition::{self, AcquisitionConfig};
use pendula_host::audio::TonePlayer;
use pendula_host::config_store::{ConfigStore, DEFAULT_CONFIG_PATH};
use pendula_host::registry::SerialDeviceRegistry;
use pendula_host::session::SessionDriver;

/// Pendula bilateral stimulation controller
#[derive(Parser, Debug)]
#[command(name = "pendula")]
#[command(author, version, about = "Pendula bilateral stimulation controller", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file path
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe and list connected peripherals
    Devices {
        /// Flash the lightbar's all-on test pattern after probing
        #[arg(long)]
        test: bool,

        /// Ask the coordinator for attached slave boards
        #[arg(long)]
        slaves: bool,
    },

    /// Run a stimulation session
    Run {
        /// Full back-and-forth sweeps (0 = a single sweep)
        #[arg(short, long, default_value = "24")]
        cycles: u32,

        /// LED count of the attached bar
        #[arg(long, default_value = "58")]
        leds: u16,

        /// Override the configured sweep speed (cycles per minute)
        #[arg(long)]
        speed: Option<f64>,
    },

    /// Stream the sensor board and print heart-rate estimates
    Monitor {
        /// How long to capture before stopping
        #[arg(short, long, default_value = "30")]
        seconds: u64,

        /// Sensor sampling rate in Hz
        #[arg(long, default_value = "250")]
        sample_rate: f64,

        /// Mains frequency for the notch filter (50 or 60)
        #[arg(long, default_value = "50")]
        mains: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Pendula v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Devices { test, slaves } => run_devices(test, slaves),
        Commands::Run {
            cycles,
            leds,
            speed,
        } => run_session(&cli.config, cycles, leds, speed),
        Commands::Monitor {
            seconds,
            sample_rate,
            mains,
        } => run_monitor(seconds, sample_rate, mains),
    }
}

/// Probe the buses and report what answered.
fn run_devices(test: bool, slaves: bool) -> anyhow::Result<()> {
    let mut registry = SerialDeviceRegistry::new();
    let report = registry.probe();

    if report.identities.is_empty() {
        info!("no peripherals found");
    }
    for identity in &report.identities {
        info!("  {identity}");
    }

    if test && report.lightbar {
        info!("flashing all-on test pattern");
        registry.set_led(-1)?;
        std::thread::sleep(Duration::from_secs(1));
        registry.set_led(0)?;
    }

    if slaves && report.sensor {
        match registry.enumerate_slaves() {
            Ok(list) if list.is_empty() => info!("no slave boards attached"),
            Ok(list) => {
                for slave in list {
                    info!(
                        "  slave {} status 0x{:02X}",
                        slave.device_id, slave.status
                    );
                }
            }
            Err(e) => warn!("slave enumeration failed: {e}"),
        }
    }

    Ok(())
}

/// Run a stimulation session to completion.
fn run_session(
    config_path: &str,
    cycles: u32,
    leds: u16,
    speed: Option<f64>,
) -> anyhow::Result<()> {
    let store = ConfigStore::open(config_path);
    let config = store.config().clone();

    let mut params = config.stimulation_params();
    if let Some(speed) = speed {
        params.speed_cpm = speed;
    }

    let engine = StimulationEngine::new(leds, params)?;

    let mut registry = SerialDeviceRegistry::new();
    let report = registry.probe();
    if !report.lightbar {
        warn!("no lightbar found; running dark");
    }

    let mut driver = SessionDriver::new(
        Arc::new(Mutex::new(engine)),
        Arc::new(Mutex::new(registry)),
        Arc::new(TonePlayer::new()),
        config,
    );

    info!("starting session: {cycles} cycles on {leds} LEDs");
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        driver.start(cycles);
        driver.finished().await;
    });
    info!("session complete");

    Ok(())
}

/// Stream sensor packets and report heart-rate estimates.
fn run_monitor(seconds: u64, sample_rate: f64, mains: f64) -> anyhow::Result<()> {
    let mut registry = SerialDeviceRegistry::new();
    let report = registry.probe();
    if !report.sensor {
        anyhow::bail!("no sensor board found");
    }

    let reader = registry.clone_sensor_reader()?;
    let handle = acquisition::start(
        reader,
        AcquisitionConfig {
            sample_rate_hz: sample_rate,
            mains_hz: mains,
            ..AcquisitionConfig::default()
        },
    )?;
    registry.start_capture()?;

    info!("capturing for {seconds} s");
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut last_bpm = 0.0;
    while Instant::now() < deadline {
        while let Ok(sample) = handle.samples().try_recv() {
            if sample.bpm > 0.0 && (sample.bpm - last_bpm).abs() >= 0.5 {
                last_bpm = sample.bpm;
                info!("bpm {:.1} (packet {})", sample.bpm, sample.packet_id);
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    registry.stop_capture()?;
    match handle.stop() {
        Some(stats) => info!(
            "capture done: {} packets, {} duplicates dropped",
            stats.packets, stats.duplicates
        ),
        None => warn!("acquisition thread had to be abandoned"),
    }

    Ok(())
}
