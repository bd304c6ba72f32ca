//! Airguard: Main Entry Point
//!
//! One binary, two long-running roles plus two operator commands.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SqliteStore     MqttPublisher   MqttTransport   SysfsPin      │
//! │  (RecordStore)   (Publisher)     (Transport)     (OutputPin)   │
//! │  LogEventSink    FileRelayState                                │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  hub:   baseline ─┐                                            │
//! │         detector ─┼─ one thread each, store is the only link   │
//! │         combinator┘                                            │
//! │  relay: DeliveryLoop (reconnect · validate · apply)            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use airguard::adapters::gpio::SysfsPin;
use airguard::adapters::log_sink::LogEventSink;
use airguard::adapters::mqtt::{MqttPublisher, MqttTransport};
use airguard::adapters::relay_state::FileRelayState;
use airguard::adapters::sqlite_store::SqliteStore;
use airguard::app::service::{ControlService, StatusReport, set_user_control};
use airguard::config::{StorageConfig, SystemConfig};
use airguard::delivery::DeliveryLoop;
use airguard::records::SwitchState;
use airguard::relay::Relay;

/// Longest single sleep in a cycle thread, so shutdown stays prompt.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "airguard")]
#[command(version)]
#[command(about = "PM2.5 filter control decision engine", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults apply when absent)
    #[arg(long, short, default_value = "airguard.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the baseline, detector and combinator cycles and publish commands
    Hub,
    /// Subscribe to filter commands and drive the relay pin
    Relay,
    /// Record the user enable switch
    User {
        /// `on` or `off`
        #[arg(value_parser = parse_switch)]
        state: SwitchState,
    },
    /// Print the newest baseline and control signals
    Status,
}

fn parse_switch(s: &str) -> Result<SwitchState, String> {
    s.to_ascii_uppercase()
        .parse()
        .map_err(|_| format!("expected 'on' or 'off', got '{s}'"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let mut config = SystemConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate().context("configuration after environment overrides")?;

    match cli.command {
        Commands::Hub => run_hub(&config),
        Commands::Relay => run_relay(&config),
        Commands::User { state } => {
            let mut store = open_store(&config.storage)?;
            let signal = set_user_control(&mut store, &mut LogEventSink::new(), state, Utc::now())?;
            println!("user_control = {} at {}", signal.state, signal.timestamp);
            Ok(())
        }
        Commands::Status => {
            let store = open_store(&config.storage)?;
            let report = StatusReport::gather(&store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                warn!("newest filter command does not match system AND user yet");
            }
            Ok(())
        }
    }
}

// ── Roles ─────────────────────────────────────────────────────

fn run_hub(config: &SystemConfig) -> Result<()> {
    info!("airguard hub v{}", env!("CARGO_PKG_VERSION"));
    let shutdown = install_shutdown_handler()?;

    let mut service = ControlService::new(config);
    {
        let store = open_store(&config.storage)?;
        service.start(&store, &mut LogEventSink::new())?;
    }
    let (mut baseline, mut detector, mut combinator) = service.into_parts();
    let mut publisher =
        MqttPublisher::start(&config.mqtt).context("starting MQTT publisher")?;

    let handles = vec![
        spawn_cycle(
            "baseline",
            secs(config.baseline.interval_secs),
            config.storage.clone(),
            Arc::clone(&shutdown),
            move |store, sink, now| {
                baseline.run(store, sink, now);
            },
        )?,
        spawn_cycle(
            "detector",
            secs(config.detector.interval_secs),
            config.storage.clone(),
            Arc::clone(&shutdown),
            move |store, sink, now| {
                detector.run(store, sink, now);
            },
        )?,
        spawn_cycle(
            "combinator",
            secs(config.combinator.interval_secs),
            config.storage.clone(),
            Arc::clone(&shutdown),
            move |store, sink, now| {
                combinator.run(store, &mut publisher, sink, now);
            },
        )?,
    ];

    for handle in handles {
        if handle.join().is_err() {
            error!("a cycle thread panicked");
        }
    }
    info!("hub stopped");
    Ok(())
}

fn run_relay(config: &SystemConfig) -> Result<()> {
    info!("airguard relay v{}", env!("CARGO_PKG_VERSION"));
    let shutdown = install_shutdown_handler()?;

    let pin = SysfsPin::open(config.delivery.relay_gpio)
        .with_context(|| format!("opening GPIO {}", config.delivery.relay_gpio))?;
    let mut delivery = DeliveryLoop::new(
        MqttTransport::new(config.mqtt.clone()),
        Relay::new(pin, config.delivery.relay_active_high),
        FileRelayState::new(config.delivery.relay_state_path.clone()),
        &config.delivery,
        config.mqtt.topic.clone(),
    );
    delivery.run(&shutdown)?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn open_store(config: &StorageConfig) -> airguard::Result<SqliteStore> {
    Ok(SqliteStore::open(&config.db_path)?)
}

fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;
    Ok(shutdown)
}

fn secs(s: u32) -> Duration {
    Duration::from_secs(u64::from(s))
}

/// Run `cycle` every `interval` on a named thread with its own store
/// connection until `shutdown` is set.
fn spawn_cycle<F>(
    name: &'static str,
    interval: Duration,
    storage: StorageConfig,
    shutdown: Arc<AtomicBool>,
    mut cycle: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut(&mut SqliteStore, &mut LogEventSink, DateTime<Utc>) + Send + 'static,
{
    info!("spawning '{}' cycle every {:?}", name, interval);
    let handle = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut sink = LogEventSink::new();
            let mut store: Option<SqliteStore> = None;

            while !shutdown.load(Ordering::Relaxed) {
                let started = Instant::now();

                if store.is_none() {
                    match open_store(&storage) {
                        Ok(s) => store = Some(s),
                        Err(e) => warn!("{}: {}, retrying next cycle", name, e),
                    }
                }
                if let Some(s) = store.as_mut() {
                    cycle(s, &mut sink, Utc::now());
                }

                while !shutdown.load(Ordering::Relaxed) && started.elapsed() < interval {
                    std::thread::sleep(SHUTDOWN_CHECK.min(interval));
                }
            }
            info!("{} cycle stopped", name);
        })
        .with_context(|| format!("spawning {name} thread"))?;
    Ok(handle)
}
