//! SystemPub agent entry point
//!
//! Wires the health producers to the MQTT connection manager and runs
//! everything under one cancellation token until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use systempub_agent::config::{load_mqtt_password, Overrides, SystemPubConfig, DEFAULT_CONFIG_PATH};
use systempub_agent::connectivity::ConnectivityHub;
use systempub_agent::identity;
use systempub_agent::models::Subject;
use systempub_agent::mqtt::{self, ConnectionManager};
use systempub_agent::probe::{SanoidProber, SystemdProber};
use systempub_agent::producer::Producer;
use systempub_agent::registry::SensorRegistry;
use systempub_agent::scheduler::Schedule;
use systempub_agent::watchdog::{self, SdNotifier, Watchdog};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Publishes ZFS pool and systemd unit health to Home Assistant over MQTT
#[derive(Debug, Parser)]
#[command(name = "systempub", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// MQTT server host
    #[arg(long)]
    host: Option<String>,

    /// MQTT server port
    #[arg(long)]
    port: Option<u16>,

    /// Sets log level to debug
    #[arg(long)]
    debug: bool,
}

fn init_logging(config: &SystemPubConfig) {
    let level: tracing::Level = config.loglevel.into();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = SystemPubConfig::load(&cli.config).context("Failed to load configuration")?;
    config.apply(&Overrides {
        host: cli.host,
        port: cli.port,
        debug: cli.debug,
    });
    if let Some(password) = load_mqtt_password().context("Failed to load MQTT credential")? {
        config.mqttserver.password = password;
    }
    init_logging(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "SystemPub starting...");
    if !config_found {
        warn!(path = %cli.config.display(), "No configuration file, using defaults");
    }
    debug!(?config, "Effective configuration");

    let device = Arc::new(
        identity::hostnamectl()
            .await
            .context("Failed to discover device identity")?,
    );
    debug!(?device, "Device");

    let session = mqtt::connect(&config.mqttserver, &device, config.queue_capacity)
        .context("Failed to create MQTT session")?;

    let hub = ConnectivityHub::new();
    let (outbox, outbound) = mqtt::outbound_queue(config.queue_capacity, config.publish_timeout());
    let sensors = SensorRegistry::new(device.clone());
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let sanoid = Producer::new(
        Subject::POOLS.to_vec(),
        sensors.clone(),
        SanoidProber::new(config.probe_timeout()),
        outbox.clone(),
        Schedule::Fixed(config.pools_interval()),
    )
    .with_span(info_span!("producer", module = "sanoid"));
    tasks.spawn(sanoid.run(hub.register("sanoid"), cancel.clone()));

    let systemd = Producer::new(
        vec![Subject::FailedUnits],
        sensors,
        SystemdProber::new(config.probe_timeout()),
        outbox,
        Schedule::adaptive(config.units_unhealthy_interval(), config.units_interval()),
    )
    .with_span(info_span!("producer", module = "systemd"));
    tasks.spawn(systemd.run(hub.register("systemd"), cancel.clone()));

    if let Some(notifier) = SdNotifier::from_env() {
        let watchdog = Watchdog::new(notifier, watchdog::watchdog_interval())
            .with_span(info_span!("watchdog", module = "watchdog"));
        tasks.spawn(watchdog.run(hub.register("watchdog"), cancel.clone()));
    }

    let manager = ConnectionManager::new(session.transport, hub, outbound)
        .with_retry_delay(config.retry_delay())
        .with_span(info_span!("connection", module = "mqtt"));
    tasks.spawn(manager.run(session.events, cancel.clone()));

    let signal = shutdown_signal().await;
    info!("Shutting down");
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Task ended abnormally");
        }
    }
    info!("SystemPub stopped");
    signal
}
