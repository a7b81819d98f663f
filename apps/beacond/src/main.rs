//! # beacond
//!
//! Headless Beacon agent. Records heartbeats (and any other registered
//! providers), buffers them in SQLite and uploads them to the configured
//! endpoint.
//!
//! ## Signals
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SIGINT / SIGTERM ──► AgentHandle::shutdown ──► teardown ──► exit       │
//! │  SIGHUP           ──► reload agent.toml ──► ConfigurationChanged       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod heartbeat;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beacon_agent::{
    AgentConfig, AgentEvent, AgentNotification, AgentService, AuthStore, DeviceProvider,
    HeadlessPlatform, MeasurementSink, ProviderCatalog, SharedConfig,
};
use beacon_cache::{AlwaysOnline, RestSender, SqlitePipelineFactory, StoreConfig};

use crate::heartbeat::HeartbeatProvider;

const CACHE_DB_FILE: &str = "cache.db";

#[derive(Debug, Parser)]
#[command(name = "beacond", version, about = "Beacon telemetry agent")]
struct Cli {
    /// Path to agent.toml (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    check: bool,

    /// Apply a login result (portal auth JSON) on startup
    #[arg(long, value_name = "FILE")]
    login: Option<PathBuf>,

    /// Seconds between heartbeat measurements
    #[arg(long, default_value_t = 60)]
    heartbeat_secs: u64,
}

/// Initializes tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,beacon=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AgentConfig::load(cli.config.clone()).context("loading configuration")?;
    if cli.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let data_dir = config
        .data_dir()
        .context("no data directory; set agent.data_dir")?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    info!(data_dir = %data_dir.display(), "Starting Beacon agent");

    let shared = config.into_shared();
    let sink = MeasurementSink::new();

    let interval = Duration::from_secs(cli.heartbeat_secs.max(1));
    let catalog = ProviderCatalog::new(sink.clone()).register(heartbeat::SERVICE_NAME, move |ctx| {
        Arc::new(HeartbeatProvider::new(ctx.sink.clone(), interval)) as Arc<dyn DeviceProvider>
    });

    let factory = SqlitePipelineFactory::new(
        StoreConfig::new(data_dir.join(CACHE_DB_FILE)),
        Arc::new(RestSender::new()?),
        Arc::new(AlwaysOnline),
    );

    let (service, handle) = AgentService::builder(
        shared.clone(),
        Arc::new(HeadlessPlatform::new()),
        Arc::new(catalog),
        Arc::new(factory),
    )
    .auth_store(AuthStore::in_dir(&data_dir))
    .sink(sink)
    .build();

    tokio::spawn(log_notifications(handle.subscribe()));
    let mut agent = tokio::spawn(service.run());

    if let Some(path) = &cli.login {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading login result {}", path.display()))?;
        handle.send(AgentEvent::LoginSuccess(contents)).await?;
    }

    let mut signals = Signals::install()?;
    loop {
        tokio::select! {
            joined = &mut agent => {
                // Agent stopped without being asked to, e.g. a fatal startup error.
                joined??;
                return Ok(());
            }
            control = signals.recv() => match control {
                Control::Shutdown => break,
                Control::Reload => {
                    match reload(&shared, cli.config.clone()) {
                        Ok(()) => handle.send(AgentEvent::ConfigurationChanged).await?,
                        Err(e) => warn!(error = %e, "Reload failed, keeping current configuration"),
                    }
                }
            },
        }
    }

    info!("Shutdown signal received, stopping agent...");
    handle.shutdown().await?;
    agent.await??;
    info!("Agent stopped");
    Ok(())
}

async fn log_notifications(mut notifications: broadcast::Receiver<AgentNotification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(json) => info!(notification = %json, "Agent notification"),
                Err(e) => error!(error = %e, "Unserializable notification"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

// =============================================================================
// Configuration Reload
// =============================================================================

/// Re-reads the configuration file into `shared`.
///
/// The project and user written by a login survive unless the file sets them.
fn reload(shared: &SharedConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut fresh = AgentConfig::load(path)?;
    let mut current = shared.write();
    keep_identity(&mut fresh, &current);
    *current = fresh;
    info!("Configuration reloaded");
    Ok(())
}

fn keep_identity(fresh: &mut AgentConfig, current: &AgentConfig) {
    if fresh.agent.project_id.is_none() {
        fresh.agent.project_id = current.agent.project_id.clone();
    }
    if fresh.agent.user_id.is_none() {
        fresh.agent.user_id = current.agent.user_id.clone();
    }
}

// =============================================================================
// Signals
// =============================================================================

enum Control {
    Shutdown,
    Reload,
}

struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Signals {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Signals {})
        }
    }

    async fn recv(&mut self) -> Control {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Control::Shutdown,
                _ = self.terminate.recv() => Control::Shutdown,
                _ = self.hangup.recv() => Control::Reload,
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            Control::Shutdown
        }
    }
}
