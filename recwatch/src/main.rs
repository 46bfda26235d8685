use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recwatch::config::Config;
use recwatch::control::{AppState, ControlServer, ControlServerConfig};
use recwatch::downloader::{DownloadConfig, DownloadManager};
use recwatch::notify::NotificationHub;
use recwatch::probe::ChzzkProber;
use recwatch::recorder::TokioLauncher;
use recwatch::recorder::session::SessionConfig;
use recwatch::registry::ChannelRegistry;
use recwatch::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recwatch=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("RECWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));

    if !config_path.exists() {
        Config::write_default(&config_path)?;
        tracing::info!(
            "created default config file at {}; review and edit settings as required, \
             then start again",
            config_path.display()
        );
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    config.check_storage()?;

    let registry = Arc::new(ChannelRegistry::load(&config.registry_path)?);
    let hub = Arc::new(NotificationHub::new());
    let prober = Arc::new(ChzzkProber::new(config.probe_timeout())?);
    let launcher = Arc::new(TokioLauncher::new(config.stop_recordings_on_exit));

    let cancel_token = CancellationToken::new();

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        prober.clone(),
        launcher.clone(),
        hub.clone(),
        SessionConfig::from_config(&config),
        cancel_token.clone(),
    ));

    let downloads = Arc::new(DownloadManager::new(
        DownloadConfig::from_config(&config),
        prober,
        launcher,
        hub.clone(),
    ));

    let channel_count = registry.len().await;
    tracing::info!(
        channels = channel_count,
        interval_secs = config.interval_secs,
        quality = %config.quality,
        save_dir = %config.save_root_dir.display(),
        "recwatch starting"
    );

    scheduler.start().await;

    let server = ControlServer::new(
        ControlServerConfig {
            bind_address: config.bind_address.clone(),
            port: config.port,
            api_keys: config.api_keys.clone(),
        },
        AppState {
            scheduler: scheduler.clone(),
            downloads,
            hub,
        },
        cancel_token.clone(),
    );
    let server_task = tokio::spawn(async move { server.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        stop_recordings = config.stop_recordings_on_exit,
        "shutdown signal received"
    );

    // Stops sessions (and captures, per policy), then cancels the token the
    // control-plane server is watching.
    scheduler.shutdown(config.stop_recordings_on_exit).await;

    server_task.await??;
    Ok(())
}
