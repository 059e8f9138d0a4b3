use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lnd_graph_sync::{config::Config, forward_shutdown, GraphSyncApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the level and format apply from the start
    let (config, config_path) = load_config().await?;

    init_tracing(&config);

    info!("Starting lnd-graph-sync...");
    match &config_path {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    // The destination database must be reachable before the first cycle
    let app = match GraphSyncApp::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            std::process::exit(1);
        }
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    // Handle shutdown signals
    tokio::spawn(forward_shutdown(wait_for_signal(), shutdown_tx));

    // Run the scheduler until shutdown
    app.run_with_shutdown(shutdown_rx).await?;
    app.shutdown().await;

    info!("lnd-graph-sync stopped gracefully");
    Ok(())
}

/// Load configuration from file or use defaults, then apply environment overrides
async fn load_config() -> Result<(Config, Option<PathBuf>)> {
    // Look for config in standard locations
    let mut config_paths = Vec::new();
    if let Some(path) = std::env::var_os("GRAPH_SYNC_CONFIG") {
        config_paths.push(PathBuf::from(path));
    }
    config_paths.push(PathBuf::from("./lnd-graph-sync.toml"));
    config_paths.push(PathBuf::from("/etc/lnd-graph-sync/lnd-graph-sync.toml"));
    if let Some(dir) = dirs::config_dir() {
        config_paths.push(dir.join("lnd-graph-sync/lnd-graph-sync.toml"));
    }

    let mut loaded = None;
    for path in config_paths {
        if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            loaded = Some((config, path));
            break;
        }
    }

    let (mut config, path) = match loaded {
        Some((config, path)) => (config, Some(path)),
        None => (Config::default(), None),
    };

    config.apply_process_env()?;
    Ok((config, path))
}

/// Install the global subscriber; `RUST_LOG` takes precedence over `logging.level`
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

/// Resolve on SIGINT or, on unix, SIGTERM
async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "SIGINT")
    }
}
