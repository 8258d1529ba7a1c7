use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bosun_bridge::{
    api::{exporter_router, ExporterState},
    config::{Config, TargetsFile},
    credentials::{CredentialProvider, FileTokenSource, StaticTokenSource, TokenSource},
    logging,
    watcher::{ConfigWatcher, HttpConfigSource},
    BridgeError, Result,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    logging::init_logger("bosun_bridge");

    if let Err(e) = run().await {
        error!("Exporter stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let shutdown = CancellationToken::new();
    let client = reqwest::Client::builder().build()?;

    // Credentials
    let source: Arc<dyn TokenSource> = match (&config.token_file, &config.token) {
        (Some(path), _) => Arc::new(FileTokenSource::new(path.clone())),
        (None, Some(token)) => Arc::new(StaticTokenSource::new(token.clone())),
        (None, None) => {
            return Err(BridgeError::Config(
                "one of BRIDGE_TOKEN or BRIDGE_TOKEN_FILE must be set".to_string(),
            ))
        }
    };
    let credentials = Arc::new(CredentialProvider::new(source));
    if let Err(e) = credentials.refresh(true).await {
        warn!("Initial credential refresh failed: {}", e);
    }
    credentials
        .clone()
        .spawn_refresh(config.token_refresh_interval, shutdown.clone());

    let state = ExporterState::new(
        client.clone(),
        config.endpoint.clone(),
        credentials,
        shutdown.clone(),
    );

    // Targets, optionally kept in sync with a remote store
    match &config.remote_config_url {
        Some(url) => {
            let watcher = ConfigWatcher::spawn(
                Arc::new(HttpConfigSource::new(client.clone(), url.clone())),
                config.targets_file.clone(),
                config.remote_poll_interval,
                shutdown.clone(),
            );
            if !watcher.wait_for_change(config.initial_config_wait).await {
                info!("No remote config within {:?}, using local file", config.initial_config_wait);
            }
            state.load_targets(TargetsFile::load(&config.targets_file)?);
            tokio::spawn(reload_on_change(
                watcher,
                state.clone(),
                config.targets_file.clone(),
                config.remote_poll_interval,
                shutdown.clone(),
            ));
        }
        None => state.load_targets(TargetsFile::load(&config.targets_file)?),
    }

    // HTTP server
    let app = exporter_router(state);
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| BridgeError::Internal(format!("Failed to bind to address: {}", e)))?;
    info!("Starting exporter on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| BridgeError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn reload_on_change(
    watcher: ConfigWatcher,
    state: ExporterState,
    path: PathBuf,
    poll: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        if !watcher.wait_for_change(poll).await {
            continue;
        }
        match TargetsFile::load(&path) {
            Ok(targets) => state.load_targets(targets),
            Err(e) => warn!("Keeping previous targets, reload failed: {}", e),
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    shutdown.cancel();
}
