//! Bearer token shared between scrapes and its background refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::{BridgeError, Result};

/// Interval between two scheduled refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

/// Upper bound for one refresh attempt.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where fresh tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetches a token. `force` asks the source to bypass any cache it keeps.
    async fn fetch(&self, force: bool) -> Result<String>;
}

/// A token that never changes.
pub struct StaticTokenSource(String);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch(&self, _force: bool) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the token from a file that some other process keeps current.
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn fetch(&self, _force: bool) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            BridgeError::Credential(format!("read {}: {}", self.path.display(), e))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(BridgeError::Credential(format!(
                "token file {} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}

/// Holds the current token. Reads never block on a refresh in progress.
pub struct CredentialProvider {
    token: RwLock<String>,
    source: Arc<dyn TokenSource>,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            token: RwLock::new(String::new()),
            source,
        }
    }

    /// The token to send with the next request. Empty until the first successful refresh.
    pub fn current(&self) -> String {
        self.token.read().clone()
    }

    /// Fetches a new token and swaps it in. On failure the old token stays.
    pub async fn refresh(&self, force: bool) -> Result<()> {
        let fetched = tokio::time::timeout(REFRESH_TIMEOUT, self.source.fetch(force))
            .await
            .map_err(|_| BridgeError::Credential("token refresh timed out".to_string()))??;
        *self.token.write() = fetched;
        debug!("Credential token refreshed");
        Ok(())
    }

    /// Refreshes every `interval` until cancelled. The first refresh happens one
    /// interval from now; call `refresh(true)` at startup for an immediate one.
    ///
    /// Failures are logged and counted; scrapes keep using the stale token.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Credential refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.refresh(false).await {
                    metrics::record_token_refresh_failure();
                    warn!("Credential refresh failed, keeping previous token: {}", e);
                }
            }
        })
    }
}
