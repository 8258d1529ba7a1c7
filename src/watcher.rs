//! Keeps a local config file in sync with a remote store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics;
use crate::{BridgeError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[async_trait]
pub trait RemoteConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// Reads the remote copy with a plain GET.
pub struct HttpConfigSource {
    client: reqwest::Client,
    url: String,
}

impl HttpConfigSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RemoteConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Transport(format!(
                "config store returned HTTP status {}",
                status
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Compares the local file with the remote copy and rewrites it when they differ.
///
/// A missing local file counts as empty. Returns whether the file was rewritten.
pub async fn sync_once(source: &dyn RemoteConfigSource, path: &Path) -> Result<bool> {
    let local = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(BridgeError::Config(format!(
                "read {}: {}",
                path.display(),
                e
            )))
        }
    };
    let remote = source.fetch().await?;
    if local == remote {
        return Ok(false);
    }
    tokio::fs::write(path, &remote)
        .await
        .map_err(|e| BridgeError::Config(format!("write {}: {}", path.display(), e)))?;
    Ok(true)
}

/// Background poller; signals every rewrite of the local file.
pub struct ConfigWatcher {
    changed: Arc<Notify>,
}

impl ConfigWatcher {
    /// Polls `source` every `interval` until `cancel` fires. The first poll runs immediately.
    pub fn spawn(
        source: Arc<dyn RemoteConfigSource>,
        path: PathBuf,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let changed = Arc::new(Notify::new());
        let notify = changed.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match sync_once(source.as_ref(), &path).await {
                    Ok(true) => {
                        info!(path = %path.display(), "Config file updated from remote store");
                        metrics::record_config_reload();
                        notify.notify_one();
                    }
                    Ok(false) => {}
                    Err(e) => warn!(path = %path.display(), "Config sync failed: {}", e),
                }
            }
        });
        Self { changed }
    }

    /// Waits for the next rewrite. A rewrite that happened since the last call counts.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for_change(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.changed.notified())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MemorySource(Mutex<Result<Vec<u8>>>);

    impl MemorySource {
        fn set(&self, value: Result<Vec<u8>>) {
            *self.0.lock() = value;
        }
    }

    #[async_trait]
    impl RemoteConfigSource for MemorySource {
        async fn fetch(&self) -> Result<Vec<u8>> {
            match &*self.0.lock() {
                Ok(data) => Ok(data.clone()),
                Err(e) => Err(BridgeError::Transport(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_sync_once_writes_only_on_difference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        let source = MemorySource(Mutex::new(Ok(b"v1".to_vec())));

        assert!(sync_once(&source, &path).await.unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
        assert!(!sync_once(&source, &path).await.unwrap());

        source.set(Err(BridgeError::Transport("down".to_string())));
        assert!(sync_once(&source, &path).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_watcher_signals_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, b"old").unwrap();

        let source = Arc::new(MemorySource(Mutex::new(Ok(b"new".to_vec()))));
        let cancel = CancellationToken::new();
        let watcher = ConfigWatcher::spawn(
            source.clone(),
            path.clone(),
            Duration::from_millis(20),
            cancel.clone(),
        );

        assert!(watcher.wait_for_change(Duration::from_secs(5)).await);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!watcher.wait_for_change(Duration::from_millis(100)).await);

        source.set(Ok(b"newer".to_vec()));
        assert!(watcher.wait_for_change(Duration::from_secs(5)).await);
        assert_eq!(std::fs::read(&path).unwrap(), b"newer");

        cancel.cancel();
    }
}
