use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::DEFAULT_REFRESH_INTERVAL;
use crate::scrape::ScrapeTarget;
use crate::watcher::DEFAULT_POLL_INTERVAL;
use crate::{BridgeError, Result};

const DEFAULT_TARGET_TIMEOUT_SECS: f64 = 10.0;

/// Process settings, read from `BRIDGE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: String,
    pub endpoint: String,
    pub targets_file: PathBuf,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub token_refresh_interval: Duration,
    pub remote_config_url: Option<String>,
    pub remote_poll_interval: Duration,
    pub initial_config_wait: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("BRIDGE_ENDPOINT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BridgeError::Config("BRIDGE_ENDPOINT must be set".to_string()))?;

        Ok(Self {
            listen_addr: lookup("BRIDGE_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:9110".to_string()),
            endpoint,
            targets_file: lookup("BRIDGE_TARGETS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("targets.json")),
            token: lookup("BRIDGE_TOKEN"),
            token_file: lookup("BRIDGE_TOKEN_FILE").map(PathBuf::from),
            token_refresh_interval: secs(&lookup, "BRIDGE_TOKEN_REFRESH_SECS")?
                .unwrap_or(DEFAULT_REFRESH_INTERVAL),
            remote_config_url: lookup("BRIDGE_REMOTE_CONFIG_URL").filter(|v| !v.is_empty()),
            remote_poll_interval: secs(&lookup, "BRIDGE_REMOTE_POLL_SECS")?
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            initial_config_wait: secs(&lookup, "BRIDGE_INITIAL_CONFIG_WAIT_SECS")?
                .unwrap_or(Duration::from_secs(10)),
        })
    }
}

fn secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => u64::from_str(raw.trim())
            .ok()
            .filter(|n| *n > 0)
            .map(|n| Some(Duration::from_secs(n)))
            .ok_or_else(|| {
                BridgeError::Config(format!("{} must be a positive integer, got {:?}", key, raw))
            }),
    }
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TARGET_TIMEOUT_SECS
}

/// One entry of the targets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub rule: String,
    pub metric: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

/// `{"targets": [...]}` as written to `BRIDGE_TARGETS_FILE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl TargetsFile {
    pub fn load(path: &Path) -> Result<Vec<ScrapeTarget>> {
        let raw = std::fs::read(path)
            .map_err(|e| BridgeError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &[u8]) -> Result<Vec<ScrapeTarget>> {
        let file: TargetsFile = serde_json::from_slice(raw)
            .map_err(|e| BridgeError::Config(format!("bad targets file: {}", e)))?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(file.targets.len());
        for target in file.targets {
            if target.name.is_empty() || target.rule.trim().is_empty() || target.metric.is_empty() {
                return Err(BridgeError::Config(format!(
                    "target {:?} needs a name, a rule and a metric",
                    target.name
                )));
            }
            if !seen.insert(target.name.clone()) {
                return Err(BridgeError::Config(format!(
                    "duplicate target name {:?}",
                    target.name
                )));
            }
            if !target.timeout_secs.is_finite() || target.timeout_secs <= 0.0 {
                return Err(BridgeError::Config(format!(
                    "target {:?} has a non-positive timeout",
                    target.name
                )));
            }
            targets.push(ScrapeTarget {
                name: target.name,
                rule: target.rule,
                metric: target.metric,
                timeout: Duration::from_secs_f64(target.timeout_secs),
            });
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("BRIDGE_ENDPOINT", "http://bosun/api/expr")]))
            .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9110");
        assert_eq!(config.targets_file, PathBuf::from("targets.json"));
        assert_eq!(config.token_refresh_interval, Duration::from_secs(1800));
        assert_eq!(config.remote_poll_interval, Duration::from_secs(15));
        assert_eq!(config.initial_config_wait, Duration::from_secs(10));
        assert!(config.remote_config_url.is_none());
    }

    #[test]
    fn test_missing_endpoint_and_bad_numbers() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("BRIDGE_ENDPOINT", "http://bosun"),
                ("BRIDGE_TOKEN_REFRESH_SECS", "soon"),
            ])),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("BRIDGE_ENDPOINT", "http://bosun"),
                ("BRIDGE_REMOTE_POLL_SECS", "0"),
            ])),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_targets_file() {
        let raw = br#"{"targets": [
            {"name": "cpu", "rule": "q(\"sum:os.cpu{host=*}\", \"1h\", \"\")", "metric": "bosun_cpu", "timeout_secs": 2.5},
            {"name": "mem", "rule": "avg(q(\"sum:os.mem\", \"1h\", \"\"))", "metric": "bosun_mem"}
        ]}"#;
        let targets = TargetsFile::parse(raw).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].timeout, Duration::from_millis(2500));
        assert_eq!(targets[1].timeout, Duration::from_secs(10));
        assert_eq!(targets[1].metric, "bosun_mem");
    }

    #[test]
    fn test_targets_file_rejects_duplicates_and_blanks() {
        let dup = br#"{"targets": [
            {"name": "cpu", "rule": "x", "metric": "a"},
            {"name": "cpu", "rule": "y", "metric": "b"}
        ]}"#;
        assert!(matches!(TargetsFile::parse(dup), Err(BridgeError::Config(_))));

        let blank = br#"{"targets": [{"name": "cpu", "rule": " ", "metric": "a"}]}"#;
        assert!(matches!(TargetsFile::parse(blank), Err(BridgeError::Config(_))));

        let zero = br#"{"targets": [{"name": "cpu", "rule": "x", "metric": "a", "timeout_secs": 0}]}"#;
        assert!(matches!(TargetsFile::parse(zero), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_targets_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, r#"{"targets": []}"#).unwrap();
        assert!(TargetsFile::load(&path).unwrap().is_empty());
        assert!(TargetsFile::load(&dir.path().join("missing.json")).is_err());
    }
}
