use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{QueueError, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Environment variable that relocates the store directory.
pub const HOME_ENV: &str = "QUEUECTL_HOME";

const STORE_DIR: &str = ".queuectl";
const STORE_FILE: &str = "data.json";
const STOP_FILE: &str = "workers.stop";

/// The closed set of runtime-tunable queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
    WorkerCount,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBase,
        ConfigKey::WorkerCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::WorkerCount => "worker_count",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| QueueError::UnknownConfigKey(s.to_string()))
    }
}

/// Process-wide queue settings, persisted alongside the jobs.
///
/// Defaults apply at enqueue time (`max_retries`) and at failure time
/// (`backoff_base`); `worker_count` is the pool size used when the caller
/// does not ask for one explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub max_retries: u32,
    #[serde(deserialize_with = "positive_base")]
    pub backoff_base: f64,
    #[serde(deserialize_with = "positive_count")]
    pub worker_count: usize,
}

fn valid_backoff_base(base: f64) -> bool {
    base.is_finite() && base > 0.0
}

// Persisted values get the same checks as `set`.
fn positive_base<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<f64, D::Error> {
    let base = f64::deserialize(deserializer)?;
    if !valid_backoff_base(base) {
        return Err(de::Error::custom(format!(
            "backoff_base must be a positive number, got {base}"
        )));
    }
    Ok(base)
}

fn positive_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<usize, D::Error> {
    let count = usize::deserialize(deserializer)?;
    if count == 0 {
        return Err(de::Error::custom("worker_count must be at least 1"));
    }
    Ok(count)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl QueueConfig {
    pub fn get(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::MaxRetries => self.max_retries.to_string(),
            ConfigKey::BackoffBase => self.backoff_base.to_string(),
            ConfigKey::WorkerCount => self.worker_count.to_string(),
        }
    }

    /// Parse `value` for `key` and apply it. The config is left untouched on error.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let invalid = |reason: &str| QueueError::InvalidConfigValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let value = value.trim();

        match key {
            ConfigKey::MaxRetries => {
                self.max_retries = value
                    .parse()
                    .map_err(|_| invalid("must be a non-negative integer"))?;
            }
            ConfigKey::BackoffBase => {
                let base: f64 = value
                    .parse()
                    .map_err(|_| invalid("must be a positive number"))?;
                if !valid_backoff_base(base) {
                    return Err(invalid("must be a positive number"));
                }
                self.backoff_base = base;
            }
            ConfigKey::WorkerCount => {
                let count: usize = value
                    .parse()
                    .map_err(|_| invalid("must be a positive integer"))?;
                if count == 0 {
                    return Err(invalid("must be a positive integer"));
                }
                self.worker_count = count;
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> Vec<(ConfigKey, String)> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| (key, self.get(key)))
            .collect()
    }
}

/// Settings for a running worker pool. Not persisted.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Sleep between claim attempts when nothing is eligible.
    pub poll_interval: Duration,
    /// How long `stop` waits for in-flight jobs before giving up on them.
    pub shutdown_grace: Duration,
    /// Workers exit when this file appears. Lets another shell stop a
    /// foreground pool.
    pub stop_file: Option<PathBuf>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(30),
            stop_file: None,
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_stop_file(mut self, path: PathBuf) -> Self {
        self.stop_file = Some(path);
        self
    }
}

/// `$QUEUECTL_HOME`, else `~/.queuectl`, else `./.queuectl`.
pub fn default_home() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORE_DIR)
}

pub fn default_data_file() -> PathBuf {
    default_home().join(STORE_FILE)
}

/// The stop-signal file that sits next to a given store file.
pub fn stop_file_for(data_file: &std::path::Path) -> PathBuf {
    data_file
        .parent()
        .map(|dir| dir.join(STOP_FILE))
        .unwrap_or_else(|| PathBuf::from(STOP_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn queue_config_default() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, 2.0);
        assert_eq!(cfg.worker_count, 1);
    }

    #[test]
    fn worker_pool_config_default() {
        let cfg = WorkerPoolConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(30));
        assert!(cfg.stop_file.is_none());
    }

    #[test]
    fn config_key_round_trips_through_str() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = "retry_limit".parse::<ConfigKey>().unwrap_err();
        assert!(matches!(err, QueueError::UnknownConfigKey(k) if k == "retry_limit"));
    }

    #[test]
    fn set_valid_values() {
        let mut cfg = QueueConfig::default();
        cfg.set(ConfigKey::MaxRetries, "5").unwrap();
        cfg.set(ConfigKey::BackoffBase, "1.5").unwrap();
        cfg.set(ConfigKey::WorkerCount, " 4 ").unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.backoff_base, 1.5);
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.get(ConfigKey::BackoffBase), "1.5");
    }

    #[test]
    fn set_rejects_bad_values_without_mutating() {
        let mut cfg = QueueConfig::default();
        assert!(cfg.set(ConfigKey::MaxRetries, "-1").is_err());
        assert!(cfg.set(ConfigKey::MaxRetries, "two").is_err());
        assert!(cfg.set(ConfigKey::BackoffBase, "0").is_err());
        assert!(cfg.set(ConfigKey::BackoffBase, "-2").is_err());
        assert!(cfg.set(ConfigKey::BackoffBase, "inf").is_err());
        assert!(cfg.set(ConfigKey::WorkerCount, "0").is_err());
        assert_eq!(cfg, QueueConfig::default());
    }

    #[test]
    fn config_deserializes_integer_backoff_and_fills_missing_keys() {
        let cfg: QueueConfig = serde_json::from_str(r#"{"backoff_base": 3}"#).unwrap();
        assert_eq!(cfg.backoff_base, 3.0);
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn config_rejects_unknown_persisted_keys() {
        let result: std::result::Result<QueueConfig, _> =
            serde_json::from_str(r#"{"max_retries": 1, "priority": 9}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_rejects_persisted_values_set_would_refuse() {
        for raw in [
            r#"{"backoff_base": -2}"#,
            r#"{"backoff_base": 0}"#,
            r#"{"worker_count": 0}"#,
        ] {
            let result: std::result::Result<QueueConfig, _> = serde_json::from_str(raw);
            assert!(result.is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn stop_file_sits_next_to_store() {
        let stop = stop_file_for(Path::new("/tmp/q/data.json"));
        assert_eq!(stop, PathBuf::from("/tmp/q/workers.stop"));
    }
}
