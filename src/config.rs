//! Engine configuration loading: store retry policy and feed capacity.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/engine.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ZOODLE_SYNC_CONFIG_PATH";

/// Immutable runtime configuration shared across the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the change feed broadcast channel.
    pub feed_capacity: usize,
    /// Upper bound on a single host phase transition, store write included.
    pub transition_timeout: Duration,
    /// Retry policy applied to store operations.
    pub retry: RetryPolicy,
}

/// Bounded exponential backoff parameters for transient store failures.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the initial one included.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Ceiling for the doubled delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before the first retry.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Ceiling for the doubled delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed_capacity: 256,
            transition_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load the engine configuration from disk, falling back to built-in
    /// defaults when the file is absent or malformed.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded engine config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    feed_capacity: Option<usize>,
    transition_timeout_ms: Option<u64>,
    retry: Option<RetryPolicy>,
}

impl From<RawConfig> for EngineConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = EngineConfig::default();
        Self {
            feed_capacity: raw.feed_capacity.unwrap_or(defaults.feed_capacity),
            transition_timeout: raw
                .transition_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transition_timeout),
            retry: raw.retry.unwrap_or(defaults.retry),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
