use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stream::DEFAULT_STREAM_CAPACITY;

/// Default bytes per sub-range request.
pub const DEFAULT_FETCH_LIMIT: u64 = 256 * 1024;

/// Default number of concurrent sub-range fetches per task.
pub const DEFAULT_FETCH_WORKER_NUM: usize = 1;

/// Sub-range retry parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of tries per sub-range (including the first).
    pub max_attempts: u32,
    /// First sleep of the overload backoff loop, in milliseconds. Doubles each round.
    pub overload_initial_backoff_ms: u64,
    /// Upper bound on a single overload backoff sleep, in milliseconds.
    pub overload_max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            overload_initial_backoff_ms: 1000,
            overload_max_backoff_ms: 64_000,
        }
    }
}

/// What to probe while the upstream reports overload (408/503).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthCheckConfig {
    /// One-byte range request against the same target.
    #[default]
    Upstream,
    /// GET a fixed well-known address.
    Url { url: String },
    /// No probe: sleep once and resume.
    Disabled,
}

/// How a task's concurrency behaves after it was cut to 1 by an overload signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OverloadRecovery {
    /// Stay at one worker for the rest of the task.
    #[default]
    Permanent,
    /// Double the worker count (up to the configured value) after this many
    /// consecutive successful sub-fetches.
    Restore { after_successes: u32 },
}

/// Global configuration loaded from `~/.config/rangefetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeFetchConfig {
    /// Maximum bytes requested per sub-range.
    pub fetch_limit: u64,
    /// Maximum concurrent sub-range fetches per task.
    pub fetch_worker_num: usize,
    /// Chunks that may wait on a reassembly stream before producers block.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub overload_recovery: OverloadRecovery,
}

fn default_stream_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

impl Default for RangeFetchConfig {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fetch_worker_num: DEFAULT_FETCH_WORKER_NUM,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            retry: None,
            health_check: HealthCheckConfig::default(),
            overload_recovery: OverloadRecovery::default(),
        }
    }
}

/// Per-task tunables, derived from [`RangeFetchConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub fetch_limit: u64,
    pub fetch_worker_num: usize,
    pub stream_capacity: usize,
    pub max_attempts: u32,
    pub overload_initial_backoff: Duration,
    pub overload_max_backoff: Duration,
    pub health_check: HealthCheckConfig,
    pub overload_recovery: OverloadRecovery,
}

impl Default for TaskOptions {
    fn default() -> Self {
        RangeFetchConfig::default().task_options()
    }
}

impl TaskOptions {
    /// Replaces zero limits with the defaults.
    pub fn normalized(mut self) -> Self {
        if self.fetch_limit == 0 {
            self.fetch_limit = DEFAULT_FETCH_LIMIT;
        }
        if self.fetch_worker_num == 0 {
            self.fetch_worker_num = DEFAULT_FETCH_WORKER_NUM;
        }
        self.stream_capacity = self.stream_capacity.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

impl RangeFetchConfig {
    pub fn task_options(&self) -> TaskOptions {
        let retry = self.retry.clone().unwrap_or_default();
        TaskOptions {
            fetch_limit: self.fetch_limit,
            fetch_worker_num: self.fetch_worker_num,
            stream_capacity: self.stream_capacity,
            max_attempts: retry.max_attempts,
            overload_initial_backoff: Duration::from_millis(retry.overload_initial_backoff_ms),
            overload_max_backoff: Duration::from_millis(retry.overload_max_backoff_ms),
            health_check: self.health_check.clone(),
            overload_recovery: self.overload_recovery,
        }
        .normalized()
    }

    /// Reads a config file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rangefetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RangeFetchConfig> {
    load_or_init_at(&config_path()?)
}

/// Like [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<RangeFetchConfig> {
    if !path.exists() {
        let default_cfg = RangeFetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    RangeFetchConfig::load_from_path(path)
}
