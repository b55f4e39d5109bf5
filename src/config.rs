//! Configuration loaded from `jobrelay.toml`.
//!
//! [`RelayConfig`] mirrors the file; every field is optional and falls back
//! to a sensible default. The `JOBRELAY_DATA_DIR` environment variable takes
//! precedence over the file for the data directory. [`Settings`] is the
//! resolved, path-typed form the rest of the crate consumes.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "jobrelay.toml";

/// Environment override for [`RelayConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "JOBRELAY_DATA_DIR";

/// Top-level configuration as written in `jobrelay.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Root for broker and state-store files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where accepted uploads are stored.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Where result artifacts are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Job records; defaults to `<data_dir>/jobs`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Queue messages; defaults to `<data_dir>/queue`.
    #[serde(default)]
    pub broker_dir: Option<PathBuf>,

    /// Concurrent execution slots in `jobrelay worker`.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often an idle worker rescans the queue, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a store write waits for a per-job lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// CSV column summed by the job body.
    #[serde(default = "default_value_column")]
    pub value_column: String,

    /// Appended to the input's base name to name the result artifact.
    #[serde(default = "default_result_suffix")]
    pub result_suffix: String,

    /// Artificial delay before a job body reads its input, in milliseconds.
    #[serde(default)]
    pub processing_delay_ms: u64,

    /// Prefix for the `result_file` link in status responses.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_value_column() -> String {
    "value".to_string()
}

fn default_result_suffix() -> String {
    "_result.csv".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:5000".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            state_dir: None,
            broker_dir: None,
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            value_column: default_value_column(),
            result_suffix: default_result_suffix(),
            processing_delay_ms: 0,
            public_base_url: default_public_base_url(),
        }
    }
}

impl RelayConfig {
    /// Load from `path`, or from `jobrelay.toml` in the current directory.
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str::<RelayConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.value_column.trim().is_empty() {
            anyhow::bail!("value_column must not be empty");
        }
        if self.result_suffix.is_empty() {
            anyhow::bail!("result_suffix must not be empty");
        }
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        Settings {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            state_dir: self
                .state_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("jobs")),
            broker_dir: self
                .broker_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("queue")),
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            value_column: self.value_column.clone(),
            result_suffix: self.result_suffix.clone(),
            processing_delay: Duration::from_millis(self.processing_delay_ms),
            public_base_url: self.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Resolved runtime settings shared through the job context.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub broker_dir: PathBuf,
    pub workers: usize,
    pub poll_interval: Duration,
    pub lock_timeout: Duration,
    pub value_column: String,
    pub result_suffix: String,
    pub processing_delay: Duration,
    pub public_base_url: String,
}

impl Settings {
    /// Defaults with every directory placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let config = RelayConfig {
            data_dir: root.join("data"),
            input_dir: root.join("uploads"),
            output_dir: root.join("results"),
            poll_interval_ms: 10,
            ..RelayConfig::default()
        };
        config.settings()
    }
}
