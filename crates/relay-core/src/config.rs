//! Pipeline configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables, then validated. Every field has a default, so an empty file (or
//! no file) yields a working configuration.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consumer::{BindingSettings, LogicalFailurePolicy};
use crate::ports::{MAX_BATCH_SIZE, UniformDelay};
use crate::queue::QueueSettings;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var} ('{value}'): {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub backend: BackendConfig,
    pub consumer: ConsumerConfig,
}

/// Queue binding (address, batch size, visibility, retention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub url: String,
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
    pub retention_days: u64,
    pub max_payload_bytes: usize,
}

/// Backend target and its simulated latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub function_name: String,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub invoke_timeout_secs: u64,
}

/// Consumer execution limits and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub poll_wait_secs: u64,
    /// Simulated work per message before the backend is invoked.
    pub work_delay_ms: u64,
    pub logical_failure_policy: LogicalFailurePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "memory://relay-events".to_string(),
            batch_size: MAX_BATCH_SIZE,
            visibility_timeout_secs: 300,
            retention_days: 14,
            max_payload_bytes: QueueSettings::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            function_name: "relay-backend".to_string(),
            delay_min_ms: 500,
            delay_max_ms: 1500,
            invoke_timeout_secs: 30,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            concurrency: 1,
            poll_wait_secs: 20,
            work_delay_ms: 0,
            logical_failure_policy: LogicalFailurePolicy::Accept,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// File (when given), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!(path = %path.display(), "loaded configuration");
                config
            }
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (environment variable name -> value).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("QUEUE_URL") {
            self.queue.url = url;
        }
        override_with(&lookup, "QUEUE_BATCH_SIZE", &mut self.queue.batch_size)?;
        override_with(
            &lookup,
            "QUEUE_VISIBILITY_TIMEOUT_SECS",
            &mut self.queue.visibility_timeout_secs,
        )?;
        override_with(&lookup, "QUEUE_RETENTION_DAYS", &mut self.queue.retention_days)?;
        override_with(&lookup, "QUEUE_MAX_PAYLOAD_BYTES", &mut self.queue.max_payload_bytes)?;

        if let Some(name) = lookup("BACKEND_FUNCTION_NAME") {
            self.backend.function_name = name;
        }
        override_with(&lookup, "BACKEND_DELAY_MIN_MS", &mut self.backend.delay_min_ms)?;
        override_with(&lookup, "BACKEND_DELAY_MAX_MS", &mut self.backend.delay_max_ms)?;
        override_with(
            &lookup,
            "BACKEND_INVOKE_TIMEOUT_SECS",
            &mut self.backend.invoke_timeout_secs,
        )?;

        override_with(&lookup, "CONSUMER_TIMEOUT_SECS", &mut self.consumer.timeout_secs)?;
        override_with(&lookup, "CONSUMER_CONCURRENCY", &mut self.consumer.concurrency)?;
        override_with(&lookup, "CONSUMER_POLL_WAIT_SECS", &mut self.consumer.poll_wait_secs)?;
        override_with(
            &lookup,
            "CONSUMER_LOGICAL_FAILURE_POLICY",
            &mut self.consumer.logical_failure_policy,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.queue.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "queue.batch_size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.queue.batch_size
            )));
        }
        for (name, value) in [
            ("queue.visibility_timeout_secs", self.queue.visibility_timeout_secs),
            ("queue.retention_days", self.queue.retention_days),
            ("backend.invoke_timeout_secs", self.backend.invoke_timeout_secs),
            ("consumer.timeout_secs", self.consumer.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        // 実行中の batch が別の poller に再配送されないこと
        if self.consumer.timeout_secs >= self.queue.visibility_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "consumer.timeout_secs ({}) must be below queue.visibility_timeout_secs ({})",
                self.consumer.timeout_secs, self.queue.visibility_timeout_secs
            )));
        }
        if self.queue.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_payload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.consumer.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "consumer.concurrency must be greater than zero".to_string(),
            ));
        }
        if self.backend.delay_min_ms > self.backend.delay_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backend delay range is inverted: {}ms > {}ms",
                self.backend.delay_min_ms, self.backend.delay_max_ms
            )));
        }
        Ok(())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings::default()
            .with_visibility_timeout(Duration::from_secs(self.queue.visibility_timeout_secs))
            .with_retention(Duration::from_secs(
                self.queue.retention_days.saturating_mul(SECS_PER_DAY),
            ))
            .with_max_payload_bytes(self.queue.max_payload_bytes)
    }

    pub fn binding_settings(&self) -> BindingSettings {
        BindingSettings {
            batch_size: self.queue.batch_size,
            execution_timeout: Duration::from_secs(self.consumer.timeout_secs),
            poll_wait: Duration::from_secs(self.consumer.poll_wait_secs),
        }
    }

    pub fn backend_delay(&self) -> UniformDelay {
        UniformDelay::from_millis(self.backend.delay_min_ms, self.backend.delay_max_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.invoke_timeout_secs)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.consumer.work_delay_ms)
    }
}

fn override_with<F, T>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(var) else {
        return Ok(());
    };
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            Ok(())
        }
        Err(err) => Err(ConfigError::Env {
            var,
            reason: format!("{err}"),
            value,
        }),
    }
}
