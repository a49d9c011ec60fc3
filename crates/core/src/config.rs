//! Controller configuration.
//!
//! Loaded from a TOML or JSON file and overlaid with `CONVERGE_*`
//! environment variables. Every field has a default so an empty file is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;
use crate::retry::RetryConfig;

/// Configuration shared by the LRP and Task controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Namespace runtime workloads are created in. `None` uses the
    /// declared record's namespace.
    #[serde(default)]
    pub workloads_namespace: Option<String>,

    /// How long a finished task's workload is kept before deletion.
    #[serde(with = "duration_secs", default = "default_task_ttl")]
    pub task_ttl: Duration,

    /// Budget for optimistic-concurrency retries in the Updater.
    #[serde(default)]
    pub conflict_retry: RetryConfig,

    /// Concurrent reconciles per controller.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Interval between full relists of declared records.
    #[serde(with = "duration_secs", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// Deadline for a single reconcile.
    #[serde(with = "duration_secs", default = "default_reconcile_timeout")]
    pub reconcile_timeout: Duration,

    /// Backoff for re-enqueueing keys whose reconcile failed.
    #[serde(default)]
    pub requeue_backoff: RequeueBackoff,

    /// Service account the application instances run as.
    #[serde(default)]
    pub application_service_account: Option<String>,

    /// Image pull secret attached to workloads.
    #[serde(default)]
    pub registry_secret_name: Option<String>,
}

/// Per-key exponential backoff for failed reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueBackoff {
    #[serde(with = "duration_ms", default = "default_backoff_base")]
    pub base: Duration,
    #[serde(with = "duration_ms", default = "default_backoff_max")]
    pub max: Duration,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self {
            base: default_backoff_base(),
            max: default_backoff_max(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workloads_namespace: None,
            task_ttl: default_task_ttl(),
            conflict_retry: RetryConfig::default(),
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            reconcile_timeout: default_reconcile_timeout(),
            requeue_backoff: RequeueBackoff::default(),
            application_service_account: None,
            registry_secret_name: None,
        }
    }
}

impl ControllerConfig {
    /// Set the task TTL.
    #[must_use]
    pub const fn task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Set the conflict retry policy.
    #[must_use]
    pub fn conflict_retry(mut self, retry: RetryConfig) -> Self {
        self.conflict_retry = retry;
        self
    }

    /// Set the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the workloads namespace.
    #[must_use]
    pub fn workloads_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.workloads_namespace = Some(namespace.into());
        self
    }

    /// Load configuration from a file; `.json` files are parsed as JSON,
    /// everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`Error::InvalidConfig`] if it cannot be parsed or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("Failed to parse config: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `CONVERGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but malformed.
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but malformed.
    pub fn with_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup("CONVERGE_WORKLOADS_NAMESPACE") {
            self.workloads_namespace = Some(namespace);
        }

        if let Some(ttl) = lookup("CONVERGE_TASK_TTL_SECS") {
            self.task_ttl = Duration::from_secs(parse_var("CONVERGE_TASK_TTL_SECS", &ttl)?);
        }

        if let Some(workers) = lookup("CONVERGE_WORKERS") {
            self.workers = parse_var("CONVERGE_WORKERS", &workers)?;
        }

        if let Some(attempts) = lookup("CONVERGE_CONFLICT_RETRY_ATTEMPTS") {
            self.conflict_retry.max_attempts =
                parse_var("CONVERGE_CONFLICT_RETRY_ATTEMPTS", &attempts)?;
        }

        if let Some(timeout) = lookup("CONVERGE_RECONCILE_TIMEOUT_SECS") {
            self.reconcile_timeout =
                Duration::from_secs(parse_var("CONVERGE_RECONCILE_TIMEOUT_SECS", &timeout)?);
        }

        self.validate()?;
        Ok(self)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.conflict_retry.max_attempts == 0 {
            return Err(Error::invalid_config(
                "conflict_retry.max_attempts must be at least 1",
            ));
        }
        if self.requeue_backoff.base > self.requeue_backoff.max {
            return Err(Error::invalid_config(
                "requeue_backoff.base must not exceed requeue_backoff.max",
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::invalid_config("reconcile_timeout must be positive"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync_interval must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_config(format!("{key} has invalid value '{value}'")))
}

const fn default_task_ttl() -> Duration {
    Duration::from_secs(5)
}

const fn default_workers() -> usize {
    4
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_reconcile_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_backoff_base() -> Duration {
    Duration::from_millis(5)
}

const fn default_backoff_max() -> Duration {
    Duration::from_secs(300)
}

/// Serialization helper for Duration as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
