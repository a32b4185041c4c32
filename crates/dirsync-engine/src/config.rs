//! Synchronization configuration loading and types.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use dirsync_directory::{FetchPolicy, RetryConfig};

use crate::chain::SourceConfig;
use crate::error::{SyncError, SyncResult};
use crate::logging::LoggingConfig;

/// Root synchronization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Lease TTL of the cluster lock, in seconds. Renewed every TTL/2.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Per-source fetch budget, in seconds, retries included.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Maximum number of sources queried at the same time.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// When false, full runs only log the principals they would delete.
    #[serde(default = "default_true")]
    pub allow_deletions: bool,
    /// Run a differential sync for every tenant at startup.
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,
    /// Look unknown identities up along the chain when they log in.
    #[serde(default = "default_true")]
    pub sync_when_missing_principal_logs_in: bool,
    /// Progress is logged (and the lease checked) every this many records.
    #[serde(default = "default_logging_interval")]
    pub logging_interval: usize,
    /// Lock acquisition attempts for on-demand runs.
    #[serde(default = "default_on_demand_lock_attempts")]
    pub on_demand_lock_attempts: u32,
    /// Delay between those attempts, in milliseconds.
    #[serde(default = "default_on_demand_lock_retry_delay_ms")]
    pub on_demand_lock_retry_delay_ms: u64,
    /// Retries of transient fetch errors.
    #[serde(default)]
    pub fetch_retry: RetryConfig,
    /// Source chain, highest priority first.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_lock_ttl_secs() -> u64 {
    120
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent_fetches() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_logging_interval() -> usize {
    100
}

fn default_on_demand_lock_attempts() -> u32 {
    10
}

fn default_on_demand_lock_retry_delay_ms() -> u64 {
    3000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            allow_deletions: true,
            sync_on_startup: true,
            sync_when_missing_principal_logs_in: true,
            logging_interval: default_logging_interval(),
            on_demand_lock_attempts: default_on_demand_lock_attempts(),
            on_demand_lock_retry_delay_ms: default_on_demand_lock_retry_delay_ms(),
            fetch_retry: RetryConfig::default(),
            sources: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SyncError::configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> SyncResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SyncError::configuration(format!("Failed to parse config: {e}")))
    }

    /// Apply `DIRSYNC_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> SyncResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized variables:
    /// - `DIRSYNC_LOCK_TTL_SECS`
    /// - `DIRSYNC_FETCH_TIMEOUT_SECS`
    /// - `DIRSYNC_MAX_CONCURRENT_FETCHES`
    /// - `DIRSYNC_ALLOW_DELETIONS`
    /// - `DIRSYNC_SYNC_ON_STARTUP`
    /// - `DIRSYNC_SYNC_WHEN_MISSING_PRINCIPAL_LOGS_IN`
    /// - `DIRSYNC_LOGGING_INTERVAL`
    /// - `DIRSYNC_ON_DEMAND_LOCK_ATTEMPTS`
    /// - `DIRSYNC_ON_DEMAND_LOCK_RETRY_DELAY_MS`
    /// - `DIRSYNC_LOG_LEVEL`, `DIRSYNC_LOG_FORMAT`
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> SyncResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "DIRSYNC_LOCK_TTL_SECS", &mut self.lock_ttl_secs)?;
        override_parsed(&lookup, "DIRSYNC_FETCH_TIMEOUT_SECS", &mut self.fetch_timeout_secs)?;
        override_parsed(
            &lookup,
            "DIRSYNC_MAX_CONCURRENT_FETCHES",
            &mut self.max_concurrent_fetches,
        )?;
        override_parsed(&lookup, "DIRSYNC_ALLOW_DELETIONS", &mut self.allow_deletions)?;
        override_parsed(&lookup, "DIRSYNC_SYNC_ON_STARTUP", &mut self.sync_on_startup)?;
        override_parsed(
            &lookup,
            "DIRSYNC_SYNC_WHEN_MISSING_PRINCIPAL_LOGS_IN",
            &mut self.sync_when_missing_principal_logs_in,
        )?;
        override_parsed(&lookup, "DIRSYNC_LOGGING_INTERVAL", &mut self.logging_interval)?;
        override_parsed(
            &lookup,
            "DIRSYNC_ON_DEMAND_LOCK_ATTEMPTS",
            &mut self.on_demand_lock_attempts,
        )?;
        override_parsed(
            &lookup,
            "DIRSYNC_ON_DEMAND_LOCK_RETRY_DELAY_MS",
            &mut self.on_demand_lock_retry_delay_ms,
        )?;
        if let Some(level) = lookup("DIRSYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_parsed(&lookup, "DIRSYNC_LOG_FORMAT", &mut self.logging.format)?;
        Ok(())
    }

    /// Check the values are usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.lock_ttl_secs == 0 {
            return Err(SyncError::configuration("lock_ttl_secs must be greater than 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(SyncError::configuration(
                "fetch_timeout_secs must be greater than 0",
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(SyncError::configuration(
                "max_concurrent_fetches must be greater than 0",
            ));
        }
        if self.logging_interval == 0 {
            return Err(SyncError::configuration(
                "logging_interval must be greater than 0",
            ));
        }
        if self.on_demand_lock_attempts == 0 {
            return Err(SyncError::configuration(
                "on_demand_lock_attempts must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Lease TTL.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Delay between on-demand lock attempts.
    #[must_use]
    pub fn on_demand_lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.on_demand_lock_retry_delay_ms)
    }

    /// Timeout and retry policy for source queries.
    #[must_use]
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy::new(
            Duration::from_secs(self.fetch_timeout_secs),
            self.fetch_retry.clone(),
        )
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> SyncResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| SyncError::configuration(format!("Invalid value for {name}: {e}")))?;
    }
    Ok(())
}
