//! Master and worker configuration, loaded the way every other crate in
//! this workspace loads it — through [`linksrus_support::config::ConfigBuilder`].

use std::time::Duration;

use linksrus_support::config::{get_env_parse_or, ConfigBuilder, ConfigError};

/// The cap the Open Question on retry/backoff bounds settled on for
/// anything resembling an attempt counter in this layer: 31, matching the
/// shift-by-attempt doubling the dialer (out of scope here) itself caps at.
pub const MAX_DIAL_ATTEMPTS: u32 = 31;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// How long `ReserveWorkers` waits for `min_workers` idle workers
    /// before giving up with `UnableToReserveWorkers`.
    pub worker_acquire_timeout: Duration,
    /// The minimum worker count a job needs to start.
    pub min_workers: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self { worker_acquire_timeout: Duration::from_secs(30), min_workers: 1 }
    }
}

impl ConfigBuilder for MasterConfig {
    fn from_env(prefix: &str) -> linksrus_support::config::Result<Self> {
        let defaults = Self::default();
        let acquire_secs = get_env_parse_or(
            &format!("{prefix}WORKER_ACQUIRE_TIMEOUT_SECS"),
            defaults.worker_acquire_timeout.as_secs(),
        )?;
        let min_workers = get_env_parse_or(&format!("{prefix}MIN_WORKERS"), defaults.min_workers)?;
        Ok(Self { worker_acquire_timeout: Duration::from_secs(acquire_secs), min_workers })
    }

    fn merge(&mut self, _other: Self) -> &mut Self {
        // Every field above is already resolved against its default inside
        // `from_env`, so there's nothing left for a second config to fill in.
        self
    }

    fn validate(&self) -> linksrus_support::config::Result<()> {
        if self.min_workers == 0 {
            return Err(ConfigError::new("min_workers must be at least 1"));
        }
        if self.worker_acquire_timeout.is_zero() {
            return Err(ConfigError::new("worker_acquire_timeout must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a worker waits to dial the master before giving up.
    pub dial_timeout: Duration,
    /// Dial attempts before the worker gives up connecting entirely,
    /// capped at [`MAX_DIAL_ATTEMPTS`].
    pub max_dial_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { dial_timeout: Duration::from_secs(10), max_dial_attempts: 5 }
    }
}

impl ConfigBuilder for WorkerConfig {
    fn from_env(prefix: &str) -> linksrus_support::config::Result<Self> {
        let defaults = Self::default();
        let dial_secs = get_env_parse_or(&format!("{prefix}DIAL_TIMEOUT_SECS"), defaults.dial_timeout.as_secs())?;
        let max_dial_attempts =
            get_env_parse_or(&format!("{prefix}MAX_DIAL_ATTEMPTS"), defaults.max_dial_attempts)?;
        Ok(Self { dial_timeout: Duration::from_secs(dial_secs), max_dial_attempts })
    }

    fn merge(&mut self, _other: Self) -> &mut Self {
        self
    }

    fn validate(&self) -> linksrus_support::config::Result<()> {
        if self.max_dial_attempts == 0 {
            return Err(ConfigError::new("max_dial_attempts must be at least 1"));
        }
        if self.max_dial_attempts > MAX_DIAL_ATTEMPTS {
            return Err(ConfigError::new(format!(
                "max_dial_attempts must not exceed {MAX_DIAL_ATTEMPTS}"
            )));
        }
        Ok(())
    }
}
