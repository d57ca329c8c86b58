//! Wait bounds and polling cadence.
//!
//! Every wait in the protocol is unbounded by default: the peer's startup and
//! step times are unknown. Bounds are an opt-in hardening option.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bridge config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{field} must be a non-negative number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Sleep between checks for the lock artifact.
    pub poll_interval: Duration,
    /// Bound on discovery (lock polling) plus connect.
    pub connect_timeout: Option<Duration>,
    /// Bound on each accept-wait before a send or the termination frame.
    pub accept_timeout: Option<Duration>,
    /// Bound on the shutdown barrier.
    pub barrier_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: None,
            accept_timeout: None,
            barrier_timeout: None,
        }
    }
}

/// JSON form of [`BridgeConfig`], durations in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBridgeConfig {
    poll_interval_secs: Option<f64>,
    connect_timeout_secs: Option<f64>,
    accept_timeout_secs: Option<f64>,
    barrier_timeout_secs: Option<f64>,
}

impl BridgeConfig {
    /// Defaults, overlaid by `COSIM_BRIDGE_CONFIG` (JSON), then by the
    /// individual `COSIM_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(json) = std::env::var("COSIM_BRIDGE_CONFIG") {
            match Self::from_json(&json) {
                Ok(parsed) => config = parsed,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid COSIM_BRIDGE_CONFIG"),
            }
        }

        if let Some(d) = env_secs("COSIM_POLL_INTERVAL") {
            config.poll_interval = d;
        }
        if let Some(d) = env_secs("COSIM_CONNECT_TIMEOUT") {
            config.connect_timeout = Some(d);
        }
        if let Some(d) = env_secs("COSIM_ACCEPT_TIMEOUT") {
            config.accept_timeout = Some(d);
        }
        if let Some(d) = env_secs("COSIM_BARRIER_TIMEOUT") {
            config.barrier_timeout = Some(d);
        }
        config
    }

    /// Parse the JSON form; omitted fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawBridgeConfig = serde_json::from_str(json)?;
        let mut config = Self::default();
        if let Some(poll) = optional_secs("poll_interval_secs", raw.poll_interval_secs)? {
            config.poll_interval = poll;
        }
        config.connect_timeout = optional_secs("connect_timeout_secs", raw.connect_timeout_secs)?;
        config.accept_timeout = optional_secs("accept_timeout_secs", raw.accept_timeout_secs)?;
        config.barrier_timeout = optional_secs("barrier_timeout_secs", raw.barrier_timeout_secs)?;
        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }
}

fn optional_secs(
    field: &'static str,
    secs: Option<f64>,
) -> Result<Option<Duration>, ConfigError> {
    secs.map(|value| {
        secs_to_duration(value).ok_or(ConfigError::InvalidDuration { field, value })
    })
    .transpose()
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn env_secs(name: &str) -> Option<Duration> {
    let value = std::env::var(name).ok()?;
    match value.parse::<f64>().ok().and_then(secs_to_duration) {
        Some(d) => Some(d),
        None => {
            tracing::warn!(variable = name, %value, "Ignoring invalid duration");
            None
        }
    }
}
