//! Collector configuration loaded from TOML.
//!
//! Every section is optional and falls back to its defaults, so an empty
//! document (or no file at all) yields a runnable configuration that accepts
//! connections but routes nothing.
//!
//! ```
//! use event_collector::config::CollectorConfig;
//!
//! let config = CollectorConfig::from_toml_str(
//!     r#"
//!     [[routes]]
//!     domain = "perf3gpp"
//!     topic = "HV_VES_PERF3GPP"
//!     "#,
//! )
//! .expect("valid configuration");
//! assert_eq!(config.router().routes().len(), 1);
//! ```

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    codec::FrameCodec,
    frame::DEFAULT_MAX_PAYLOAD_SIZE,
    routing::{Route, RouteConfig, Router},
    server::BackoffConfig,
};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML or does not match the schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting that must be positive was zero.
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

/// Complete collector configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Listener and connection settings.
    pub server: ServerConfig,
    /// Pipeline settings.
    pub collector: PipelineConfig,
    /// Ordered routing table; the first matching domain wins.
    pub routes: Vec<RouteConfig>,
    /// Metrics exporter settings.
    pub metrics: MetricsConfig,
}

/// `[server]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the collector listens on.
    pub listen: SocketAddr,
    /// Number of accept loops sharing the listener.
    pub workers: usize,
    /// Seconds without inbound bytes before a connection is closed; 0
    /// disables the timeout.
    pub idle_timeout_secs: u64,
    /// Seconds a shutting-down connection waits for the sink to settle
    /// messages already handed to it.
    pub drain_timeout_secs: u64,
    /// Capacity of each socket read.
    pub read_buffer_size: usize,
    /// Accept-loop retry delays.
    pub backoff: BackoffSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 6061)),
            workers: 4,
            idle_timeout_secs: 60,
            drain_timeout_secs: 5,
            read_buffer_size: 8 * 1024,
            backoff: BackoffSettings::default(),
        }
    }
}

/// `[server.backoff]` section.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    /// First retry delay after an accept failure.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubling retry delay.
    pub max_delay_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 1000,
        }
    }
}

impl From<BackoffSettings> for BackoffConfig {
    fn from(settings: BackoffSettings) -> Self {
        BackoffConfig {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
        .normalized()
    }
}

/// `[collector]` section.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Largest accepted payload in bytes.
    pub max_payload_size: usize,
    /// Frames routed per pull before the connection waits on the sink.
    pub batch_size: usize,
    /// Routed messages buffered between a connection and its sink.
    pub sink_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            batch_size: 64,
            sink_capacity: 256,
        }
    }
}

/// `[metrics]` section.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address of the Prometheus scrape endpoint; unset disables it.
    pub listen: Option<SocketAddr>,
}

impl CollectorConfig {
    /// Load configuration from `path`, or defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, does not parse,
    /// or holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents and
    /// [`ConfigError::Zero`] when a size setting is zero.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that must be positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("collector.max_payload_size", self.collector.max_payload_size),
            ("collector.batch_size", self.collector.batch_size),
            ("collector.sink_capacity", self.collector.sink_capacity),
            ("server.workers", self.server.workers),
            ("server.read_buffer_size", self.server.read_buffer_size),
        ];
        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(name)),
            None => Ok(()),
        }
    }

    /// Codec enforcing the configured payload limit.
    #[must_use]
    pub fn codec(&self) -> FrameCodec { FrameCodec::new(self.collector.max_payload_size) }

    /// Router over the configured routes, in order.
    #[must_use]
    pub fn router(&self) -> Router { Router::new(self.routes.iter().cloned().map(Route::from)) }

    /// Idle timeout, or `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.server.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.server.idle_timeout_secs))
    }

    /// How long a connection waits for sink outcomes once shutdown starts.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.server.drain_timeout_secs)
    }
}
