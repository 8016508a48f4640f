//! Configuration loading for the gateway.
//!
//! Settings are loaded from a TOML file (default: `config/default.toml`) with
//! environment-variable overrides prefixed `RGA_GATEWAY_`, using `__` as the
//! section separator:
//!
//! ```text
//! RGA_GATEWAY_INSTRUMENT__HOST=10.0.0.7
//! RGA_GATEWAY_PROTOCOL__PERSISTENCE_SECS=30
//! ```
//!
//! Duration fields accept humantime strings in TOML ("20s", "500ms").

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Instrument service endpoint.
    pub instrument: InstrumentSettings,
    /// Experiment file settings.
    #[serde(default)]
    pub experiment: ExperimentSettings,
    /// Wire protocol settings.
    #[serde(default)]
    pub protocol: ProtocolSettings,
    /// Acquisition loop settings.
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
}

/// Instrument service endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSettings {
    /// Host name or address of the control service.
    pub host: String,
    /// TCP port the control service listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Experiment file settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentSettings {
    /// Experiment root directory, expressed in the control service's own
    /// (Windows) path syntax regardless of the gateway's host platform.
    #[serde(default = "default_directory")]
    pub directory: String,
    /// Service-side macro naming the most recently used experiment file.
    #[serde(default = "default_last_file_macro")]
    pub last_file_macro: String,
}

/// Wire protocol settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSettings {
    /// Socket read timeout. A read that exceeds this is reported as an empty
    /// response, not an error.
    #[serde(with = "humantime_serde", default = "default_socket_timeout")]
    pub socket_timeout: Duration,
    /// Server-side retry budget appended to every command as `-d<secs>`.
    #[serde(default = "default_persistence_secs")]
    pub persistence_secs: u64,
}

/// Acquisition loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionSettings {
    /// Period of the data polling loop.
    #[serde(with = "humantime_serde", default = "default_tick_period")]
    pub tick_period: Duration,
    /// Delay between legend retry attempts.
    #[serde(with = "humantime_serde", default = "default_legend_retry_delay")]
    pub legend_retry_delay: Duration,
    /// Optional cap on legend retry attempts. Absent means retry until the
    /// service answers, matching the control service's own open-ended
    /// "not ready yet" window.
    #[serde(default)]
    pub legend_max_attempts: Option<u32>,
    /// Delay between status polls while monitoring for a stopped state.
    #[serde(with = "humantime_serde", default = "default_status_poll_period")]
    pub status_poll_period: Duration,
}

fn default_port() -> u16 {
    5026
}

fn default_directory() -> String {
    r"C:\Users\08id-user\Documents\Hiden Analytical\MASsoft\11".to_string()
}

fn default_last_file_macro() -> String {
    "%HIDEN_LastFile%".to_string()
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_persistence_secs() -> u64 {
    20
}

fn default_tick_period() -> Duration {
    Duration::from_secs(1)
}

fn default_legend_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_status_poll_period() -> Duration {
    Duration::from_secs(1)
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            last_file_macro: default_last_file_macro(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            socket_timeout: default_socket_timeout(),
            persistence_secs: default_persistence_secs(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            tick_period: default_tick_period(),
            legend_retry_delay: default_legend_retry_delay(),
            legend_max_attempts: None,
            status_poll_period: default_status_poll_period(),
        }
    }
}

impl Settings {
    /// Load settings from the given TOML file, or from `config/default.toml`
    /// when `path` is `None`, then apply environment overrides.
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(p) => Config::builder().add_source(File::with_name(p)),
            None => Config::builder().add_source(File::with_name("config/default").required(false)),
        };
        builder
            .add_source(Environment::with_prefix("RGA_GATEWAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Settings pointed at an arbitrary endpoint with every other field at
    /// its default. Used by the probe tool and tests.
    pub fn for_endpoint(host: &str, port: u16) -> Self {
        Self {
            instrument: InstrumentSettings {
                host: host.to_string(),
                port,
            },
            experiment: ExperimentSettings::default(),
            protocol: ProtocolSettings::default(),
            acquisition: AcquisitionSettings::default(),
        }
    }
}
