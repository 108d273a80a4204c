//! Project configuration surface loaded through `ortho_config`.
//!
//! Values are layered as defaults, configuration file, `ESFIXTURE_*`
//! environment variables, then command-line flags. The file is located via
//! `--config-path` or `ESFIXTURE_CONFIG_PATH`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_STARTUP_TIMEOUT_SECS, default_log_filter, default_log_format, default_log_sink,
};
use crate::logging::{LogFormat, LogSink};
use crate::settings::SettingsLayer;

/// Project-level configuration shared by the binaries and fixture scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ESFIXTURE")]
pub struct Config {
    /// Tracing filter expression.
    pub log_filter: Option<String>,
    /// Tracing output format.
    pub log_format: Option<LogFormat>,
    /// Destination of tracing output.
    pub log_sink: Option<LogSink>,
    /// Default server executable.
    pub executable: Option<Utf8PathBuf>,
    /// Seconds a process may take to report healthy.
    pub startup_timeout_secs: Option<u64>,
    /// Directory receiving per-instance logs directories.
    pub logsdir: Option<Utf8PathBuf>,
    /// HTTP port.
    pub port: Option<u16>,
    /// Address the fixture connects to.
    pub host: Option<String>,
    /// Cluster name.
    pub cluster_name: Option<String>,
    /// Address the server publishes.
    pub network_publish_host: Option<String>,
    /// Whether multicast discovery is enabled.
    pub discovery_zen_ping_multicast_enabled: Option<bool>,
    /// Index store type.
    pub index_store_type: Option<String>,
    /// Prefix for per-instance logs directory names.
    pub logs_prefix: Option<String>,
    /// Server configuration directory override.
    pub configuration_path: Option<Utf8PathBuf>,
}

impl Config {
    /// Tracing filter, falling back to the default.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(default_log_filter())
    }

    /// Tracing output format, falling back to the default.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Destination of tracing output, falling back to the default.
    #[must_use]
    pub fn log_sink(&self) -> LogSink {
        self.log_sink.unwrap_or_else(default_log_sink)
    }

    /// Upper bound on the wait for a process to report healthy.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs.unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS))
    }

    /// Fixture settings supplied by the project configuration.
    #[must_use]
    pub fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer {
            logsdir: self.logsdir.clone(),
            port: self.port,
            host: self.host.clone(),
            cluster_name: self.cluster_name.clone(),
            network_publish_host: self.network_publish_host.clone(),
            discovery_zen_ping_multicast_enabled: self.discovery_zen_ping_multicast_enabled,
            index_store_type: self.index_store_type.clone(),
            logs_prefix: self.logs_prefix.clone(),
            configuration_path: self.configuration_path.clone(),
            extra: Default::default(),
        }
    }
}
