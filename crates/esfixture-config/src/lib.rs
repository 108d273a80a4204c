//! Configuration shared by the Elasticsearch fixture runtime and its CLI.
//!
//! Fixture settings arrive from three independent sources: the call site that
//! declares a fixture, command-line options passed through by a test runner,
//! and the project configuration. [`SettingsLayer`] models one source and
//! [`resolve`] merges the three into an [`EffectiveConfig`]. The project
//! source itself is loaded with `ortho_config` through [`Config`].

mod config;
mod defaults;
mod logging;
mod resolver;
mod settings;

pub use config::Config;
pub use defaults::{
    DEFAULT_HOST, DEFAULT_INDEX_STORE_TYPE, DEFAULT_LOG_FILTER, DEFAULT_LOGS_PREFIX,
    DEFAULT_MULTICAST_ENABLED, DEFAULT_NETWORK_PUBLISH_HOST, DEFAULT_STARTUP_TIMEOUT_SECS,
    default_log_filter, default_log_format, default_log_sink, default_logsdir,
};
pub use logging::{LogFormat, LogFormatParseError, LogSink};
pub use resolver::{EffectiveConfig, resolve};
pub use settings::{Setting, SettingsError, SettingsLayer};
