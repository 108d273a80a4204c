use camino::Utf8PathBuf;
use std::env;

/// Default address the fixture binds and connects to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default address the server publishes to other nodes.
pub const DEFAULT_NETWORK_PUBLISH_HOST: &str = "127.0.0.1";

/// Default index store type; keeps test indices out of the data path.
pub const DEFAULT_INDEX_STORE_TYPE: &str = "memory";

/// Default prefix prepended to the per-instance logs directory name.
pub const DEFAULT_LOGS_PREFIX: &str = "";

/// Multicast discovery is disabled unless explicitly requested.
pub const DEFAULT_MULTICAST_ENABLED: bool = false;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of seconds a process may take to report healthy.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default destination for lifecycle events.
pub fn default_log_sink() -> crate::logging::LogSink {
    crate::logging::LogSink::Stderr
}

/// Directory under which per-instance logs directories are created.
///
/// Mirrors the platform temporary directory. Paths that are not valid UTF-8
/// fall back to `/tmp`.
pub fn default_logsdir() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
