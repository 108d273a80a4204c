//! Error types for managed server processes.

use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use super::ProcessState;
use crate::render::RenderError;

/// Errors raised while starting or stopping a managed server.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The operation is not valid in the current state.
    #[error("cannot {operation} process '{name}' while it is {state}")]
    InvalidState {
        /// Fixture name.
        name: String,
        /// Requested operation.
        operation: &'static str,
        /// Current state.
        state: ProcessState,
    },
    /// No free port could be obtained from the operating system.
    #[error("failed to allocate a port on {host}: {source}")]
    PortAllocation {
        /// Host the allocation was attempted on.
        host: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The port is already taken by another listener.
    #[error(
        "port {port} on {host} is already in use; pin a different port with \
         elasticsearch_port or leave it unset to allocate one{}",
        tail_suffix(.log_tail.as_deref())
    )]
    PortInUse {
        /// Host checked.
        host: String,
        /// Port that was requested.
        port: u16,
        /// Server output when the conflict was reported by the server.
        log_tail: Option<String>,
    },
    /// Startup configuration could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// A directory or file needed by the server could not be prepared.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        /// Path being created or written.
        path: Utf8PathBuf,
        /// Filesystem failure.
        #[source]
        source: io::Error,
    },
    /// The executable could not be launched.
    #[error("failed to spawn '{executable}': {source}")]
    Spawn {
        /// Executable path.
        executable: Utf8PathBuf,
        /// Launch failure.
        #[source]
        source: io::Error,
    },
    /// Child status could not be polled.
    #[error("failed to monitor server process: {source}")]
    Monitor {
        /// Status polling failure.
        #[source]
        source: io::Error,
    },
    /// The HTTP client used for health polling could not be built.
    #[error("failed to build health check: {source}")]
    HealthClient {
        /// Client construction failure.
        #[source]
        source: reqwest::Error,
    },
    /// The server exited before reporting healthy.
    #[error(
        "server exited before reporting healthy (status: {}){}{}",
        exit_label(.exit_code),
        hints_suffix(.hints),
        tail_suffix(Some(.log_tail.as_str()))
    )]
    StartupFailed {
        /// Exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Likely causes derived from the configuration and log.
        hints: Vec<String>,
        /// Last lines of the process log.
        log_tail: String,
    },
    /// The server did not report healthy before the deadline.
    #[error(
        "server at {url} did not report healthy within {} ms{}",
        .timeout.as_millis(),
        tail_suffix(Some(.log_tail.as_str()))
    )]
    StartupTimeout {
        /// Health endpoint polled.
        url: String,
        /// Startup timeout.
        timeout: Duration,
        /// Last lines of the process log.
        log_tail: String,
    },
    /// A stop request arrived while the server was starting.
    #[error("startup of process '{name}' was cancelled by a stop request")]
    Cancelled {
        /// Fixture name.
        name: String,
    },
    /// The server could not be signalled.
    #[error("failed to signal server pid {pid}: {source}")]
    Signal {
        /// Process identifier.
        pid: u32,
        /// Signal delivery failure.
        #[source]
        source: io::Error,
    },
    /// The server could not be reaped after being killed.
    #[error("failed to reap server pid {pid}: {source}")]
    Reap {
        /// Process identifier.
        pid: u32,
        /// Wait failure.
        #[source]
        source: io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_owned(), |code| code.to_string())
}

fn tail_suffix(tail: Option<&str>) -> String {
    match tail.map(str::trim) {
        Some(tail) if !tail.is_empty() => format!("\nlast server output:\n{tail}"),
        _ => String::new(),
    }
}

fn hints_suffix(hints: &[String]) -> String {
    hints
        .iter()
        .map(|hint| format!("\nhint: {hint}"))
        .collect()
}
