//! Lifecycle management for Elasticsearch server processes.
//!
//! This module is split into focused submodules:
//! - [`error`] captures the error surface.
//! - `ports` allocates TCP ports and detects pinned ones in use.
//! - `artefacts` creates and removes per-instance files and directories.
//! - `log` captures server output.
//! - `spawning` launches the server.
//! - [`monitoring`] polls the health endpoint during startup.
//! - [`shutdown`] terminates the server.
//!
//! [`ManagedProcess`] ties them together behind a small state machine:
//! `NotStarted -> Starting -> Healthy -> Stopping -> Stopped`, with
//! `Starting -> Failed` on any startup error. A stop request that arrives
//! while the server is starting ends the health wait early and leaves the
//! process `Stopped`.

mod artefacts;
pub mod error;
mod log;
pub mod monitoring;
mod ports;
pub mod shutdown;
mod spawning;

use std::fmt;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use esfixture_config::{DEFAULT_STARTUP_TIMEOUT_SECS, EffectiveConfig, default_logsdir};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};
use url::Url;

pub use error::ProcessError;
pub use log::PROCESS_LOG_NAME;
pub use monitoring::{HealthCheck, HttpHealthCheck, POLL_INTERVAL};
pub use shutdown::{DEFAULT_SHUTDOWN_GRACE, Termination};

use self::artefacts::Artefacts;
use self::log::{ProcessLog, TAIL_LINES};
use self::monitoring::{Polling, ReadinessFailure, wait_for_healthy};
use crate::render::{Instance, RenderedConfig, distribution_config_dir, render};
use crate::version::Version;

/// Log target for process lifecycle events.
pub(crate) const PROCESS_TARGET: &str = "esfixture::process";

const CLUSTER_SUFFIX_LEN: usize = 8;

/// Lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not launched yet.
    NotStarted,
    /// Launched and waiting for the health endpoint.
    Starting,
    /// Answering on its health endpoint.
    Healthy,
    /// Being terminated.
    Stopping,
    /// Terminated and cleaned up.
    Stopped,
    /// Startup failed; the instance cannot be started again.
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Timing knobs for starting and stopping a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Upper bound on the wait for the health endpoint.
    pub startup_timeout: Duration,
    /// Time a server gets to exit after `SIGTERM`.
    pub shutdown_grace: Duration,
    /// Interval between health polls.
    pub poll_interval: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl LaunchOptions {
    /// Replaces the startup timeout.
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Replaces the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: ProcessState,
    port: Option<u16>,
    pid: Option<u32>,
    command: Vec<String>,
    rendered: Option<RenderedConfig>,
    child: Option<Child>,
    log: Option<ProcessLog>,
    artefacts: Artefacts,
}

impl Inner {
    fn child_alive(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }
}

/// One Elasticsearch server owned by a fixture.
///
/// The process is started explicitly with [`start`](Self::start) and stopped
/// with [`stop`](Self::stop) or on drop. State sits behind a mutex so client
/// handles can share the instance through an `Arc`. The mutex is held while
/// the server starts; [`stop`](Self::stop) raises a flag first so a pending
/// startup gives up at its next health poll instead of running to its
/// deadline.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    executable: Utf8PathBuf,
    config: EffectiveConfig,
    version: Version,
    options: LaunchOptions,
    scratch_dir: Utf8PathBuf,
    stop_requested: AtomicBool,
    inner: Mutex<Inner>,
}

impl ManagedProcess {
    /// Describes a server that has not been started.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<Utf8PathBuf>,
        config: EffectiveConfig,
        version: Version,
        options: LaunchOptions,
    ) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            config,
            version,
            options,
            scratch_dir: default_logsdir(),
            stop_requested: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: ProcessState::NotStarted,
                port: None,
                pid: None,
                command: Vec::new(),
                rendered: None,
                child: None,
                log: None,
                artefacts: Artefacts::default(),
            }),
        }
    }

    /// Fixture name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server executable.
    #[must_use]
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// Detected server version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Address clients connect to.
    #[must_use]
    pub fn host(&self) -> &str {
        self.config.host()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    /// Assigned port, once allocated.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.lock().port
    }

    /// Operating-system process identifier while the server runs.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Executable and arguments used for the last launch.
    #[must_use]
    pub fn command_parts(&self) -> Vec<String> {
        self.lock().command.clone()
    }

    /// Startup configuration used for the last launch.
    #[must_use]
    pub fn rendered(&self) -> Option<RenderedConfig> {
        self.lock().rendered.clone()
    }

    /// Per-instance logs directory, once a port is assigned.
    #[must_use]
    pub fn logs_path(&self) -> Option<Utf8PathBuf> {
        self.port().map(|port| self.config.logs_path(port))
    }

    /// Base URL of the HTTP interface, once a port is assigned.
    #[must_use]
    pub fn base_url(&self) -> Option<Url> {
        self.port().and_then(|port| base_url(self.host(), port))
    }

    /// Whether the server process is alive and has not been stopped.
    #[must_use]
    pub fn running(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, ProcessState::Stopped | ProcessState::Failed) {
            return false;
        }
        inner.child_alive()
    }

    /// Launches the server and blocks until it reports healthy.
    ///
    /// Starting a healthy process whose server is still alive is a no-op.
    /// One whose server has exited since is cleaned up and launched again,
    /// as is a stopped process. A failed one may not be started again.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Cancelled`] when [`stop`](Self::stop) is
    /// called before the server reports healthy; the state is then
    /// [`ProcessState::Stopped`]. Returns another [`ProcessError`] when the
    /// port is taken, rendering fails, the server cannot be spawned, exits
    /// early, or misses the startup deadline; the state is then
    /// [`ProcessState::Failed`]. Generated files have been removed in both
    /// cases.
    pub fn start(&self) -> Result<(), ProcessError> {
        let mut inner = self.lock();
        let current = inner.state;
        match current {
            ProcessState::Healthy if inner.child_alive() => return Ok(()),
            ProcessState::Healthy => {
                warn!(
                    target: PROCESS_TARGET,
                    name = %self.name,
                    pid = ?inner.pid,
                    "server exited after becoming healthy; launching it again"
                );
                self.release(&mut inner);
                inner.state = ProcessState::Stopped;
            }
            ProcessState::NotStarted | ProcessState::Stopped => {}
            ProcessState::Starting | ProcessState::Stopping | ProcessState::Failed => {
                return Err(ProcessError::InvalidState {
                    name: self.name.clone(),
                    operation: "start",
                    state: current,
                });
            }
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        inner.state = ProcessState::Starting;
        match self.launch(&mut inner) {
            Ok(attempts) => {
                inner.state = ProcessState::Healthy;
                info!(
                    target: PROCESS_TARGET,
                    name = %self.name,
                    version = %self.version,
                    port = ?inner.port,
                    pid = ?inner.pid,
                    attempts,
                    "server is healthy"
                );
                Ok(())
            }
            Err(error @ ProcessError::Cancelled { .. }) => {
                self.release(&mut inner);
                inner.state = ProcessState::Stopped;
                info!(
                    target: PROCESS_TARGET,
                    name = %self.name,
                    "server startup cancelled"
                );
                Err(error)
            }
            Err(error) => {
                self.release(&mut inner);
                inner.state = ProcessState::Failed;
                warn!(
                    target: PROCESS_TARGET,
                    name = %self.name,
                    error = %error,
                    "server failed to start"
                );
                Err(error)
            }
        }
    }

    /// Terminates the server and removes its generated files.
    ///
    /// Stopping a process that is not running succeeds. Called while another
    /// thread is in [`start`](Self::start), it makes that startup give up and
    /// then finds the process already stopped.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] when the server could neither be signalled
    /// nor killed. Generated files are removed regardless.
    pub fn stop(&self) -> Result<(), ProcessError> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut inner = self.lock();
        match inner.state {
            ProcessState::NotStarted | ProcessState::Stopped | ProcessState::Failed => {
                return Ok(());
            }
            ProcessState::Starting | ProcessState::Healthy | ProcessState::Stopping => {}
        }
        inner.state = ProcessState::Stopping;
        let outcome = inner
            .child
            .as_mut()
            .map(|child| shutdown::terminate_child(child, self.options.shutdown_grace))
            .transpose();
        self.release(&mut inner);
        inner.state = ProcessState::Stopped;
        let termination = outcome?;
        info!(
            target: PROCESS_TARGET,
            name = %self.name,
            ?termination,
            "server stopped"
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(&self, inner: &mut Inner) -> Result<u32, ProcessError> {
        let host = self.config.host();
        let port = match self.config.port() {
            Some(pinned) => {
                ports::ensure_port_available(host, pinned)?;
                pinned
            }
            None => ports::allocate_port(host)?,
        };
        inner.port = Some(port);

        let cluster_name = self
            .config
            .cluster_name()
            .map_or_else(|| generate_cluster_name(port), ToOwned::to_owned);
        let instance = Instance::new(port, cluster_name, self.scratch_dir.clone())
            .with_distribution_config(distribution_config_dir(&self.executable));
        let rendered = render(&self.config, self.version, &instance)?;
        let logs_path = self.config.logs_path(port);
        inner.artefacts.prepare(&instance, &rendered, &logs_path)?;
        let log = ProcessLog::create(&logs_path)?;

        inner.command = rendered.command_line(&self.executable);
        let spawned = spawning::spawn_server(&self.executable, &rendered, &log)?;
        inner.pid = Some(spawned.id());
        inner.rendered = Some(rendered);
        let output = inner.log.insert(log);
        let child = inner.child.insert(spawned);

        let url = base_url(host, port).ok_or_else(|| ProcessError::Prepare {
            path: logs_path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{host}:{port}' is not a valid HTTP address"),
            ),
        })?;
        let check = HttpHealthCheck::new()?;
        let polling = Polling {
            timeout: self.options.startup_timeout,
            interval: self.options.poll_interval,
        };
        wait_for_healthy(child, &check, &url, polling, || {
            self.stop_requested.load(Ordering::SeqCst)
        })
        .map_err(|failure| self.explain(failure, host, port, &url, output))
    }

    fn explain(
        &self,
        failure: ReadinessFailure,
        host: &str,
        port: u16,
        url: &Url,
        log: &ProcessLog,
    ) -> ProcessError {
        let log_tail = log.tail(TAIL_LINES);
        match failure {
            ReadinessFailure::Monitor(source) => ProcessError::Monitor { source },
            ReadinessFailure::Cancelled => ProcessError::Cancelled {
                name: self.name.clone(),
            },
            ReadinessFailure::TimedOut => ProcessError::StartupTimeout {
                url: url.to_string(),
                timeout: self.options.startup_timeout,
                log_tail,
            },
            ReadinessFailure::Exited(_) if reports_address_in_use(&log_tail) => {
                ProcessError::PortInUse {
                    host: host.to_owned(),
                    port,
                    log_tail: Some(log_tail),
                }
            }
            ReadinessFailure::Exited(status) => ProcessError::StartupFailed {
                exit_code: status.code(),
                hints: startup_hints(&self.config, self.version, &log_tail, log.path()),
                log_tail,
            },
        }
    }

    /// Kills any child and removes generated files.
    fn release(&self, inner: &mut Inner) {
        if let Some(mut child) = inner.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(error) = child.kill() {
                    warn!(
                        target: PROCESS_TARGET,
                        name = %self.name,
                        error = %error,
                        "failed to kill server process"
                    );
                }
            }
            if let Err(error) = child.wait() {
                warn!(
                    target: PROCESS_TARGET,
                    name = %self.name,
                    error = %error,
                    "failed to reap server process"
                );
            }
        }
        inner.pid = None;
        inner.log = None;
        inner.artefacts.cleanup();
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(
                target: PROCESS_TARGET,
                name = %self.name,
                error = %error,
                "failed to stop server during drop"
            );
        }
    }
}

fn base_url(host: &str, port: u16) -> Option<Url> {
    Url::parse(&format!("http://{host}:{port}/")).ok()
}

/// Random cluster name for an instance on `port`.
pub(crate) fn generate_cluster_name(port: u16) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLUSTER_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("elasticsearch_cluster_{port}_{suffix}")
}

fn reports_address_in_use(log_tail: &str) -> bool {
    log_tail.contains("Address already in use") || log_tail.contains("BindException")
}

fn startup_hints(
    config: &EffectiveConfig,
    version: Version,
    log_tail: &str,
    log_path: &Utf8Path,
) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(dir) = config.configuration_path() {
        if !dir.join("elasticsearch.yml").is_file() {
            hints.push(format!(
                "configuration directory {dir} has no elasticsearch.yml; \
                 server {version} may need a complete configuration directory"
            ));
        }
    }
    if log_tail.contains("unknown setting") {
        hints.push(format!(
            "the server rejected a setting; check the extra settings suit version {version}"
        ));
    }
    if log_tail.contains("JAVA_HOME") || log_tail.contains("java: not found") {
        hints.push("no usable Java runtime was found; set JAVA_HOME".to_owned());
    }
    hints.push(format!("full server output is in {log_path}"));
    hints
}

#[cfg(test)]
mod tests {
    use esfixture_config::{SettingsLayer, resolve};
    use rstest::rstest;

    use super::*;

    fn process_with(layer: SettingsLayer) -> ManagedProcess {
        ManagedProcess::new(
            "elasticsearch_proc",
            "/nonexistent/elasticsearch-6.2.3/bin/elasticsearch",
            resolve(&layer, &SettingsLayer::default(), &SettingsLayer::default()),
            Version::new(6, 2, 3),
            LaunchOptions::default(),
        )
    }

    #[test]
    fn new_process_is_not_running() {
        let process = process_with(SettingsLayer::default());

        assert_eq!(process.state(), ProcessState::NotStarted);
        assert!(!process.running());
        assert_eq!(process.port(), None);
        assert_eq!(process.pid(), None);
        assert!(process.command_parts().is_empty());
        process.stop().expect("stopping an unstarted process succeeds");
    }

    #[test]
    fn spawn_failure_marks_process_failed() {
        let logs = tempfile::TempDir::new().expect("logs dir");
        let logsdir = Utf8PathBuf::from_path_buf(logs.path().to_path_buf()).expect("utf8");
        let process = process_with(SettingsLayer::default().with_logsdir(logsdir));

        let error = process.start().expect_err("spawn must fail");

        assert!(matches!(error, ProcessError::Spawn { .. }));
        assert_eq!(process.state(), ProcessState::Failed);
        assert!(!process.running());
        let retry = process.start().expect_err("failed process cannot restart");
        assert!(matches!(
            retry,
            ProcessError::InvalidState {
                state: ProcessState::Failed,
                ..
            }
        ));
    }

    #[test]
    fn cluster_names_are_random_per_call() {
        let first = generate_cluster_name(9200);
        let second = generate_cluster_name(9200);

        assert!(first.starts_with("elasticsearch_cluster_9200_"));
        assert_eq!(first.len(), "elasticsearch_cluster_9200_".len() + CLUSTER_SUFFIX_LEN);
        assert_ne!(first, second);
    }

    #[rstest]
    #[case::address_in_use("java.net.BindException: Address already in use", true)]
    #[case::bind_exception("BindHttpException[Failed to bind]; BindException[...]", true)]
    #[case::unrelated("started", false)]
    fn detects_address_in_use(#[case] tail: &str, #[case] expected: bool) {
        assert_eq!(reports_address_in_use(tail), expected);
    }

    #[test]
    fn hints_point_at_the_log() {
        let config = EffectiveConfig::default();
        let hints = startup_hints(
            &config,
            Version::new(6, 2, 3),
            "java.lang.IllegalArgumentException: unknown setting [foo.bar]",
            Utf8Path::new("/tmp/elasticsearch_9200_logs/process.log"),
        );

        assert_eq!(hints.len(), 2);
        assert!(hints[0].contains("rejected a setting"));
        assert!(hints[1].ends_with("/tmp/elasticsearch_9200_logs/process.log"));
    }

    #[test]
    fn state_labels_are_lowercase() {
        assert_eq!(ProcessState::NotStarted.to_string(), "not started");
        assert_eq!(ProcessState::Healthy.to_string(), "healthy");
    }
}
