//! Fixture definitions and scoped acquisition.
//!
//! [`elasticsearch_proc`] and [`elasticsearch`] build fixture definitions.
//! A [`FixtureScope`] plays the part of a test runner's scope: it starts a
//! process the first time a test asks for it, hands the same instance to
//! every later request, and tears everything down when it is closed or
//! dropped, whatever the outcome of the tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use esfixture_config::{Config, SettingsLayer, resolve};
use tracing::{debug, info, warn};

use crate::client::{ElasticsearchClient, ReadinessWindow};
use crate::error::FixtureError;
use crate::process::{LaunchOptions, ManagedProcess};
use crate::version::VersionCache;

/// Log target for fixture acquisition.
pub(crate) const FIXTURE_TARGET: &str = "esfixture::fixture";

/// Settings a test runner supplies to every fixture in a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerSettings {
    option: SettingsLayer,
    ini: SettingsLayer,
    launch: LaunchOptions,
}

impl RunnerSettings {
    /// Combines command-line option and project configuration layers.
    #[must_use]
    pub fn new(option: SettingsLayer, ini: SettingsLayer) -> Self {
        Self {
            option,
            ini,
            launch: LaunchOptions::default(),
        }
    }

    /// Uses the loaded project configuration as the project layer.
    #[must_use]
    pub fn from_config(config: &Config, option: SettingsLayer) -> Self {
        Self {
            option,
            ini: config.settings_layer(),
            launch: LaunchOptions::default().with_startup_timeout(config.startup_timeout()),
        }
    }

    /// Replaces the launch options used by fixtures that set none.
    #[must_use]
    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    /// Command-line option layer.
    #[must_use]
    pub fn option(&self) -> &SettingsLayer {
        &self.option
    }

    /// Project configuration layer.
    #[must_use]
    pub fn ini(&self) -> &SettingsLayer {
        &self.ini
    }

    /// Launch options used by fixtures that set none.
    #[must_use]
    pub const fn launch(&self) -> LaunchOptions {
        self.launch
    }
}

/// Definition of a process fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFixture {
    name: String,
    executable: Utf8PathBuf,
    settings: SettingsLayer,
    launch: Option<LaunchOptions>,
}

/// Defines a process fixture named `name` running `executable`.
///
/// Call-site settings are added with
/// [`with_settings`](ProcessFixture::with_settings).
#[must_use]
pub fn elasticsearch_proc(
    name: impl Into<String>,
    executable: impl Into<Utf8PathBuf>,
) -> ProcessFixture {
    ProcessFixture {
        name: name.into(),
        executable: executable.into(),
        settings: SettingsLayer::default(),
        launch: None,
    }
}

impl ProcessFixture {
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

    /// Call-site settings.
    #[must_use]
    pub fn settings(&self) -> &SettingsLayer {
        &self.settings
    }

    /// Replaces the call-site settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SettingsLayer) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the call-site settings with raw option name/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Settings`] for unknown names or unparseable
    /// values.
    pub fn with_setting_pairs<I, K, V>(self, pairs: I) -> Result<Self, FixtureError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let settings = SettingsLayer::from_pairs(pairs)?;
        Ok(self.with_settings(settings))
    }

    /// Overrides the runner's launch options for this fixture.
    #[must_use]
    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = Some(launch);
        self
    }

    /// Creates an unstarted lifecycle manager for this fixture.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Version`] when the executable's version cannot
    /// be detected.
    pub fn instantiate(
        &self,
        runner: &RunnerSettings,
        versions: &VersionCache,
    ) -> Result<ManagedProcess, FixtureError> {
        let config = resolve(&self.settings, runner.option(), runner.ini());
        let version = versions.detect(&self.executable)?;
        Ok(ManagedProcess::new(
            self.name.clone(),
            self.executable.clone(),
            config,
            version,
            self.launch.unwrap_or_else(|| runner.launch()),
        ))
    }
}

/// Definition of a client fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFixture {
    process: String,
    window: ReadinessWindow,
}

/// Defines a client fixture for the process fixture named `process`.
#[must_use]
pub fn elasticsearch(process: impl Into<String>) -> ClientFixture {
    ClientFixture {
        process: process.into(),
        window: ReadinessWindow::default(),
    }
}

impl ClientFixture {
    /// Name of the process fixture the client connects to.
    #[must_use]
    pub fn process_name(&self) -> &str {
        &self.process
    }

    /// Replaces the readiness window.
    #[must_use]
    pub fn with_window(mut self, window: ReadinessWindow) -> Self {
        self.window = window;
        self
    }
}

/// Scope owning fixture instances until it is closed.
#[derive(Debug)]
pub struct FixtureScope {
    runner: RunnerSettings,
    versions: Arc<VersionCache>,
    definitions: BTreeMap<String, ProcessFixture>,
    processes: Vec<Arc<ManagedProcess>>,
    clients: Vec<Arc<ElasticsearchClient>>,
}

impl FixtureScope {
    /// Opens a scope. `versions` may be shared with other scopes.
    #[must_use]
    pub fn new(runner: RunnerSettings, versions: Arc<VersionCache>) -> Self {
        Self {
            runner,
            versions,
            definitions: BTreeMap::new(),
            processes: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Makes a process fixture available under its name.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::DuplicateFixture`] when the name is taken.
    pub fn register(&mut self, fixture: ProcessFixture) -> Result<(), FixtureError> {
        if self.definitions.contains_key(fixture.name()) {
            return Err(FixtureError::DuplicateFixture {
                name: fixture.name().to_owned(),
            });
        }
        self.definitions.insert(fixture.name().to_owned(), fixture);
        Ok(())
    }

    /// Running process for the fixture `name`, started on first request.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownFixture`] for unregistered names and
    /// propagates version detection and startup failures.
    pub fn process(&mut self, name: &str) -> Result<Arc<ManagedProcess>, FixtureError> {
        if let Some(process) = self.processes.iter().find(|held| held.name() == name) {
            debug!(target: FIXTURE_TARGET, name, "reusing process fixture");
            return Ok(Arc::clone(process));
        }
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| FixtureError::UnknownFixture {
                name: name.to_owned(),
            })?;
        let process = Arc::new(definition.instantiate(&self.runner, &self.versions)?);
        process.start()?;
        info!(
            target: FIXTURE_TARGET,
            name,
            port = ?process.port(),
            "process fixture acquired"
        );
        self.processes.push(Arc::clone(&process));
        Ok(process)
    }

    /// Client connected to the fixture's process.
    ///
    /// A process that was stopped or crashed since it was acquired is started
    /// again. A restart moves the server to a new port, so a client cached
    /// for the old address is discarded and a fresh one connected.
    ///
    /// # Errors
    ///
    /// Propagates process acquisition failures and
    /// [`ClientError`](crate::ClientError)s from connecting.
    pub fn client(
        &mut self,
        fixture: &ClientFixture,
    ) -> Result<Arc<ElasticsearchClient>, FixtureError> {
        let name = fixture.process_name();
        let process = self.process(name)?;
        if !process.running() {
            process.start()?;
        }
        let current = process.base_url();
        self.clients.retain(|cached| {
            let stale = Arc::ptr_eq(cached.process(), &process)
                && current.as_ref() != Some(cached.base_url());
            if stale {
                debug!(
                    target: FIXTURE_TARGET,
                    name,
                    url = %cached.base_url(),
                    "discarding client bound to a previous server"
                );
            }
            !stale
        });
        if let Some(cached) = self
            .clients
            .iter()
            .find(|cached| Arc::ptr_eq(cached.process(), &process))
        {
            debug!(target: FIXTURE_TARGET, name, "reusing client fixture");
            return Ok(Arc::clone(cached));
        }
        let client = Arc::new(ElasticsearchClient::connect(&process, fixture.window)?);
        self.clients.push(Arc::clone(&client));
        Ok(client)
    }

    /// Tears down every acquired fixture.
    ///
    /// Clients go first, dropping their indices, then processes stop in
    /// reverse start order. Failures are logged. Calling this again is a
    /// no-op.
    pub fn close(&mut self) {
        for client in self.clients.drain(..).rev() {
            if !client.process().running() {
                continue;
            }
            if let Err(error) = client.delete_all_indices() {
                warn!(
                    target: FIXTURE_TARGET,
                    name = %client.process().name(),
                    error = %error,
                    "failed to delete indices during teardown"
                );
            }
        }
        for process in self.processes.drain(..).rev() {
            if let Err(error) = process.stop() {
                warn!(
                    target: FIXTURE_TARGET,
                    name = %process.name(),
                    error = %error,
                    "failed to stop process during teardown"
                );
            }
        }
    }
}

impl Drop for FixtureScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn scope() -> FixtureScope {
        FixtureScope::new(RunnerSettings::default(), Arc::new(VersionCache::new()))
    }

    #[test]
    fn unknown_fixture_is_reported() {
        let mut scope = scope();

        let error = scope.process("missing").expect_err("nothing registered");

        assert!(matches!(error, FixtureError::UnknownFixture { name } if name == "missing"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut scope = scope();
        scope
            .register(elasticsearch_proc("elasticsearch_proc", "/bin/elasticsearch"))
            .expect("first registration");

        let error = scope
            .register(elasticsearch_proc("elasticsearch_proc", "/other/elasticsearch"))
            .expect_err("duplicate");

        assert!(matches!(error, FixtureError::DuplicateFixture { .. }));
    }

    #[test]
    fn setting_pairs_become_call_site_layer() {
        let fixture = elasticsearch_proc("proc", "/bin/elasticsearch")
            .with_setting_pairs([
                ("elasticsearch_port", "9350"),
                ("elasticsearch_logsdir", "/logs"),
            ])
            .expect("valid pairs");

        assert_eq!(fixture.settings().port, Some(9350));
        assert_eq!(
            fixture.settings().logsdir.as_deref().map(Utf8Path::as_str),
            Some("/logs")
        );
    }

    #[test]
    fn invalid_setting_pairs_are_rejected() {
        let error = elasticsearch_proc("proc", "/bin/elasticsearch")
            .with_setting_pairs([("elasticsearch_port", "ninety")])
            .expect_err("invalid port");

        assert!(matches!(error, FixtureError::Settings(_)));
    }

    #[test]
    fn runner_settings_carry_project_timeout() {
        let config = Config {
            startup_timeout_secs: Some(5),
            logsdir: Some(Utf8PathBuf::from("/ini")),
            ..Config::default()
        };

        let runner = RunnerSettings::from_config(&config, SettingsLayer::default());

        assert_eq!(runner.launch().startup_timeout, Duration::from_secs(5));
        assert_eq!(
            runner.ini().logsdir.as_deref().map(Utf8Path::as_str),
            Some("/ini")
        );
    }

    #[test]
    fn missing_executable_fails_version_detection() {
        let fixture = elasticsearch_proc("proc", "/nonexistent/bin/elasticsearch");

        let error = fixture
            .instantiate(&RunnerSettings::default(), &VersionCache::new())
            .expect_err("no executable");

        assert!(matches!(error, FixtureError::Version(_)));
    }

    #[test]
    fn client_fixture_names_its_process() {
        let fixture = elasticsearch("elasticsearch_proc");

        assert_eq!(fixture.process_name(), "elasticsearch_proc");
        assert_eq!(fixture.window, ReadinessWindow::default());
    }
}
