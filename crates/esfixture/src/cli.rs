//! Command-line front end.
//!
//! `esfixture version` prints the version of an installation, `esfixture
//! render` previews the startup configuration a fixture would use, and
//! `esfixture start` runs one managed server until interrupted. Settings
//! flags form the runner option layer; `--project-config` selects the file
//! behind the project layer.
//!
//! `start` registers its `SIGINT`/`SIGTERM` handlers before the server is
//! launched. A signal received while the server is still starting cancels
//! the launch; one received later stops the running server.

use std::ffi::OsString;
use std::io::{self, Write};
use std::panic;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use esfixture_config::{Config, Setting, SettingsError, SettingsLayer, default_logsdir, resolve};
use ortho_config::OrthoConfig;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::FixtureError;
use crate::fixture::{RunnerSettings, elasticsearch_proc};
use crate::process::{ManagedProcess, ProcessError, generate_cluster_name};
use crate::render::{Instance, RenderError, distribution_config_dir, render};
use crate::telemetry::{self, TelemetryError};
use crate::version::{VersionCache, VersionError, detect_version};

/// Log target for CLI events.
pub(crate) const CLI_TARGET: &str = "esfixture::cli";

/// Port shown by `render` when no port is configured.
const PREVIEW_PORT: u16 = 9200;

const DEFAULT_FIXTURE_NAME: &str = "elasticsearch_proc";

#[derive(Parser, Debug)]
#[command(
    name = "esfixture",
    version,
    about = "Launch throwaway Elasticsearch servers for tests",
    disable_help_subcommand = true
)]
struct Cli {
    /// Project configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    project_config: Option<Utf8PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Prints the version of a server installation.
    Version(ExecutableArgs),
    /// Prints the startup configuration a fixture would use.
    Render {
        #[command(flatten)]
        executable: ExecutableArgs,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Starts a server and keeps it running until interrupted.
    Start {
        #[command(flatten)]
        executable: ExecutableArgs,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Fixture name used in logs.
        #[arg(long, default_value = DEFAULT_FIXTURE_NAME)]
        name: String,
    },
}

#[derive(Args, Debug, Default)]
struct ExecutableArgs {
    /// Server executable; defaults to `executable` from the project file.
    #[arg(long, value_name = "PATH")]
    executable: Option<Utf8PathBuf>,
}

impl ExecutableArgs {
    fn resolve(self, config: &Config) -> Result<Utf8PathBuf, CliError> {
        self.executable
            .or_else(|| config.executable.clone())
            .ok_or(CliError::MissingExecutable)
    }
}

/// Settings flags, kept as text so they parse exactly like runner options.
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Directory receiving the per-instance logs directory.
    #[arg(long = "elasticsearch-logsdir", value_name = "DIR")]
    logsdir: Option<String>,
    /// HTTP port; allocated dynamically when unset.
    #[arg(long = "elasticsearch-port", value_name = "PORT")]
    port: Option<String>,
    /// Address the fixture connects to.
    #[arg(long = "elasticsearch-host", value_name = "HOST")]
    host: Option<String>,
    /// Cluster name; generated when unset.
    #[arg(long = "elasticsearch-cluster-name", value_name = "NAME")]
    cluster_name: Option<String>,
    /// Address the server publishes.
    #[arg(long = "elasticsearch-network-publish-host", value_name = "HOST")]
    network_publish_host: Option<String>,
    /// Whether multicast discovery is enabled.
    #[arg(
        long = "elasticsearch-discovery-zen-ping-multicast-enabled",
        value_name = "BOOL"
    )]
    multicast: Option<String>,
    /// Index store type.
    #[arg(long = "elasticsearch-index-store-type", value_name = "TYPE")]
    index_store_type: Option<String>,
    /// Prefix for the per-instance logs directory name.
    #[arg(long = "elasticsearch-logs-prefix", value_name = "PREFIX")]
    logs_prefix: Option<String>,
    /// Server configuration directory override.
    #[arg(long = "elasticsearch-configuration-path", value_name = "DIR")]
    configuration_path: Option<String>,
    /// Extra server setting, repeatable.
    #[arg(
        long = "elasticsearch-setting",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value
    )]
    extra: Vec<(String, String)>,
}

impl SettingsArgs {
    /// Builds the option layer. Empty values count as unset.
    fn into_layer(self) -> Result<SettingsLayer, SettingsError> {
        let given = [
            (Setting::Logsdir, self.logsdir),
            (Setting::Port, self.port),
            (Setting::Host, self.host),
            (Setting::ClusterName, self.cluster_name),
            (Setting::NetworkPublishHost, self.network_publish_host),
            (Setting::DiscoveryZenPingMulticastEnabled, self.multicast),
            (Setting::IndexStoreType, self.index_store_type),
            (Setting::LogsPrefix, self.logs_prefix),
            (Setting::ConfigurationPath, self.configuration_path),
        ];
        let mut layer = SettingsLayer::default();
        for (setting, raw) in given {
            if let Some(text) = raw {
                layer.set(setting, &text)?;
            }
        }
        layer.extra = self
            .extra
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();
        Ok(layer)
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(
        "no server executable given; pass --executable or set 'executable' in the \
         project configuration"
    )]
    MissingExecutable,
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Source of the request to stop a served server.
pub(crate) trait ShutdownSignal: Sync {
    /// Blocks until shutdown is requested or [`cancel`](Self::cancel) is
    /// called.
    fn wait(&self) -> Result<(), io::Error>;

    /// Releases a pending or future [`wait`](Self::wait).
    fn cancel(&self);
}

/// `SIGINT` and `SIGTERM`, queued from the moment of installation.
struct SystemShutdownSignal {
    signals: Mutex<Signals>,
    handle: Handle,
}

impl SystemShutdownSignal {
    fn install() -> Result<Self, io::Error> {
        let signals = Signals::new([SIGTERM, SIGINT])?;
        let handle = signals.handle();
        Ok(Self {
            signals: Mutex::new(signals),
            handle,
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), io::Error> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(signal) = signals.forever().next() {
            info!(target: CLI_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }

    fn cancel(&self) {
        self.handle.close();
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_shutdown(args, stdout, stderr, SystemShutdownSignal::install)
}

/// Runs the CLI, taking the shutdown signal for `start` from `install`.
pub(crate) fn run_with_shutdown<I, W, E, S, F>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    install: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    S: ShutdownSignal,
    F: FnOnce() -> Result<S, io::Error>,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let text = error.render().to_string();
            let sink: &mut dyn Write = if error.use_stderr() { stderr } else { stdout };
            let _ = write!(sink, "{text}");
            return ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(2));
        }
    };
    match execute(cli, stdout, install) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "esfixture: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W, S, F>(cli: Cli, stdout: &mut W, install: F) -> Result<(), CliError>
where
    W: Write,
    S: ShutdownSignal,
    F: FnOnce() -> Result<S, io::Error>,
{
    let config = load_project_config(cli.project_config.as_deref())?;
    telemetry::initialise(&config)?;
    match cli.command {
        CliCommand::Version(args) => {
            let executable = args.resolve(&config)?;
            writeln!(stdout, "{}", detect_version(&executable)?)?;
        }
        CliCommand::Render {
            executable: args,
            settings,
        } => {
            let executable = args.resolve(&config)?;
            render_preview(&config, &executable, settings.into_layer()?, stdout)?;
        }
        CliCommand::Start {
            executable: args,
            settings,
            name,
        } => {
            let executable = args.resolve(&config)?;
            let runner = RunnerSettings::from_config(&config, settings.into_layer()?);
            let shutdown = install().map_err(CliError::Signals)?;
            let process =
                elasticsearch_proc(name, executable).instantiate(&runner, &VersionCache::new())?;
            serve(&process, stdout, &shutdown)?;
        }
    }
    Ok(())
}

fn load_project_config(path: Option<&Utf8Path>) -> Result<Config, CliError> {
    let mut args = vec![OsString::from("esfixture")];
    if let Some(project) = path {
        args.push(OsString::from("--config-path"));
        args.push(OsString::from(project.as_str()));
    }
    Config::load_from_iter(args).map_err(CliError::LoadConfiguration)
}

fn render_preview<W: Write>(
    config: &Config,
    executable: &Utf8Path,
    option: SettingsLayer,
    stdout: &mut W,
) -> Result<(), CliError> {
    let version = detect_version(executable)?;
    let effective = resolve(&SettingsLayer::default(), &option, &config.settings_layer());
    let port = effective.port().unwrap_or(PREVIEW_PORT);
    let cluster_name = effective
        .cluster_name()
        .map_or_else(|| generate_cluster_name(port), ToOwned::to_owned);
    let instance = Instance::new(port, cluster_name, default_logsdir())
        .with_distribution_config(distribution_config_dir(executable));
    let rendered = render(&effective, version, &instance)?;

    let mut line: Vec<String> = rendered
        .environment()
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    line.extend(rendered.command_line(executable));
    writeln!(stdout, "{}", line.join(" "))?;
    if let Some(file) = rendered.settings_file() {
        writeln!(stdout, "# {}", file.path())?;
        write!(stdout, "{}", file.contents())?;
    }
    Ok(())
}

/// Starts `process` and keeps it running until `shutdown` fires.
///
/// A watcher thread waits for the signal and stops the process, which also
/// cancels a startup still in progress.
fn serve<W, S>(process: &ManagedProcess, stdout: &mut W, shutdown: &S) -> Result<(), CliError>
where
    W: Write,
    S: ShutdownSignal,
{
    thread::scope(|scope| {
        let watcher = scope.spawn(|| {
            let waited = shutdown.wait();
            if let Err(error) = process.stop() {
                warn!(
                    target: CLI_TARGET,
                    name = %process.name(),
                    error = %error,
                    "failed to stop server"
                );
            }
            waited
        });

        let served = match process.start() {
            Ok(()) => report_ready(process, stdout),
            Err(ProcessError::Cancelled { .. }) => Ok(()),
            Err(error) => Err(CliError::Fixture(error.into())),
        };
        if served.is_err() {
            shutdown.cancel();
        }
        let waited = watcher
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload));
        served?;
        waited.map_err(CliError::Signals)?;
        writeln!(stdout, "stopped")?;
        Ok(())
    })
}

fn report_ready<W: Write>(process: &ManagedProcess, stdout: &mut W) -> Result<(), CliError> {
    writeln!(
        stdout,
        "ready {}:{} (pid {})",
        process.host(),
        process.port().unwrap_or_default(),
        process.pid().unwrap_or_default()
    )?;
    stdout.flush()?;
    Ok(())
}
