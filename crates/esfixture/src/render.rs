//! Startup configuration rendering.
//!
//! Majors 1 and 2 take every setting as a `--key=value` argument. Majors 5
//! to 7 read `elasticsearch.yml` from a configuration directory; the
//! renderer either generates that file or, when the user supplies their own
//! directory, passes the managed directives as `-E key=value` arguments so
//! the user's files are never written to.
//!
//! Rendering is pure apart from checking that a user-supplied configuration
//! directory exists. Identical inputs always produce identical output.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use esfixture_config::EffectiveConfig;
use thiserror::Error;

use crate::version::Version;

/// File name of the generated settings file.
pub const SETTINGS_FILE_NAME: &str = "elasticsearch.yml";

/// Environment variable naming the configuration directory on majors 6+.
pub const CONFIG_DIR_ENV: &str = "ES_PATH_CONF";

const MANAGED_KEYS: &[&str] = &[
    "http.port",
    "network.publish_host",
    "cluster.name",
    "path.home",
    "path.data",
    "path.logs",
    "path.conf",
    "index.store.type",
    "discovery.zen.ping.multicast.enabled",
];

/// How a given major version receives its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStyle {
    /// Every directive is a `--key=value` argument.
    Arguments,
    /// Directives live in `elasticsearch.yml` inside a configuration
    /// directory.
    SettingsFile,
}

impl ConfigStyle {
    /// Style used by `version`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedVersion`] for majors other than 1,
    /// 2, 5, 6 and 7.
    pub fn for_version(version: Version) -> Result<Self, RenderError> {
        match version.major {
            1 | 2 => Ok(Self::Arguments),
            5..=7 => Ok(Self::SettingsFile),
            _ => Err(RenderError::UnsupportedVersion { version }),
        }
    }
}

/// Errors raised while rendering startup configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    /// No rendering rules exist for the major version.
    #[error("unsupported server version {version}: supported majors are 1, 2, 5, 6 and 7")]
    UnsupportedVersion {
        /// Detected version.
        version: Version,
    },
    /// Multicast discovery was removed in major 5.
    #[error("multicast discovery cannot be enabled for server version {version}")]
    MulticastUnsupported {
        /// Detected version.
        version: Version,
    },
    /// The configuration directory override is missing.
    #[error(
        "configuration directory {path} does not exist or is not a directory; \
         server {version} needs it to start"
    )]
    MissingConfigurationPath {
        /// Supplied directory.
        path: Utf8PathBuf,
        /// Detected version.
        version: Version,
    },
    /// An extra setting would override a managed directive.
    #[error("extra setting '{key}' collides with a directive managed by the fixture")]
    ReservedSetting {
        /// Offending key.
        key: String,
    },
}

/// Per-instance values fixed by the lifecycle manager before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    port: u16,
    cluster_name: String,
    scratch_dir: Utf8PathBuf,
    distribution_config: Option<Utf8PathBuf>,
}

impl Instance {
    /// Describes an instance listening on `port`.
    ///
    /// Scratch directories and the pid file are placed under `scratch_dir`
    /// and keyed by port.
    #[must_use]
    pub fn new(
        port: u16,
        cluster_name: impl Into<String>,
        scratch_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            port,
            cluster_name: cluster_name.into(),
            scratch_dir: scratch_dir.into(),
            distribution_config: None,
        }
    }

    /// Records the distribution's own configuration directory.
    ///
    /// Its files seed a generated configuration directory.
    #[must_use]
    pub fn with_distribution_config(mut self, dir: Option<Utf8PathBuf>) -> Self {
        self.distribution_config = dir;
        self
    }

    /// HTTP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Server home directory.
    #[must_use]
    pub fn home_path(&self) -> Utf8PathBuf {
        self.scratch_dir.join(format!("elasticsearch_{}", self.port))
    }

    /// Server data directory.
    #[must_use]
    pub fn work_path(&self) -> Utf8PathBuf {
        self.scratch_dir.join(format!("elasticsearch_{}_tmp", self.port))
    }

    /// Pid file written by the server.
    #[must_use]
    pub fn pid_path(&self) -> Utf8PathBuf {
        self.scratch_dir.join(format!("elasticsearch.{}.pid", self.port))
    }

    /// Directory receiving a generated settings file.
    #[must_use]
    pub fn generated_config_dir(&self) -> Utf8PathBuf {
        self.home_path().join("config")
    }

    /// Distribution configuration directory, if known.
    #[must_use]
    pub fn distribution_config(&self) -> Option<&Utf8Path> {
        self.distribution_config.as_deref()
    }
}

/// Distribution configuration directory for an executable laid out as
/// `<home>/bin/elasticsearch`.
#[must_use]
pub fn distribution_config_dir(executable: &Utf8Path) -> Option<Utf8PathBuf> {
    executable
        .parent()
        .and_then(Utf8Path::parent)
        .map(|home| home.join("config"))
}

/// Settings file the lifecycle manager writes before spawning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFile {
    dir: Utf8PathBuf,
    contents: String,
    seed_from: Option<Utf8PathBuf>,
}

impl SettingsFile {
    /// Directory the file is written to.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Full path of the file.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        self.dir.join(SETTINGS_FILE_NAME)
    }

    /// YAML text.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Directory whose other files are copied alongside the settings file.
    #[must_use]
    pub fn seed_from(&self) -> Option<&Utf8Path> {
        self.seed_from.as_deref()
    }
}

/// Output of [`render`]: everything needed to launch one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    style: ConfigStyle,
    directives: Vec<(String, String)>,
    arguments: Vec<String>,
    environment: Vec<(String, String)>,
    settings_file: Option<SettingsFile>,
}

impl RenderedConfig {
    /// Style chosen for the server version.
    #[must_use]
    pub const fn style(&self) -> ConfigStyle {
        self.style
    }

    /// Directives in the order they are rendered.
    #[must_use]
    pub fn directives(&self) -> &[(String, String)] {
        &self.directives
    }

    /// Value of a single directive.
    #[must_use]
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Arguments passed to the executable.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Extra environment variables for the server process.
    #[must_use]
    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    /// Generated settings file, when one is needed.
    #[must_use]
    pub fn settings_file(&self) -> Option<&SettingsFile> {
        self.settings_file.as_ref()
    }

    /// Executable followed by its arguments.
    #[must_use]
    pub fn command_line(&self, executable: &Utf8Path) -> Vec<String> {
        std::iter::once(executable.to_string())
            .chain(self.arguments.iter().cloned())
            .collect()
    }
}

/// Renders the startup configuration of one server instance.
///
/// # Errors
///
/// Returns a [`RenderError`] for unsupported versions, settings the version
/// cannot honour, a missing configuration directory override, or extra
/// settings that collide with managed directives.
pub fn render(
    config: &EffectiveConfig,
    version: Version,
    instance: &Instance,
) -> Result<RenderedConfig, RenderError> {
    let style = ConfigStyle::for_version(version)?;
    if style == ConfigStyle::SettingsFile && config.discovery_zen_ping_multicast_enabled() {
        return Err(RenderError::MulticastUnsupported { version });
    }
    if let Some(path) = config.configuration_path() {
        if !path.is_dir() {
            return Err(RenderError::MissingConfigurationPath {
                path: path.to_owned(),
                version,
            });
        }
    }

    let directives = directives(config, style, instance)?;
    let pid_path = instance.pid_path();
    let mut arguments = vec!["-p".to_owned(), pid_path.to_string()];
    let mut environment = Vec::new();
    let mut settings_file = None;

    match (style, config.configuration_path()) {
        (ConfigStyle::Arguments, user_dir) => {
            if let Some(dir) = user_dir {
                arguments.push(format!("--default.path.conf={dir}"));
            }
            arguments.extend(directives.iter().map(|(key, value)| format!("--{key}={value}")));
        }
        (ConfigStyle::SettingsFile, Some(dir)) => {
            pass_config_dir(version, dir, &mut arguments, &mut environment);
            for (key, value) in &directives {
                arguments.push("-E".to_owned());
                arguments.push(format!("{key}={value}"));
            }
        }
        (ConfigStyle::SettingsFile, None) => {
            let dir = instance.generated_config_dir();
            pass_config_dir(version, &dir, &mut arguments, &mut environment);
            settings_file = Some(SettingsFile {
                contents: settings_yaml(instance, &directives),
                seed_from: instance.distribution_config().map(Utf8Path::to_owned),
                dir,
            });
        }
    }

    Ok(RenderedConfig {
        style,
        directives,
        arguments,
        environment,
        settings_file,
    })
}

fn directives(
    config: &EffectiveConfig,
    style: ConfigStyle,
    instance: &Instance,
) -> Result<Vec<(String, String)>, RenderError> {
    let reserved: BTreeSet<&str> = MANAGED_KEYS.iter().copied().collect();
    if let Some(key) = config
        .extra()
        .keys()
        .find(|key| reserved.contains(key.as_str()))
    {
        return Err(RenderError::ReservedSetting { key: key.clone() });
    }

    let mut directives = vec![
        ("http.port".to_owned(), instance.port().to_string()),
        (
            "network.publish_host".to_owned(),
            config.network_publish_host().to_owned(),
        ),
        ("cluster.name".to_owned(), instance.cluster_name().to_owned()),
    ];
    if style == ConfigStyle::Arguments {
        directives.push(("path.home".to_owned(), instance.home_path().to_string()));
    }
    directives.extend([
        ("path.data".to_owned(), instance.work_path().to_string()),
        (
            "path.logs".to_owned(),
            config.logs_path(instance.port()).to_string(),
        ),
        (
            "index.store.type".to_owned(),
            config.index_store_type().to_owned(),
        ),
    ]);
    if style == ConfigStyle::Arguments {
        directives.push((
            "discovery.zen.ping.multicast.enabled".to_owned(),
            config.discovery_zen_ping_multicast_enabled().to_string(),
        ));
    }
    directives.extend(
        config
            .extra()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    Ok(directives)
}

fn pass_config_dir(
    version: Version,
    dir: &Utf8Path,
    arguments: &mut Vec<String>,
    environment: &mut Vec<(String, String)>,
) {
    if version.major == 5 {
        arguments.push(format!("-Epath.conf={dir}"));
    } else {
        environment.push((CONFIG_DIR_ENV.to_owned(), dir.to_string()));
    }
}

fn settings_yaml(instance: &Instance, directives: &[(String, String)]) -> String {
    let mut text = format!(
        "# Generated by esfixture for cluster {} on port {}\n",
        instance.cluster_name(),
        instance.port()
    );
    for (key, value) in directives {
        // Writing to a String cannot fail.
        let _ = writeln!(text, "{key}: {}", yaml_scalar(value));
    }
    text
}

fn yaml_scalar(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.trim() != value
        || value.contains(|c: char| ":#{}[],&*!|>'\"%@`\\".contains(c));
    if !needs_quotes {
        return value.to_owned();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
