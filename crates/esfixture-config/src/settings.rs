//! Setting names and per-source setting layers.
//!
//! A fixture's configuration comes from three sources: the call site that
//! declares the fixture, command-line options handed over by the test runner,
//! and the project's configuration file. Each source is represented by a
//! [`SettingsLayer`] in which every setting is optional; the resolver merges
//! them into an [`EffectiveConfig`](crate::EffectiveConfig).

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

/// Settings recognised on the runner configuration surface.
///
/// The string form of each variant is the option name a runner uses to
/// supply the value, for example `elasticsearch_logsdir`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    IntoStaticStr,
)]
pub enum Setting {
    /// Directory receiving the per-instance logs directory.
    #[strum(serialize = "elasticsearch_logsdir")]
    Logsdir,
    /// HTTP port; dynamically allocated when unset.
    #[strum(serialize = "elasticsearch_port")]
    Port,
    /// Address the fixture connects to.
    #[strum(serialize = "elasticsearch_host")]
    Host,
    /// Cluster name; generated when unset.
    #[strum(serialize = "elasticsearch_cluster_name")]
    ClusterName,
    /// Address the server publishes.
    #[strum(serialize = "elasticsearch_network_publish_host")]
    NetworkPublishHost,
    /// Whether multicast discovery is enabled.
    #[strum(serialize = "elasticsearch_discovery_zen_ping_multicast_enabled")]
    DiscoveryZenPingMulticastEnabled,
    /// Index store type.
    #[strum(serialize = "elasticsearch_index_store_type")]
    IndexStoreType,
    /// Prefix for the per-instance logs directory name.
    #[strum(serialize = "elasticsearch_logs_prefix")]
    LogsPrefix,
    /// Server configuration directory override.
    #[strum(serialize = "elasticsearch_configuration_path")]
    ConfigurationPath,
}

impl Setting {
    /// Option name used by the runner configuration surface.
    #[must_use]
    pub fn option_name(self) -> &'static str {
        self.into()
    }
}

/// Errors raised while building a settings layer from raw values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// The option name is not part of the configuration surface.
    #[error("unknown fixture option '{name}'")]
    UnknownOption {
        /// Offending option name.
        name: String,
    },
    /// The port value is not a valid TCP port.
    #[error("invalid value '{value}' for {setting}: expected a port number")]
    InvalidPort {
        /// Setting being assigned.
        setting: Setting,
        /// Raw value.
        value: String,
    },
    /// The boolean value could not be parsed.
    #[error("invalid value '{value}' for {setting}: expected 'true' or 'false'")]
    InvalidBool {
        /// Setting being assigned.
        setting: Setting,
        /// Raw value.
        value: String,
    },
}

/// One configuration source. Every setting is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer {
    /// Directory receiving the per-instance logs directory.
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
    /// Prefix for the per-instance logs directory name.
    pub logs_prefix: Option<String>,
    /// Server configuration directory override.
    pub configuration_path: Option<Utf8PathBuf>,
    /// Arbitrary server settings passed through to the rendered config.
    pub extra: BTreeMap<String, String>,
}

impl SettingsLayer {
    /// Builds a layer from `(option name, value)` pairs.
    ///
    /// Empty values are treated as unset, matching how runners report
    /// options that were declared but not given.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownOption`] for a name outside the
    /// configuration surface, and the errors of [`set`](Self::set) for values
    /// that do not parse.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = Self::default();
        for (name, value) in pairs {
            let setting = name
                .as_ref()
                .parse::<Setting>()
                .map_err(|_| SettingsError::UnknownOption {
                    name: name.as_ref().to_owned(),
                })?;
            layer.set(setting, value.as_ref())?;
        }
        Ok(layer)
    }

    /// Assigns a setting from its textual form.
    ///
    /// Surrounding whitespace is ignored and an empty value leaves the
    /// setting unset.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidPort`] when a port is not a number in
    /// `0..=65535`, and [`SettingsError::InvalidBool`] when a flag is neither
    /// `true` nor `false`.
    pub fn set(&mut self, setting: Setting, value: &str) -> Result<(), SettingsError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        match setting {
            Setting::Logsdir => self.logsdir = Some(Utf8PathBuf::from(trimmed)),
            Setting::Port => {
                let port = trimmed
                    .parse::<u16>()
                    .map_err(|_| SettingsError::InvalidPort {
                        setting,
                        value: trimmed.to_owned(),
                    })?;
                self.port = Some(port);
            }
            Setting::Host => self.host = Some(trimmed.to_owned()),
            Setting::ClusterName => self.cluster_name = Some(trimmed.to_owned()),
            Setting::NetworkPublishHost => self.network_publish_host = Some(trimmed.to_owned()),
            Setting::DiscoveryZenPingMulticastEnabled => {
                self.discovery_zen_ping_multicast_enabled = Some(parse_bool(setting, trimmed)?);
            }
            Setting::IndexStoreType => self.index_store_type = Some(trimmed.to_owned()),
            Setting::LogsPrefix => self.logs_prefix = Some(trimmed.to_owned()),
            Setting::ConfigurationPath => {
                self.configuration_path = Some(Utf8PathBuf::from(trimmed));
            }
        }
        Ok(())
    }

    /// Returns `true` when no setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Sets the logs directory.
    #[must_use]
    pub fn with_logsdir(mut self, logsdir: impl Into<Utf8PathBuf>) -> Self {
        self.logsdir = Some(logsdir.into());
        self
    }

    /// Pins the HTTP port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the connection host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the cluster name.
    #[must_use]
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Sets the published network host.
    #[must_use]
    pub fn with_network_publish_host(mut self, host: impl Into<String>) -> Self {
        self.network_publish_host = Some(host.into());
        self
    }

    /// Enables or disables multicast discovery.
    #[must_use]
    pub fn with_multicast(mut self, enabled: bool) -> Self {
        self.discovery_zen_ping_multicast_enabled = Some(enabled);
        self
    }

    /// Sets the index store type.
    #[must_use]
    pub fn with_index_store_type(mut self, store: impl Into<String>) -> Self {
        self.index_store_type = Some(store.into());
        self
    }

    /// Sets the logs directory prefix.
    #[must_use]
    pub fn with_logs_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.logs_prefix = Some(prefix.into());
        self
    }

    /// Points the server at an existing configuration directory.
    #[must_use]
    pub fn with_configuration_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.configuration_path = Some(path.into());
        self
    }

    /// Adds an arbitrary server setting.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

fn parse_bool(setting: Setting, value: &str) -> Result<bool, SettingsError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(SettingsError::InvalidBool {
            setting,
            value: value.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn option_names_round_trip() {
        for setting in Setting::iter() {
            let parsed = setting
                .option_name()
                .parse::<Setting>()
                .expect("option name should parse");
            assert_eq!(parsed, setting);
            assert!(setting.option_name().starts_with("elasticsearch_"));
        }
    }

    #[test]
    fn builds_layer_from_runner_pairs() {
        let layer = SettingsLayer::from_pairs([
            ("elasticsearch_logsdir", "/tmp"),
            ("elasticsearch_port", "9201"),
            ("elasticsearch_discovery_zen_ping_multicast_enabled", "FALSE"),
            ("elasticsearch_logs_prefix", "suite_"),
        ])
        .expect("pairs should parse");

        assert_eq!(layer.logsdir.as_deref(), Some(camino::Utf8Path::new("/tmp")));
        assert_eq!(layer.port, Some(9201));
        assert_eq!(layer.discovery_zen_ping_multicast_enabled, Some(false));
        assert_eq!(layer.logs_prefix.as_deref(), Some("suite_"));
        assert_eq!(layer.host, None);
    }

    #[test]
    fn empty_values_leave_setting_unset() {
        let layer =
            SettingsLayer::from_pairs([("elasticsearch_host", ""), ("elasticsearch_port", " ")])
                .expect("empty values are accepted");
        assert!(layer.is_empty());
    }

    #[rstest]
    #[case::unknown(
        ("elasticsearch_shards", "2"),
        SettingsError::UnknownOption { name: "elasticsearch_shards".to_owned() }
    )]
    #[case::port(
        ("elasticsearch_port", "http"),
        SettingsError::InvalidPort { setting: Setting::Port, value: "http".to_owned() }
    )]
    #[case::port_range(
        ("elasticsearch_port", "70000"),
        SettingsError::InvalidPort { setting: Setting::Port, value: "70000".to_owned() }
    )]
    #[case::boolean(
        ("elasticsearch_discovery_zen_ping_multicast_enabled", "maybe"),
        SettingsError::InvalidBool {
            setting: Setting::DiscoveryZenPingMulticastEnabled,
            value: "maybe".to_owned(),
        }
    )]
    fn rejects_bad_pairs(#[case] pair: (&str, &str), #[case] expected: SettingsError) {
        let error = SettingsLayer::from_pairs([pair]).expect_err("pair should be rejected");
        assert_eq!(error, expected);
    }
}
