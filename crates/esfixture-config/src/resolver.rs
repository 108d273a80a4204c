//! Merges setting layers into the configuration a fixture runs with.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::defaults::{
    DEFAULT_HOST, DEFAULT_INDEX_STORE_TYPE, DEFAULT_LOGS_PREFIX, DEFAULT_MULTICAST_ENABLED,
    DEFAULT_NETWORK_PUBLISH_HOST, default_logsdir,
};
use crate::settings::SettingsLayer;

/// Fully resolved settings for one fixture instantiation.
///
/// Built once by [`resolve`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    host: String,
    port: Option<u16>,
    cluster_name: Option<String>,
    logsdir: Utf8PathBuf,
    logs_prefix: String,
    index_store_type: String,
    network_publish_host: String,
    discovery_zen_ping_multicast_enabled: bool,
    configuration_path: Option<Utf8PathBuf>,
    extra: BTreeMap<String, String>,
}

impl EffectiveConfig {
    /// Address the fixture connects to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Pinned port, or `None` when one should be allocated.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Configured cluster name, or `None` when one should be generated.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// Directory receiving the per-instance logs directory.
    #[must_use]
    pub fn logsdir(&self) -> &Utf8Path {
        &self.logsdir
    }

    /// Prefix for the per-instance logs directory name.
    #[must_use]
    pub fn logs_prefix(&self) -> &str {
        &self.logs_prefix
    }

    /// Index store type.
    #[must_use]
    pub fn index_store_type(&self) -> &str {
        &self.index_store_type
    }

    /// Address the server publishes.
    #[must_use]
    pub fn network_publish_host(&self) -> &str {
        &self.network_publish_host
    }

    /// Whether multicast discovery is enabled.
    #[must_use]
    pub const fn discovery_zen_ping_multicast_enabled(&self) -> bool {
        self.discovery_zen_ping_multicast_enabled
    }

    /// User-supplied server configuration directory.
    #[must_use]
    pub fn configuration_path(&self) -> Option<&Utf8Path> {
        self.configuration_path.as_deref()
    }

    /// Arbitrary server settings, ordered by key.
    #[must_use]
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Per-instance logs directory for the given port.
    ///
    /// Formatted as `<logsdir>/<prefix>elasticsearch_<port>_logs` so parallel
    /// instances never share a directory.
    #[must_use]
    pub fn logs_path(&self, port: u16) -> Utf8PathBuf {
        self.logsdir
            .join(format!("{}elasticsearch_{port}_logs", self.logs_prefix))
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        resolve(
            &SettingsLayer::default(),
            &SettingsLayer::default(),
            &SettingsLayer::default(),
        )
    }
}

/// Resolves the effective configuration from the three configuration sources.
///
/// For every setting independently the call-site value wins, then the
/// command-line option, then the project configuration, then the built-in
/// default.
#[must_use]
pub fn resolve(
    call_site: &SettingsLayer,
    option: &SettingsLayer,
    ini: &SettingsLayer,
) -> EffectiveConfig {
    let layers = [call_site, option, ini];
    let pick = |select: fn(&SettingsLayer) -> Option<&String>| {
        layers.iter().find_map(|layer| select(layer)).cloned()
    };
    let pick_path = |select: fn(&SettingsLayer) -> Option<&Utf8PathBuf>| {
        layers.iter().find_map(|layer| select(layer)).cloned()
    };

    let mut extra = BTreeMap::new();
    for layer in layers.iter().rev() {
        extra.extend(layer.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    EffectiveConfig {
        host: pick(|l| l.host.as_ref()).unwrap_or_else(|| DEFAULT_HOST.to_owned()),
        port: layers.iter().find_map(|layer| layer.port),
        cluster_name: pick(|l| l.cluster_name.as_ref()),
        logsdir: pick_path(|l| l.logsdir.as_ref()).unwrap_or_else(default_logsdir),
        logs_prefix: pick(|l| l.logs_prefix.as_ref())
            .unwrap_or_else(|| DEFAULT_LOGS_PREFIX.to_owned()),
        index_store_type: pick(|l| l.index_store_type.as_ref())
            .unwrap_or_else(|| DEFAULT_INDEX_STORE_TYPE.to_owned()),
        network_publish_host: pick(|l| l.network_publish_host.as_ref())
            .unwrap_or_else(|| DEFAULT_NETWORK_PUBLISH_HOST.to_owned()),
        discovery_zen_ping_multicast_enabled: layers
            .iter()
            .find_map(|layer| layer.discovery_zen_ping_multicast_enabled)
            .unwrap_or(DEFAULT_MULTICAST_ENABLED),
        configuration_path: pick_path(|l| l.configuration_path.as_ref()),
        extra,
    }
}
