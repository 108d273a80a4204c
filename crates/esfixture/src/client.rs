//! Client handles bound to a managed server.
//!
//! [`ElasticsearchClient::connect`] waits until the cluster reports green
//! before handing out a client. Every request first checks that the owning
//! process is still running so a handle never talks to a server its fixture
//! has already torn down.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use strum::Display;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::process::ManagedProcess;

/// Log target for client events.
pub(crate) const CLIENT_TARGET: &str = "esfixture::client";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cluster health colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    /// All shards allocated.
    Green,
    /// Primary shards allocated, replicas missing.
    Yellow,
    /// Primary shards missing.
    Red,
}

/// Response of `GET /_cluster/health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterHealth {
    /// Cluster name.
    pub cluster_name: String,
    /// Health colour.
    pub status: HealthStatus,
    /// Nodes in the cluster.
    #[serde(default)]
    pub number_of_nodes: u32,
    /// Active shards.
    #[serde(default)]
    pub active_shards: u32,
}

/// Response of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    /// Node name.
    #[serde(default)]
    pub name: Option<String>,
    /// Cluster name.
    pub cluster_name: String,
    /// Version block.
    pub version: ServerVersion,
}

/// Version block of [`ServerInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerVersion {
    /// Dotted version number.
    pub number: String,
}

/// Bounded retry window for the readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessWindow {
    /// Total time allowed for the cluster to turn green.
    pub timeout: Duration,
    /// Pause between health queries.
    pub interval: Duration,
}

impl Default for ReadinessWindow {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(200),
        }
    }
}

/// Errors raised by client handles.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The process has no address yet.
    #[error("process '{name}' has not been started")]
    NotStarted {
        /// Fixture name.
        name: String,
    },
    /// The owning process is no longer running.
    #[error("process '{name}' is no longer running")]
    ProcessStopped {
        /// Fixture name.
        name: String,
    },
    /// The cluster never reported green.
    #[error(
        "cluster at {url} was not green within {} ms (last status: {})",
        .timeout.as_millis(),
        status_label(.last_status)
    )]
    NotReady {
        /// Base URL queried.
        url: String,
        /// Readiness timeout.
        timeout: Duration,
        /// Last status observed, `None` if no query succeeded.
        last_status: Option<HealthStatus>,
    },
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Build {
        /// Client construction failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request failed or returned an unexpected body.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Request URL.
        url: String,
        /// Transport or decoding failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request path could not be joined onto the base URL.
    #[error("invalid request path '{path}': {source}")]
    Path {
        /// Path that was joined.
        path: String,
        /// Join failure.
        #[source]
        source: url::ParseError,
    },
}

fn status_label(status: &Option<HealthStatus>) -> String {
    status.map_or_else(|| "unavailable".to_owned(), |observed| observed.to_string())
}

/// HTTP client bound to one managed server.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    process: Arc<ManagedProcess>,
    http: reqwest::blocking::Client,
    base_url: Url,
}

impl ElasticsearchClient {
    /// Connects to `process` once its cluster reports green.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotStarted`] or [`ClientError::ProcessStopped`]
    /// when the process cannot serve requests, and
    /// [`ClientError::NotReady`] when the cluster is not green within
    /// `window`.
    pub fn connect(
        process: &Arc<ManagedProcess>,
        window: ReadinessWindow,
    ) -> Result<Self, ClientError> {
        let base_url = process.base_url().ok_or_else(|| ClientError::NotStarted {
            name: process.name().to_owned(),
        })?;
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ClientError::Build { source })?;
        let client = Self {
            process: Arc::clone(process),
            http,
            base_url,
        };
        client.wait_until_green(window)?;
        info!(
            target: CLIENT_TARGET,
            name = %process.name(),
            url = %client.base_url,
            "client connected"
        );
        Ok(client)
    }

    /// Base URL of the server.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Process the client is bound to.
    #[must_use]
    pub fn process(&self) -> &Arc<ManagedProcess> {
        &self.process
    }

    /// Queries `GET /_cluster/health`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProcessStopped`] once the process has stopped
    /// and [`ClientError::Request`] when the request fails.
    pub fn cluster_health(&self) -> Result<ClusterHealth, ClientError> {
        self.get_json("_cluster/health")
    }

    /// Queries `GET /`.
    ///
    /// # Errors
    ///
    /// See [`cluster_health`](Self::cluster_health).
    pub fn info(&self) -> Result<ServerInfo, ClientError> {
        self.get_json("")
    }

    /// Deletes every index in the cluster.
    ///
    /// # Errors
    ///
    /// See [`cluster_health`](Self::cluster_health).
    pub fn delete_all_indices(&self) -> Result<(), ClientError> {
        self.ensure_live()?;
        let url = self.endpoint("_all")?;
        self.http
            .delete(url.clone())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|source| ClientError::Request {
                url: url.to_string(),
                source,
            })?;
        debug!(target: CLIENT_TARGET, url = %url, "deleted all indices");
        Ok(())
    }

    fn wait_until_green(&self, window: ReadinessWindow) -> Result<(), ClientError> {
        let deadline = Instant::now() + window.timeout;
        let mut last_status = None;
        loop {
            match self.cluster_health() {
                Ok(health) if health.status == HealthStatus::Green => return Ok(()),
                Ok(health) => last_status = Some(health.status),
                Err(error @ ClientError::ProcessStopped { .. }) => return Err(error),
                Err(error) => {
                    debug!(target: CLIENT_TARGET, error = %error, "health query failed");
                }
            }
            if Instant::now() >= deadline {
                return Err(ClientError::NotReady {
                    url: self.base_url.to_string(),
                    timeout: window.timeout,
                    last_status,
                });
            }
            thread::sleep(window.interval);
        }
    }

    fn ensure_live(&self) -> Result<(), ClientError> {
        if self.process.running() {
            Ok(())
        } else {
            Err(ClientError::ProcessStopped {
                name: self.process.name().to_owned(),
            })
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|source| ClientError::Path {
                path: path.to_owned(),
                source,
            })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.ensure_live()?;
        let url = self.endpoint(path)?;
        self.http
            .get(url.clone())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::json)
            .map_err(|source| ClientError::Request {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::green("green", HealthStatus::Green)]
    #[case::yellow("yellow", HealthStatus::Yellow)]
    #[case::red("red", HealthStatus::Red)]
    fn parses_cluster_health(#[case] raw: &str, #[case] expected: HealthStatus) {
        let body = format!(
            r#"{{"cluster_name":"test","status":"{raw}","timed_out":false,"number_of_nodes":1}}"#
        );

        let health: ClusterHealth = serde_json::from_str(&body).expect("parse health");

        assert_eq!(health.status, expected);
        assert_eq!(health.number_of_nodes, 1);
        assert_eq!(health.active_shards, 0);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn parses_server_info() {
        let body = r#"{
            "name": "node-1",
            "cluster_name": "elasticsearch_cluster_9200_abc",
            "version": {"number": "6.2.3", "lucene_version": "7.2.1"},
            "tagline": "You Know, for Search"
        }"#;

        let info: ServerInfo = serde_json::from_str(body).expect("parse info");

        assert_eq!(info.version.number, "6.2.3");
        assert_eq!(info.name.as_deref(), Some("node-1"));
    }

    #[test]
    fn not_ready_reports_last_status() {
        let error = ClientError::NotReady {
            url: "http://127.0.0.1:9200/".to_owned(),
            timeout: Duration::from_millis(500),
            last_status: Some(HealthStatus::Yellow),
        };

        assert_eq!(
            error.to_string(),
            "cluster at http://127.0.0.1:9200/ was not green within 500 ms (last status: yellow)"
        );
    }
}
