//! Test fixtures that run throwaway Elasticsearch servers.
//!
//! A [`ProcessFixture`] (built with [`elasticsearch_proc`]) describes one
//! server; acquiring it through a [`FixtureScope`] detects the installed
//! version, resolves configuration from the call site, runner options and
//! project file, renders the startup configuration, launches the server and
//! waits until it answers. A [`ClientFixture`] (built with [`elasticsearch`])
//! adds an [`ElasticsearchClient`] that waits for a green cluster. Everything
//! is stopped and cleaned up when the scope closes.

pub mod cli;
pub mod client;
mod error;
pub mod fixture;
pub mod process;
pub mod render;
pub mod telemetry;
pub mod version;

pub use cli::run;
pub use client::{
    ClientError, ClusterHealth, ElasticsearchClient, HealthStatus, ReadinessWindow, ServerInfo,
};
pub use error::FixtureError;
pub use fixture::{
    ClientFixture, FixtureScope, ProcessFixture, RunnerSettings, elasticsearch, elasticsearch_proc,
};
pub use process::{LaunchOptions, ManagedProcess, ProcessError, ProcessState};
pub use render::{ConfigStyle, Instance, RenderError, RenderedConfig, render};
pub use version::{Version, VersionCache, VersionError, detect_version, parse_version_output};
