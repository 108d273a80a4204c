//! Error surface of fixture acquisition.

use thiserror::Error;

use esfixture_config::SettingsError;

use crate::client::ClientError;
use crate::process::ProcessError;
use crate::version::VersionError;

/// Errors raised while acquiring fixtures from a scope.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// No process fixture with the requested name was registered.
    #[error("no process fixture named '{name}' is registered")]
    UnknownFixture {
        /// Requested name.
        name: String,
    },
    /// A process fixture with the same name is already registered.
    #[error("a process fixture named '{name}' is already registered")]
    DuplicateFixture {
        /// Conflicting name.
        name: String,
    },
    /// Settings supplied as raw name/value pairs were invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The server version could not be detected.
    #[error(transparent)]
    Version(#[from] VersionError),
    /// The server could not be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// No client could be connected.
    #[error(transparent)]
    Client(#[from] ClientError),
}
