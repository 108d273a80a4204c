//! Server version detection.
//!
//! The version of an installation decides how its startup configuration is
//! rendered, so it is read once per executable by running
//! `<executable> --version` and kept in a [`VersionCache`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::process::Command;
use std::sync::{PoisonError, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

/// Log target for version detection.
pub(crate) const VERSION_TARGET: &str = "esfixture::version";

const VERSION_MARKER: &str = "Version:";

/// Release number of a server installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major release.
    pub major: u32,
    /// Minor release.
    pub minor: u32,
    /// Patch release, without any pre-release suffix.
    pub patch: u32,
}

impl Version {
    /// Builds a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Errors raised while detecting a server version.
#[derive(Debug, Error)]
pub enum VersionError {
    /// The executable could not be run.
    #[error("failed to run '{executable} --version': {source}")]
    Invoke {
        /// Executable that was invoked.
        executable: Utf8PathBuf,
        /// Underlying launch failure.
        #[source]
        source: io::Error,
    },
    /// The version output did not contain a recognisable version.
    #[error("could not find a 'Version: X.Y.Z' line in the output: {output:?}")]
    Parse {
        /// Raw output of the version command.
        output: String,
    },
}

/// Extracts the version from the output of `--version`.
///
/// Accepts output such as `Version: 6.2.3, Build: c59ff00/2018-03-13, JVM:
/// 1.8.0_151`. A pre-release suffix on the patch component (`6.0.0-beta1`)
/// is ignored.
///
/// # Errors
///
/// Returns [`VersionError::Parse`] carrying the raw output when no version
/// can be found.
pub fn parse_version_output(output: &str) -> Result<Version, VersionError> {
    let parse_error = || VersionError::Parse {
        output: output.to_owned(),
    };
    let start = output.find(VERSION_MARKER).ok_or_else(parse_error)?;
    let token = output[start + VERSION_MARKER.len()..]
        .split(|c: char| c == ',' || c.is_whitespace())
        .find(|part| !part.is_empty())
        .ok_or_else(parse_error)?;

    let mut parts = token.splitn(3, '.');
    let mut component = |digits_only: bool| -> Option<u32> {
        let raw = parts.next()?;
        let digits = if digits_only {
            raw
        } else {
            let end = raw
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(raw.len());
            &raw[..end]
        };
        digits.parse().ok()
    };
    let major = component(true).ok_or_else(parse_error)?;
    let minor = component(true).ok_or_else(parse_error)?;
    let patch = component(false).ok_or_else(parse_error)?;
    Ok(Version::new(major, minor, patch))
}

/// Runs `<executable> --version` and parses the result.
///
/// Both output streams are inspected because older releases print the
/// banner on standard output while some launchers emit it on standard error.
///
/// # Errors
///
/// Returns [`VersionError::Invoke`] when the executable cannot be run and
/// [`VersionError::Parse`] when its output carries no version.
pub fn detect_version(executable: &Utf8Path) -> Result<Version, VersionError> {
    let output = Command::new(executable)
        .arg("--version")
        .output()
        .map_err(|source| VersionError::Invoke {
            executable: executable.to_owned(),
            source,
        })?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let version = parse_version_output(text.trim())?;
    debug!(
        target: VERSION_TARGET,
        executable = %executable,
        %version,
        "detected server version"
    );
    Ok(version)
}

/// Write-once cache of detected versions keyed by executable path.
///
/// Entries are populated lazily and never invalidated. Readers may share the
/// cache across threads.
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: RwLock<HashMap<Utf8PathBuf, Version>>,
}

impl VersionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached version for `executable`, detecting it on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`VersionError`] from [`detect_version`]; failures are not
    /// cached.
    pub fn detect(&self, executable: &Utf8Path) -> Result<Version, VersionError> {
        if let Some(version) = self.get(executable) {
            return Ok(version);
        }
        let version = detect_version(executable)?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(*entries.entry(executable.to_owned()).or_insert(version))
    }

    /// Cached version for `executable`, if it has been detected.
    #[must_use]
    pub fn get(&self, executable: &Utf8Path) -> Option<Version> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(executable)
            .copied()
    }

    /// Number of cached executables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been detected yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
