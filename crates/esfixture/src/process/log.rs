//! Capture of server output.

use std::fs::{self, File};
use std::io;
use std::process::Stdio;

use camino::{Utf8Path, Utf8PathBuf};

use super::error::ProcessError;

/// File name of the captured stdout and stderr inside the logs directory.
pub const PROCESS_LOG_NAME: &str = "process.log";

/// Lines of output quoted in startup errors.
pub(super) const TAIL_LINES: usize = 40;

/// Open handle on the file receiving a server's stdout and stderr.
#[derive(Debug)]
pub(super) struct ProcessLog {
    path: Utf8PathBuf,
    file: File,
}

impl ProcessLog {
    /// Creates (or truncates) the process log inside `logs_dir`.
    pub(super) fn create(logs_dir: &Utf8Path) -> Result<Self, ProcessError> {
        let path = logs_dir.join(PROCESS_LOG_NAME);
        let file = File::create(&path).map_err(|source| ProcessError::Prepare {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, file })
    }

    pub(super) fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Stdout and stderr handles for the child process.
    pub(super) fn stdio(&self) -> Result<(Stdio, Stdio), ProcessError> {
        let clone = || {
            self.file.try_clone().map_err(|source| ProcessError::Prepare {
                path: self.path.clone(),
                source,
            })
        };
        Ok((Stdio::from(clone()?), Stdio::from(clone()?)))
    }

    /// Last `lines` lines written so far.
    pub(super) fn tail(&self, lines: usize) -> String {
        read_tail(&self.path, lines).unwrap_or_default()
    }
}

fn read_tail(path: &Utf8Path, lines: usize) -> io::Result<String> {
    let contents = fs::read_to_string(path)?;
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}
