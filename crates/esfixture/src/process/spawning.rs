//! Server process spawning.

use std::process::{Child, Command, Stdio};

use camino::Utf8Path;
use tracing::debug;

use super::PROCESS_TARGET;
use super::error::ProcessError;
use super::log::ProcessLog;
use crate::render::RenderedConfig;

/// Spawns `executable` with the rendered arguments and environment.
///
/// Stdout and stderr both go to the process log; stdin is closed.
pub(super) fn spawn_server(
    executable: &Utf8Path,
    rendered: &RenderedConfig,
    log: &ProcessLog,
) -> Result<Child, ProcessError> {
    let (stdout, stderr) = log.stdio()?;
    let mut command = Command::new(executable);
    command
        .args(rendered.arguments())
        .envs(rendered.environment().iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    debug!(
        target: PROCESS_TARGET,
        executable = %executable,
        arguments = ?rendered.arguments(),
        log = %log.path(),
        "spawning server"
    );
    command.spawn().map_err(|source| ProcessError::Spawn {
        executable: executable.to_owned(),
        source,
    })
}
