//! CLI entrypoint for the Elasticsearch fixture tool.
//!
//! Delegates to [`esfixture::run`], which loads the project configuration
//! and dispatches the `version`, `render` and `start` subcommands.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    esfixture::run(std::env::args_os(), &mut stdout, &mut stderr)
}
