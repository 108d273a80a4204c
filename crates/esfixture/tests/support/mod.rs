//! Helpers shared by the integration suites.
//!
//! A fake installation is a temporary `elasticsearch-X.Y.Z` tree whose
//! `bin/elasticsearch` is a symlink to the `fake-elasticsearch` binary, so
//! the double reports the version named by the directory.

#![expect(dead_code, reason = "no suite uses every helper")]
#![expect(
    clippy::expect_used,
    reason = "helpers fail the calling test on setup errors"
)]

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use esfixture::LaunchOptions;
use tempfile::TempDir;

/// Path of the compiled test double.
pub const FAKE_BINARY: &str = env!("CARGO_BIN_EXE_fake-elasticsearch");

/// Temporary installation impersonating one server release.
pub struct FakeInstallation {
    _root: TempDir,
    executable: Utf8PathBuf,
    logs: TempDir,
}

impl FakeInstallation {
    /// Executable inside the installation.
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Private logs directory for the test.
    pub fn logsdir(&self) -> Utf8PathBuf {
        utf8(&self.logs)
    }

    /// Distribution configuration directory.
    pub fn config_dir(&self) -> Utf8PathBuf {
        self.executable
            .parent()
            .and_then(Utf8Path::parent)
            .map(|home| home.join("config"))
            .expect("installation has a home directory")
    }
}

/// Creates an installation reporting `version`.
pub fn fake_installation(version: &str) -> FakeInstallation {
    let root = TempDir::new().expect("create installation root");
    let home = utf8(&root).join(format!("elasticsearch-{version}"));
    fs::create_dir_all(home.join("bin")).expect("create bin directory");
    fs::create_dir_all(home.join("config")).expect("create config directory");
    fs::write(home.join("config").join("jvm.options"), "-Xms64m\n").expect("write jvm.options");
    let executable = home.join("bin").join("elasticsearch");
    link(Utf8Path::new(FAKE_BINARY), &executable);
    FakeInstallation {
        _root: root,
        executable,
        logs: TempDir::new().expect("create logs directory"),
    }
}

#[cfg(unix)]
fn link(target: &Utf8Path, link: &Utf8Path) {
    std::os::unix::fs::symlink(target, link).expect("symlink fake binary");
}

#[cfg(not(unix))]
fn link(target: &Utf8Path, link: &Utf8Path) {
    fs::copy(target, link).expect("copy fake binary");
}

/// Launch options sized for the test double.
pub fn quick_launch() -> LaunchOptions {
    LaunchOptions::default()
        .with_startup_timeout(Duration::from_secs(20))
        .with_shutdown_grace(Duration::from_secs(5))
}

/// UTF-8 path of a temporary directory.
pub fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("temporary path is UTF-8")
}

/// Whether the operating system still knows process `pid`.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).expect("pid fits in i32");
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Delivers `signal` to process `pid`, as a crash or an operator would.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).expect("pid fits in i32");
    kill(Pid::from_raw(raw), signal).expect("deliver signal");
}

/// Polls `condition` every 20 ms until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
