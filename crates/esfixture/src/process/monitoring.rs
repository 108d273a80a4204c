//! Health polling during startup.
//!
//! The server counts as healthy once its root endpoint answers with a
//! success status. The child must still be alive at every poll; an early
//! exit ends the wait immediately, and so does a stop request from another
//! thread.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use url::Url;

use super::error::ProcessError;

/// Interval between health polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

const CHECK_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks whether a server answers on its health endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait HealthCheck {
    /// Returns `true` once `url` answers with a success status.
    fn is_healthy(&self, url: &Url) -> bool;
}

/// [`HealthCheck`] issuing blocking HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::blocking::Client,
}

impl HttpHealthCheck {
    /// Builds a checker with a short per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::HealthClient`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, ProcessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(CHECK_REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ProcessError::HealthClient { source })?;
        Ok(Self { client })
    }
}

impl HealthCheck for HttpHealthCheck {
    fn is_healthy(&self, url: &Url) -> bool {
        self.client
            .get(url.clone())
            .send()
            .is_ok_and(|response| response.status().is_success())
    }
}

/// Source of a child's exit status.
pub(super) trait ChildStatus {
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>>;
}

impl ChildStatus for Child {
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        self.try_wait()
    }
}

/// Why a server never became healthy.
#[derive(Debug)]
pub(super) enum ReadinessFailure {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    Monitor(io::Error),
}

/// Deadline and pacing of one readiness wait.
#[derive(Debug, Clone, Copy)]
pub(super) struct Polling {
    pub(super) timeout: Duration,
    pub(super) interval: Duration,
}

/// Polls `check` until the server is healthy or `polling.timeout` elapses.
///
/// `cancelled` is checked before every poll. Returns the number of polls it
/// took.
pub(super) fn wait_for_healthy<C, P, F>(
    child: &mut C,
    check: &P,
    url: &Url,
    polling: Polling,
    cancelled: F,
) -> Result<u32, ReadinessFailure>
where
    C: ChildStatus + ?Sized,
    P: HealthCheck + ?Sized,
    F: Fn() -> bool,
{
    let deadline = Instant::now() + polling.timeout;
    let mut attempts = 0;
    while Instant::now() < deadline {
        if cancelled() {
            return Err(ReadinessFailure::Cancelled);
        }
        if let Some(status) = child.poll_exit().map_err(ReadinessFailure::Monitor)? {
            return Err(ReadinessFailure::Exited(status));
        }
        attempts += 1;
        if check.is_healthy(url) {
            return Ok(attempts);
        }
        thread::sleep(polling.interval);
    }
    Err(ReadinessFailure::TimedOut)
}
