//! Tracing subscriber for fixture lifecycle events.
//!
//! Events under the `esfixture::*` targets describe servers being launched,
//! polled, reused and torn down. The CLI sends them to standard error. A test
//! suite can select [`LogSink::TestOutput`] so the events land in the output
//! the harness captures per test and only show up beside a failure.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter, TestWriter, time::UtcTime};

use esfixture_config::{Config, LogFormat, LogSink};

static INSTALLED_SINK: OnceCell<LogSink> = OnceCell::new();

/// Handle returned once the global subscriber is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    sink: LogSink,
}

impl TelemetryHandle {
    /// Sink chosen by the call that installed the subscriber.
    #[must_use]
    pub const fn sink(&self) -> LogSink {
        self.sink
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another subscriber was installed outside this module.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Every fixture scope and CLI command in a process may call this. Only the
/// first call installs anything; later calls report the sink already in use
/// whatever their own configuration says.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a subscriber was
/// installed by other code first.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED_SINK
        .get_or_try_init(|| install_subscriber(config).map(|()| config.log_sink()))
        .map(|sink| TelemetryHandle { sink: *sink })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let format = config.log_format();
    let subscriber = match config.log_sink() {
        LogSink::Stderr => build(filter, format, io::stderr, io::stderr().is_terminal()),
        LogSink::TestOutput => build(filter, format, TestWriter::new(), false),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn build<W>(
    filter: EnvFilter,
    format: LogFormat,
    writer: W,
    ansi: bool,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_rejected_before_installation() {
        let config = Config {
            log_filter: Some("esfixture=verbose".to_owned()),
            ..Config::default()
        };

        let error = install_subscriber(&config).expect_err("filter must be rejected");

        assert!(matches!(error, TelemetryError::Filter(_)));
    }

    #[test]
    fn later_calls_report_the_installed_sink() {
        let config = Config {
            log_sink: Some(LogSink::TestOutput),
            log_format: Some(LogFormat::Compact),
            ..Config::default()
        };

        let first = initialise(&config).expect("first initialisation");
        let second = initialise(&Config::default()).expect("repeat initialisation");

        assert_eq!(first.sink(), second.sink());
    }
}
