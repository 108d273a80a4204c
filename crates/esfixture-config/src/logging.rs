//! Output settings for fixture lifecycle events.
//!
//! Launches, health polls and teardowns are reported through `tracing`. The
//! format decides how each event is rendered; the sink decides whether the
//! events go to standard error or into the output the test harness captures
//! per test.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Rendering of fixture lifecycle events.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, with fields such as `name`, `port` and
    /// `pid` at the top level.
    #[default]
    Json,
    /// One human-readable line per event.
    Compact,
}

/// Destination of fixture lifecycle events.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogSink {
    /// Standard error of the current process, as the CLI uses it.
    #[default]
    Stderr,
    /// Output captured by the test harness and shown for failing tests only.
    TestOutput,
}

/// Errors encountered while parsing a [`LogFormat`] or [`LogSink`] from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("COMPACT", LogFormat::Compact)]
    fn formats_parse_case_insensitively(#[case] text: &str, #[case] expected: LogFormat) {
        assert_eq!(text.parse::<LogFormat>().expect("parse format"), expected);
    }

    #[rstest]
    #[case("stderr", LogSink::Stderr)]
    #[case("Test_Output", LogSink::TestOutput)]
    fn sinks_parse_case_insensitively(#[case] text: &str, #[case] expected: LogSink) {
        assert_eq!(text.parse::<LogSink>().expect("parse sink"), expected);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!("pretty".parse::<LogFormat>().is_err());
        assert!("syslog".parse::<LogSink>().is_err());
    }

    #[test]
    fn sink_names_match_configuration_values() {
        assert_eq!(LogSink::TestOutput.to_string(), "test_output");
        assert_eq!(LogSink::default().to_string(), "stderr");
    }
}
