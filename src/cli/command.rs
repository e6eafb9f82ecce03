use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use super::operate::DoArgs;
use super::scan::ScanArgs;

/// Command-line options for the SwitchBot tool.
#[derive(Debug, Parser)]
#[command(
    name = "switchbot",
    about = "Drive SwitchBot BLE devices through gatttool, hcidump and hcitool."
)]
pub struct Args {
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to pretty on a terminal and JSON otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use switchbot::{Args, Command, ScanArgs};
    ///
    /// let args = Args::new(Command::Scan(ScanArgs::new("hci0", None)));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            command,
        }
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    #[must_use]
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for advertisements and print one record per decoded device.
    Scan(ScanArgs),
    /// Send one command to a bot, curtain or plug mini.
    Do(DoArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Do(_args) => "do",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured, human-readable lines.
    Pretty,
    /// One JSON value per line.
    Json,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn command_is_required() {
        let error = Args::try_parse_from(["switchbot"]).expect_err("a subcommand is required");
        assert_eq!(
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand,
            error.kind()
        );
    }

    #[rstest]
    #[case("error", LevelFilter::ERROR)]
    #[case("info", LevelFilter::INFO)]
    #[case("trace", LevelFilter::TRACE)]
    fn log_level_is_global(#[case] value: &str, #[case] expected: LevelFilter) {
        let args = Args::try_parse_from(["switchbot", "scan", "--log-level", value])
            .expect("log level should parse after the subcommand");

        assert_eq!(Some(expected), args.log_level().map(LogLevel::as_level_filter));
    }

    #[test]
    fn output_format_parses() {
        let args = Args::try_parse_from(["switchbot", "--output", "json", "scan"])
            .expect("output format should parse");

        assert_matches!(args.output_format(), Some(OutputFormat::Json));
        assert_eq!("scan", args.into_command().name());
    }
}
