use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

use crate::error::TelemetryError;

const CRATE_TARGET: &str = "switchbot::";
const DEFAULT_DIRECTIVE: &str = "warn";
const SPINNER_TICK: Duration = Duration::from_millis(90);

static TRACING: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Where log records go once tracing is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSink {
    /// Pretty records on stderr with a spinner per running stage span.
    Console,
    /// One JSON object per record on stderr.
    Json,
}

impl LogSink {
    fn detect(stderr_is_terminal: bool) -> Self {
        if stderr_is_terminal && io::stderr().is_terminal() {
            Self::Console
        } else {
            Self::Json
        }
    }
}

/// Installs the global tracing subscriber for this process.
///
/// Later calls return the outcome of the first one. `RUST_LOG` wins over
/// `level_override`; without either only warnings and errors are shown.
pub(crate) fn initialise_tracing(
    service_name: &str,
    stderr_is_terminal: bool,
    level_override: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING
        .get_or_init(|| {
            install(
                service_name,
                LogSink::detect(stderr_is_terminal),
                env_filter(level_override),
            )
        })
        .as_ref()
        .copied()
}

fn install(service_name: &str, sink: LogSink, env_filter: EnvFilter) -> Result<(), TelemetryError> {
    let tracer = tracer(service_name);

    match sink {
        LogSink::Console => {
            let spinners = IndicatifLayer::new()
                .with_progress_style(spinner_style())
                .with_tick_settings(TickSettings {
                    default_tick_interval: Some(SPINNER_TICK),
                    ..TickSettings::default()
                });
            let records = fmt::layer()
                .pretty()
                .with_target(false)
                .with_writer(spinners.get_stderr_writer())
                .with_filter(env_filter);

            tracing_subscriber::registry()
                .with(records)
                .with(spinners.with_filter(filter::filter_fn(shows_spinner)))
                .with(OpenTelemetryLayer::new(tracer))
                .try_init()?;
        }
        LogSink::Json => {
            let records = fmt::layer()
                .json()
                .with_target(false)
                .with_writer(io::stderr)
                .with_filter(env_filter);

            tracing_subscriber::registry()
                .with(records)
                .with(OpenTelemetryLayer::new(tracer))
                .try_init()?;
        }
    }

    Ok(())
}

fn tracer(service_name: &str) -> SdkTracer {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    opentelemetry::global::set_tracer_provider(provider);
    tracer
}

fn env_filter(level_override: Option<LevelFilter>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_missing| {
        level_override.map_or_else(
            || EnvFilter::new(DEFAULT_DIRECTIVE),
            |level| EnvFilter::new(level.to_string()),
        )
    })
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {span_name} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

// Spinners only for crate spans at info or louder.
fn shows_spinner(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(CRATE_TARGET)
        && *metadata.level() <= Level::INFO
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn piped_stderr_logs_json() {
        assert_eq!(LogSink::Json, LogSink::detect(false));
    }
}
