use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::ui::Painter;
use crate::cli::{Command, LogLevel, OutputFormat};
use crate::gatt::{GattClient, GattToolClient};
use crate::scan::{AdvertisementDecoder, ScanConfig, SwitchbotDecoder};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// External tools the CLI drives.
///
/// The real backend launches `gatttool`, `hcidump` and `hcitool`; tests
/// swap in a [`FakeGattTool`](crate::FakeGattTool) or shell scripts.
#[derive(Builder)]
pub struct ToolBackend {
    #[builder(default = Arc::new(GattToolClient::default()) as Arc<dyn GattClient>)]
    gatt_client: Arc<dyn GattClient>,
    /// Template for scans; the adapter is taken from the command line.
    #[builder(default)]
    scan_config: ScanConfig,
    #[builder(default = Box::new(SwitchbotDecoder) as Box<dyn AdvertisementDecoder>)]
    decoder: Box<dyn AdvertisementDecoder>,
}

impl std::fmt::Debug for ToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBackend")
            .field("scan_config", &self.scan_config)
            .finish_non_exhaustive()
    }
}

/// Creates a backend that launches the real BlueZ tools.
#[must_use]
pub fn real_backend() -> ToolBackend {
    ToolBackend::builder().build()
}

/// Runs the CLI command against `backend`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use std::sync::Arc;
///
/// use clap::Parser;
///
/// let args = switchbot::Args::try_parse_from([
///     "switchbot", "do", "-b", "C1:D2:E3:F4:A5:B6", "-d", "bot", "-c", "sideways",
/// ])?;
/// let backend = switchbot::ToolBackend::builder()
///     .gatt_client(Arc::new(switchbot::FakeGattTool::default()))
///     .build();
/// let mut out = Vec::new();
/// let result = switchbot::run(args.into_command(), &mut out, backend).await;
/// assert!(result.is_err());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a device command or
/// scan fails, or output writing fails.
pub async fn run<W>(command: Command, out: &mut W, backend: ToolBackend) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None, None).await
}

/// Runs the CLI command with explicit log-level and output-format overrides.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a device command or
/// scan fails, or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: ToolBackend,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        backend,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a device command or
/// scan fails, or output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: ToolBackend,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, backend, None, None).await
}

/// Runs the CLI command with injected clients and explicit settings.
///
/// Without an `output_format`, pretty output is used when stdout is a
/// terminal and JSON otherwise.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use std::sync::Arc;
///
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl switchbot::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = switchbot::Args::try_parse_from([
///     "switchbot", "--log-level", "debug", "do", "-b", "C1:D2:E3:F4:A5:B6",
///     "-d", "plugmini", "-c", "dim",
/// ])?;
/// let log_level = args.log_level();
/// let backend = switchbot::ToolBackend::builder()
///     .gatt_client(Arc::new(switchbot::FakeGattTool::default()))
///     .build();
/// let mut out = Vec::new();
/// let result = switchbot::run_with_clients_and_log_level(
///     args.into_command(),
///     &mut out,
///     &FakeTerminal,
///     backend,
///     log_level,
///     None,
/// ).await;
/// assert!(result.is_err());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a device command or
/// scan fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = command.name(), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: ToolBackend,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "switchbot",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let stdout_is_terminal = terminal_client.stdout_is_terminal();
    let format = output_format.unwrap_or(if stdout_is_terminal {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let painter = Painter::new(stdout_is_terminal && format == OutputFormat::Pretty);

    match command {
        Command::Scan(args) => {
            let config = backend.scan_config.with_adapter(args.hci());
            crate::cli::scan::run(
                &args,
                config,
                backend.decoder.as_ref(),
                out,
                format,
                &painter,
            )
            .await
        }
        Command::Do(args) => {
            crate::cli::operate::run(&args, backend.gatt_client, out, format, &painter).await
        }
    }
}
