use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use strum_macros::Display;
use tracing::instrument;

use super::OutputFormat;
use super::ui::{DoResultView, Painter};
use crate::device::{DeviceCommandProtocol, RetryPolicy};
use crate::gatt::GattClient;
use crate::handlers::{
    BotCommand, BotHandler, CurtainCommand, CurtainHandler, PlugMiniCommand, PlugMiniHandler,
    PlugState,
};

const DEFAULT_MAX_RETRIES: u32 = 20;

/// Device family addressed by `do`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    /// Button pusher: `press`, `on`, `off`, `down`, `up`.
    Bot,
    /// Curtain motor: `open`, `close`, `pause` or `{"percent":N,"mode":"performance|silence"}`.
    Curtain,
    /// Plug mini relay: `on`, `off`, `toggle`.
    #[value(name = "plugmini")]
    PlugMini,
}

/// Arguments for the `do` command.
#[derive(Debug, Args)]
pub struct DoArgs {
    /// Adapter the session is opened on.
    #[arg(short = 'i', long, default_value = "hci0")]
    hci: String,
    /// Device address.
    #[arg(short = 'b', long, short_alias = 'm')]
    mac: String,
    #[arg(short = 'd', long, value_enum)]
    device: DeviceKind,
    /// Command word, or a JSON object for curtain positions.
    #[arg(short = 'c', long)]
    command: String,
    /// Retries per protocol stage after the first attempt.
    #[arg(short = 'r', long, alias = "max_retries", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

impl DoArgs {
    /// Creates `do` arguments with the default retry budget.
    #[must_use]
    pub fn new(hci: &str, mac: &str, device: DeviceKind, command: &str) -> Self {
        Self {
            hci: hci.to_string(),
            mac: mac.to_string(),
            device,
            command: command.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// What a successful `do` reports.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum DoOutcome {
    Written,
    Plug(PlugState),
}

/// Executes the `do` command.
///
/// Commands are validated before any session is opened.
#[instrument(skip_all, level = "info", fields(device = %args.device, address = %args.mac))]
pub(crate) async fn run<W>(
    args: &DoArgs,
    gatt_client: Arc<dyn GattClient>,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let protocol = DeviceCommandProtocol::builder()
        .client(gatt_client)
        .policy(RetryPolicy::builder().max_retries(args.max_retries).build())
        .build();

    let outcome = match args.device {
        DeviceKind::Bot => {
            let command = BotCommand::parse(&args.command)?;
            BotHandler::send(&protocol, &args.hci, &args.mac, command).await?;
            DoOutcome::Written
        }
        DeviceKind::Curtain => {
            let command = CurtainCommand::parse(&args.command)?;
            CurtainHandler::send(&protocol, &args.hci, &args.mac, command).await?;
            DoOutcome::Written
        }
        DeviceKind::PlugMini => {
            let command = PlugMiniCommand::parse(&args.command)?;
            let state = PlugMiniHandler::send(&protocol, &args.hci, &args.mac, command).await?;
            DoOutcome::Plug(state)
        }
    };

    writeln!(out, "{}", DoResultView::new(args.device, outcome, format, painter))?;
    Ok(())
}
