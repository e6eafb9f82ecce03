use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, instrument, warn};

use super::OutputFormat;
use super::ui::{AdvertisementView, Painter};
use crate::error::RunError;
use crate::scan::{
    AdapterControl, AdvertisementDecoder, DecodedAdvertisement, MergedAdvertisement, ScanConfig,
    ScanEvent, Scanner,
};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Adapter to scan on.
    #[arg(short = 'i', long, default_value = "hci0")]
    hci: String,
    /// Stop after this long: plain seconds (`30`) or a duration (`90s`, `2m`).
    /// Without it, scan until Ctrl+C or SIGTERM.
    #[arg(short = 't', long, value_parser = parse_scan_duration)]
    time: Option<Duration>,
    /// Reset the adapter with `hciconfig` before scanning.
    #[arg(long)]
    reset_adapter: bool,
}

impl ScanArgs {
    /// Creates scan arguments.
    #[must_use]
    pub fn new(hci: &str, time: Option<Duration>) -> Self {
        Self {
            hci: hci.to_string(),
            time,
            reset_adapter: false,
        }
    }

    #[must_use]
    pub fn hci(&self) -> &str {
        &self.hci
    }

    #[must_use]
    pub fn time(&self) -> Option<Duration> {
        self.time
    }
}

fn parse_scan_duration(value: &str) -> Result<Duration, String> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[derive(Serialize)]
struct AdvertisementLine<'a> {
    #[serde(with = "time::serde::rfc3339")]
    received_at: OffsetDateTime,
    #[serde(flatten)]
    advertisement: &'a DecodedAdvertisement,
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "info", fields(adapter = args.hci(), time = ?args.time()))]
pub(crate) async fn run<W>(
    args: &ScanArgs,
    config: ScanConfig,
    decoder: &dyn AdvertisementDecoder,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    if args.reset_adapter {
        let control = AdapterControl::builder().adapter(args.hci()).build();
        if let Err(error) = control.reset().await {
            warn!(%error, "adapter reset failed, scanning anyway");
        }
    }

    let (events_tx, events_rx) = unbounded_channel();
    let mut events = UnboundedReceiverStream::new(events_rx);
    let scanner = Scanner::new(config, events_tx);
    scanner.start().await.map_err(RunError::ScanStart)?;

    let outcome = pump_events(&mut events, args.time(), decoder, out, format, painter).await;
    scanner.stop().await;
    outcome
}

async fn pump_events<W>(
    events: &mut UnboundedReceiverStream<ScanEvent>,
    limit: Option<Duration>,
    decoder: &dyn AdvertisementDecoder,
    out: &mut W,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let deadline = async {
        match limit {
            Some(limit) => sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!("scan time elapsed");
                return Ok(());
            }
            signal = &mut shutdown => {
                signal.map_err(RunError::Signal)?;
                info!("shutdown requested");
                return Ok(());
            }
            event = events.next() => match event {
                Some(ScanEvent::Merged(batch)) => {
                    let Some(merged) = MergedAdvertisement::from_batch(&batch) else {
                        continue;
                    };
                    if let Some(decoded) = decoder.decode(&merged) {
                        write_advertisement(out, &decoded, format, painter)?;
                    }
                }
                Some(ScanEvent::Terminated) => return Err(RunError::ScanTerminated.into()),
                Some(ScanEvent::Packet(_) | ScanEvent::Stopped) => {}
                None => return Ok(()),
            },
        }
    }
}

fn write_advertisement<W>(
    out: &mut W,
    advertisement: &DecodedAdvertisement,
    format: OutputFormat,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    match format {
        OutputFormat::Json => {
            let line = AdvertisementLine {
                received_at: OffsetDateTime::now_utc(),
                advertisement,
            };
            writeln!(out, "{}", serde_json::to_string(&line)?)?;
        }
        OutputFormat::Pretty => {
            writeln!(out, "{}", AdvertisementView::new(advertisement, painter))?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _signal = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("30", Duration::from_secs(30))]
    #[case("90s", Duration::from_secs(90))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1500ms", Duration::from_millis(1500))]
    fn scan_duration_accepts_seconds_and_humantime(#[case] value: &str, #[case] expected: Duration) {
        assert_eq!(Ok(expected), parse_scan_duration(value));
    }

    #[test]
    fn scan_duration_rejects_garbage() {
        assert!(parse_scan_duration("soon").is_err());
    }
}
