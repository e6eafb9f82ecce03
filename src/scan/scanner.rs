use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use strum_macros::Display;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::advertising::AdvertisingReport;
use super::hexdump::{Direction, HexDumpParser, RawPacket};
use super::reassembler::{MergedBatch, PacketReassembler};
use crate::error::ScanError;
use crate::text_codec;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_CRASH_DEBOUNCE: Duration = Duration::from_millis(500);
const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(200);

/// Settings for the two scan processes.
///
/// Program names and arguments can be replaced, which is how tests swap
/// in shell scripts for `hcidump` and `hcitool`.
#[derive(Debug, Clone, Builder)]
pub struct ScanConfig {
    #[builder(into, default = "hci0".to_string())]
    adapter: String,
    #[builder(into, default = "hcidump".to_string())]
    dump_program: String,
    /// Defaults to `-x -R -i <adapter>`.
    dump_args: Option<Vec<String>>,
    #[builder(into, default = "hcitool".to_string())]
    discovery_program: String,
    /// Defaults to `-i <adapter> lescan --duplicates --discovery=g`.
    discovery_args: Option<Vec<String>>,
    #[builder(default = DEFAULT_FLUSH_INTERVAL)]
    flush_interval: Duration,
    #[builder(default = DEFAULT_CRASH_DEBOUNCE)]
    crash_debounce: Duration,
    #[builder(default = DEFAULT_STOP_GRACE)]
    stop_grace: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanConfig {
    #[must_use]
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Returns a copy bound to `adapter`; default arguments follow it.
    #[must_use]
    pub fn with_adapter(mut self, adapter: &str) -> Self {
        self.adapter = adapter.to_string();
        self
    }

    fn dump_args(&self) -> Vec<String> {
        self.dump_args.clone().unwrap_or_else(|| {
            ["-x", "-R", "-i", self.adapter.as_str()]
                .map(str::to_string)
                .to_vec()
        })
    }

    fn discovery_args(&self) -> Vec<String> {
        self.discovery_args.clone().unwrap_or_else(|| {
            ["-i", self.adapter.as_str(), "lescan", "--duplicates", "--discovery=g"]
                .map(str::to_string)
                .to_vec()
        })
    }
}

/// Lifecycle of a [`Scanner`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Notifications sent on the scanner's outbound channel.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScanEvent {
    /// An inbound packet was parsed from the dump.
    Packet(RawPacket),
    /// One address's reports for the last window.
    Merged(MergedBatch),
    /// `stop` finished.
    Stopped,
    /// A scan process died on its own and the scan was torn down.
    Terminated,
}

#[derive(Debug)]
struct ProcessExit {
    program: String,
    status: String,
}

#[derive(Debug)]
struct RunHandles {
    flush_token: CancellationToken,
    process_token: CancellationToken,
    flush: JoinHandle<()>,
    supervisors: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    crash_handler: JoinHandle<()>,
}

impl RunHandles {
    /// Cancels the flush timer, then stops both processes. Returns the
    /// crash handler so the caller decides whether to abort it.
    async fn shutdown(self) -> JoinHandle<()> {
        self.flush_token.cancel();
        if let Err(error) = self.flush.await {
            debug!(?error, "flush task ended abnormally");
        }
        self.process_token.cancel();
        for supervisor in self.supervisors {
            if let Err(error) = supervisor.await {
                debug!(?error, "supervisor task ended abnormally");
            }
        }
        for worker in self.workers {
            worker.abort();
        }
        self.crash_handler
    }
}

#[derive(Debug, Default)]
struct ScanState {
    phase: ScanPhase,
    run: Option<RunHandles>,
}

/// Supervises `hcidump` and `hcitool lescan` as one unit.
///
/// Inbound packets are parsed, grouped by address and flushed as
/// [`ScanEvent::Merged`] batches on a fixed tick. If either process exits
/// while running, the other is stopped and [`ScanEvent::Terminated`] is
/// sent instead of surfacing an error.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScanConfig,
    events: UnboundedSender<ScanEvent>,
    state: Arc<Mutex<ScanState>>,
}

impl Scanner {
    #[must_use]
    pub fn new(config: ScanConfig, events: UnboundedSender<ScanEvent>) -> Self {
        Self {
            config,
            events,
            state: Arc::new(Mutex::new(ScanState::default())),
        }
    }

    /// Returns the current lifecycle phase.
    pub async fn phase(&self) -> ScanPhase {
        self.state.lock().await.phase
    }

    /// Launches both processes and the flush timer.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::NotStopped`] unless the scanner is stopped, and
    /// [`ScanError::Spawn`] when either program cannot be launched. A failed
    /// start leaves no process behind.
    #[instrument(skip(self), level = "info", fields(adapter = %self.config.adapter))]
    pub async fn start(&self) -> Result<(), ScanError> {
        let mut state = self.state.lock().await;
        if state.phase != ScanPhase::Stopped {
            return Err(ScanError::NotStopped);
        }
        state.phase = ScanPhase::Starting;

        match self.launch().await {
            Ok(run) => {
                state.run = Some(run);
                state.phase = ScanPhase::Running;
                info!("scan running");
                Ok(())
            }
            Err(error) => {
                state.phase = ScanPhase::Stopped;
                Err(error)
            }
        }
    }

    /// Stops the scan. Does nothing when already stopped or stopping.
    #[instrument(skip(self), level = "info", fields(adapter = %self.config.adapter))]
    pub async fn stop(&self) {
        let run = {
            let mut state = self.state.lock().await;
            if matches!(state.phase, ScanPhase::Stopped | ScanPhase::Stopping) {
                debug!(phase = %state.phase, "stop ignored");
                return;
            }
            state.phase = ScanPhase::Stopping;
            state.run.take()
        };

        if let Some(run) = run {
            run.shutdown().await.abort();
        }
        sleep(self.config.stop_grace).await;
        self.state.lock().await.phase = ScanPhase::Stopped;
        info!("scan stopped");
        emit(&self.events, ScanEvent::Stopped);
    }

    async fn launch(&self) -> Result<RunHandles, ScanError> {
        let dump_program = self.config.dump_program.clone();
        let discovery_program = self.config.discovery_program.clone();

        let mut dump = spawn_tool(&dump_program, &self.config.dump_args(), true)?;
        let mut discovery =
            match spawn_tool(&discovery_program, &self.config.discovery_args(), false) {
                Ok(child) => child,
                Err(error) => {
                    kill_and_reap(&dump_program, &mut dump).await;
                    return Err(error);
                }
            };
        let Some(dump_stdout) = dump.stdout.take() else {
            kill_and_reap(&dump_program, &mut dump).await;
            kill_and_reap(&discovery_program, &mut discovery).await;
            return Err(ScanError::MissingStdout);
        };

        let flush_token = CancellationToken::new();
        let process_token = CancellationToken::new();
        let reassembler = Arc::new(StdMutex::new(PacketReassembler::new()));
        let (crash_tx, crash_rx) = unbounded_channel();

        let mut workers = vec![tokio::spawn(read_dump(
            dump_stdout,
            Arc::clone(&reassembler),
            self.events.clone(),
        ))];
        if let Some(stderr) = dump.stderr.take() {
            workers.push(tokio::spawn(forward_stderr(dump_program.clone(), stderr)));
        }
        if let Some(stderr) = discovery.stderr.take() {
            workers.push(tokio::spawn(forward_stderr(discovery_program.clone(), stderr)));
        }
        let flush = tokio::spawn(flush_batches(
            self.config.flush_interval,
            reassembler,
            self.events.clone(),
            flush_token.clone(),
        ));
        let supervisors = vec![
            tokio::spawn(supervise(
                dump_program,
                dump,
                process_token.clone(),
                crash_tx.clone(),
            )),
            tokio::spawn(supervise(
                discovery_program,
                discovery,
                process_token.clone(),
                crash_tx,
            )),
        ];
        let crash_handler = tokio::spawn(handle_crashes(
            Arc::clone(&self.state),
            crash_rx,
            self.events.clone(),
            self.config.crash_debounce,
        ));

        Ok(RunHandles {
            flush_token,
            process_token,
            flush,
            supervisors,
            workers,
            crash_handler,
        })
    }
}

fn emit(events: &UnboundedSender<ScanEvent>, event: ScanEvent) {
    if events.send(event).is_err() {
        trace!("scan event receiver dropped");
    }
}

fn lock(reassembler: &StdMutex<PacketReassembler>) -> MutexGuard<'_, PacketReassembler> {
    reassembler.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_tool(program: &str, args: &[String], capture_stdout: bool) -> Result<Child, ScanError> {
    debug!(program, ?args, "launching scan process");
    let stdout = if capture_stdout {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ScanError::Spawn {
            program: program.to_string(),
            source,
        })
}

async fn kill_and_reap(program: &str, child: &mut Child) {
    if let Err(error) = child.start_kill() {
        debug!(program, ?error, "scan process already gone");
    }
    match child.wait().await {
        Ok(status) => debug!(program, %status, "scan process reaped"),
        Err(error) => debug!(program, ?error, "failed to reap scan process"),
    }
}

async fn supervise(
    program: String,
    mut child: Child,
    token: CancellationToken,
    crashes: UnboundedSender<ProcessExit>,
) {
    let exited = tokio::select! {
        () = token.cancelled() => None,
        status = child.wait() => Some(status),
    };
    let Some(status) = exited else {
        kill_and_reap(&program, &mut child).await;
        return;
    };

    let status = match status {
        Ok(status) => status.to_string(),
        Err(error) => error.to_string(),
    };
    if crashes.send(ProcessExit { program, status }).is_err() {
        trace!("crash handler already gone");
    }
}

// One handler per run. Exits arriving within `debounce` of the one that
// tore the run down collapse into its single `Terminated`.
async fn handle_crashes(
    state: Arc<Mutex<ScanState>>,
    mut crashes: UnboundedReceiver<ProcessExit>,
    events: UnboundedSender<ScanEvent>,
    debounce: Duration,
) {
    let mut last_crash: Option<Instant> = None;
    while let Some(exit) = crashes.recv().await {
        let now = Instant::now();
        if last_crash.is_some_and(|last| now.duration_since(last) < debounce) {
            debug!(program = %exit.program, "exit inside crash debounce window ignored");
            continue;
        }
        let run = {
            let mut state = state.lock().await;
            if state.phase != ScanPhase::Running {
                debug!(program = %exit.program, phase = %state.phase, "exit while not running ignored");
                continue;
            }
            last_crash = Some(now);
            state.phase = ScanPhase::Stopping;
            state.run.take()
        };

        warn!(program = %exit.program, status = %exit.status, "scan process exited unexpectedly");
        if let Some(run) = run {
            // Dropping our own handle detaches it; the loop ends once both
            // supervisors are gone.
            drop(run.shutdown().await);
        }
        state.lock().await.phase = ScanPhase::Stopped;
        emit(&events, ScanEvent::Terminated);
    }
}

async fn read_dump<R>(
    reader: R,
    reassembler: Arc<StdMutex<PacketReassembler>>,
    events: UnboundedSender<ScanEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut parser = HexDumpParser::new();
    let read = text_codec::for_each_chunk(reader, |chunk| {
        for packet in parser.push(chunk) {
            if packet.direction() != Direction::Inbound {
                continue;
            }
            let reports = AdvertisingReport::parse_event(packet.bytes());
            trace!(bytes = packet.bytes().len(), reports = reports.len(), "inbound packet");
            {
                let mut pending = lock(&reassembler);
                for report in reports {
                    pending.push(report);
                }
            }
            emit(&events, ScanEvent::Packet(packet));
        }
    })
    .await;
    if let Err(error) = read {
        warn!(?error, "failed reading packet dump");
    }
    debug!("packet dump closed");
}

async fn flush_batches(
    period: Duration,
    reassembler: Arc<StdMutex<PacketReassembler>>,
    events: UnboundedSender<ScanEvent>,
    token: CancellationToken,
) {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _tick = ticks.tick() => {
                let batches = lock(&reassembler).flush();
                for batch in batches {
                    debug!(address = batch.address(), reports = batch.reports().len(), "flushing batch");
                    emit(&events, ScanEvent::Merged(batch));
                }
            }
        }
    }
}

async fn forward_stderr<R>(program: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    let forwarded = text_codec::for_each_chunk(reader, |chunk| {
        warn!(program = %program, stderr = %chunk.trim(), "scan process");
    })
    .await;
    if let Err(error) = forwarded {
        debug!(program = %program, ?error, "scan process stderr closed");
    }
}
