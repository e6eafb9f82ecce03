use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::line_buffer::LineLog;
use crate::error::SessionError;
use crate::protocol::{self, ToolCommand};
use crate::text_codec;

pub(crate) const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(250);

/// How the target advertises its address.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
pub enum AddressKind {
    /// Public device address.
    #[default]
    #[display("public")]
    Public,
    /// Random (static) device address.
    #[display("random")]
    Random,
}

/// A device address plus its address kind.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TargetAddress {
    address: String,
    kind: AddressKind,
}

impl TargetAddress {
    /// Creates a target with a public address.
    #[must_use]
    pub fn public(address: &str) -> Self {
        Self::new(address, AddressKind::Public)
    }

    /// Creates a target with a random address.
    #[must_use]
    pub fn random(address: &str) -> Self {
        Self::new(address, AddressKind::Random)
    }

    /// Creates a target, normalising the address to upper case.
    #[must_use]
    pub fn new(address: &str, kind: AddressKind) -> Self {
        Self {
            address: address.trim().to_ascii_uppercase(),
            kind,
        }
    }

    /// Returns the upper-cased address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the address kind.
    #[must_use]
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Returns the idle prompt the tool prints for this target.
    #[must_use]
    pub fn prompt(&self) -> String {
        protocol::idle_prompt(&self.address)
    }
}

/// One live interactive tool session bound to a single target.
#[async_trait]
pub trait GattTransport: Send + Sync + std::fmt::Debug {
    /// Writes `text` followed by a newline to the tool.
    async fn send(&self, text: &str) -> Result<(), SessionError>;

    /// Returns the shared output log.
    fn lines(&self) -> &LineLog;

    /// Returns the idle prompt signature for this session.
    fn prompt(&self) -> &str;

    /// Returns whether the underlying tool is still running.
    async fn is_alive(&self) -> bool;

    /// Sends a polite exit, waits a grace period, then terminates the tool.
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Opens interactive sessions against a named adapter.
#[async_trait]
pub trait GattClient: Send + Sync {
    /// Opens a session and waits for the initial ready prompt.
    async fn open(
        &self,
        adapter: &str,
        target: &TargetAddress,
    ) -> Result<Box<dyn GattTransport>, SessionError>;
}

/// Settings for launching `gatttool` sessions.
#[derive(Debug, Clone, Builder)]
pub struct GattToolConfig {
    #[builder(into, default = "gatttool".to_string())]
    program: String,
    /// Arguments placed before the generated `gatttool` arguments.
    #[builder(default)]
    leading_args: Vec<String>,
    #[builder(default = DEFAULT_PROMPT_TIMEOUT)]
    prompt_timeout: Duration,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
    #[builder(default = DEFAULT_EXIT_GRACE)]
    exit_grace: Duration,
}

impl Default for GattToolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GattToolConfig {
    fn command_args(&self, adapter: &str, target: &TargetAddress) -> Vec<String> {
        let mut args = self.leading_args.clone();
        if target.kind() == AddressKind::Random {
            args.extend(["-t".to_string(), "random".to_string()]);
        }
        args.extend([
            "-b".to_string(),
            target.address().to_string(),
            "-i".to_string(),
            adapter.to_string(),
            "-I".to_string(),
        ]);
        args
    }
}

/// Client that launches a real `gatttool -I` process per session.
#[derive(Debug, Clone, Default)]
pub struct GattToolClient {
    config: GattToolConfig,
}

impl GattToolClient {
    /// Creates a client with explicit launch settings.
    #[must_use]
    pub fn new(config: GattToolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GattClient for GattToolClient {
    async fn open(
        &self,
        adapter: &str,
        target: &TargetAddress,
    ) -> Result<Box<dyn GattTransport>, SessionError> {
        let session = GatttoolSession::open(&self.config, adapter, target).await?;
        Ok(Box::new(session))
    }
}

/// Interactive `gatttool` child process with its output log.
#[derive(Debug)]
pub struct GatttoolSession {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    lines: LineLog,
    prompt: String,
    exit_grace: Duration,
    readers: Vec<JoinHandle<()>>,
}

impl GatttoolSession {
    /// Launches the tool and waits for its ready prompt.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when the binary cannot be started and
    /// [`SessionError::PromptTimeout`] when no prompt appears in time.
    #[instrument(skip(config, target), level = "debug", fields(address = target.address(), kind = %target.kind()))]
    pub async fn open(
        config: &GattToolConfig,
        adapter: &str,
        target: &TargetAddress,
    ) -> Result<Self, SessionError> {
        let args = config.command_args(adapter, target);
        debug!(program = %config.program, ?args, "launching interactive session");
        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let lines = LineLog::new();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_output(stdout, lines.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_stderr(stderr)));
        }
        let stdin = child.stdin.take();

        let session = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            lines,
            prompt: target.prompt(),
            exit_grace: config.exit_grace,
            readers,
        };

        if let Err(error) =
            wait_for_prompt(&session, config.prompt_timeout, config.poll_interval).await
        {
            session.terminate().await;
            return Err(error);
        }
        info!(prompt = %session.prompt, "session ready");

        Ok(session)
    }

    async fn terminate(&self) {
        let mut child = self.child.lock().await;
        if let Err(error) = child.start_kill() {
            debug!(?error, "session process already gone");
        }
        if let Err(error) = child.wait().await {
            debug!(?error, "failed to reap session process");
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

#[async_trait]
impl GattTransport for GatttoolSession {
    async fn send(&self, text: &str) -> Result<(), SessionError> {
        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or(SessionError::Closed)?;
        debug!(command = text, "sending");
        writer.write_all(format!("{text}\n").as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn lines(&self) -> &LineLog {
        &self.lines
    }

    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        if let Err(error) = self.send(&ToolCommand::Exit.to_string()).await {
            debug!(?error, "exit command could not be delivered");
        }
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(error) = stdin.shutdown().await {
                debug!(?error, "failed to close session stdin");
            }
        }
        sleep(self.exit_grace).await;
        self.terminate().await;
        Ok(())
    }
}

/// Polls until the last buffered line equals the session prompt.
///
/// # Errors
///
/// Returns [`SessionError::PromptTimeout`] with the buffered output when the
/// prompt does not appear within `limit`.
pub async fn wait_for_prompt(
    session: &dyn GattTransport,
    limit: Duration,
    poll_interval: Duration,
) -> Result<Vec<String>, SessionError> {
    let lines = session.lines().clone();
    let prompt = session.prompt().to_string();
    let poll = async {
        loop {
            if lines.last_line_is(&prompt) {
                let mut output = lines.snapshot();
                output.pop();
                return output;
            }
            sleep(poll_interval).await;
        }
    };

    timeout(limit, poll)
        .await
        .map_err(|_elapsed| SessionError::PromptTimeout {
            output: lines.snapshot(),
        })
}

async fn pump_output<R>(reader: R, lines: LineLog)
where
    R: AsyncRead + Unpin,
{
    if let Err(error) = text_codec::for_each_chunk(reader, |chunk| lines.push_chunk(chunk)).await {
        warn!(?error, "failed reading session output");
    }
}

async fn pump_stderr<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let forwarded = text_codec::for_each_chunk(reader, |chunk| {
        warn!(stderr = %chunk.trim(), "gatttool");
    })
    .await;
    if let Err(error) = forwarded {
        debug!(?error, "gatttool stderr closed");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn target_address_is_upper_cased_and_derives_prompt() {
        let target = TargetAddress::random("c1:d2:e3:f4:a5:b6");

        assert_eq!("C1:D2:E3:F4:A5:B6", target.address());
        assert_eq!("[C1:D2:E3:F4:A5:B6][LE]>", target.prompt());
    }

    #[test]
    fn random_targets_add_address_type_argument() {
        let config = GattToolConfig::default();
        let args = config.command_args("hci1", &TargetAddress::random("aa:bb:cc:dd:ee:ff"));

        assert_eq!(
            vec!["-t", "random", "-b", "AA:BB:CC:DD:EE:FF", "-i", "hci1", "-I"],
            args
        );
    }

    #[test]
    fn public_targets_follow_leading_args() {
        let config = GattToolConfig::builder()
            .program("sh")
            .leading_args(vec!["-c".to_string(), "true".to_string()])
            .build();
        let args = config.command_args("hci0", &TargetAddress::public("aa:bb:cc:dd:ee:ff"));

        assert_eq!(
            vec!["-c", "true", "-b", "AA:BB:CC:DD:EE:FF", "-i", "hci0", "-I"],
            args
        );
    }
}
