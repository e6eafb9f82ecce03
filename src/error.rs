use derive_more::From;
use thiserror::Error;

use crate::device::Stage;

/// Errors raised while owning an interactive `gatttool` process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("the tool never printed its ready prompt")]
    PromptTimeout { output: Vec<String> },
    #[error("failed to write to the tool session")]
    Io(#[from] std::io::Error),
    #[error("the tool session is already closed")]
    Closed,
}

/// Errors returned by one send/wait cycle of the expect engine.
#[derive(Debug, Error)]
pub enum ExpectError {
    #[error("no response within the timeout")]
    Timeout { output: Vec<String> },
    #[error("tool reported an error: {detail}")]
    ToolFatal { detail: String, output: Vec<String> },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ExpectError {
    /// Returns the captured output at the time the cycle ended.
    #[must_use]
    pub fn output(&self) -> &[String] {
        match self {
            Self::Timeout { output } | Self::ToolFatal { output, .. } => output,
            Self::Session(_error) => &[],
        }
    }
}

/// Errors returned while mapping semantic commands to device payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CommandError {
    #[error("invalid {device} command `{command}`")]
    InvalidCommand { device: String, command: String },
}

/// Terminal failures of one device command invocation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{stage}/give_up after {attempts} attempts")]
    GiveUp { stage: Stage, attempts: u32 },
    #[error("{stage}/fatal-error: {detail}")]
    ToolFatal { stage: Stage, detail: String },
    #[error("{stage}/session-error")]
    Session { stage: Stage, source: SessionError },
    #[error(transparent)]
    InvalidCommand(#[from] CommandError),
    #[error("unexpected device response `{response}`")]
    UnexpectedResponse { response: String },
}

/// Errors returned by the scan harness.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("the scanner is not stopped")]
    NotStopped,
    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("scan process output could not be captured")]
    MissingStdout,
}

/// Errors returned by adapter recovery commands.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}")]
    CommandFailed { program: String, status: String },
    #[error("`{program}` kept failing after {attempts} attempts")]
    GiveUp { program: String, attempts: u32 },
}

/// Errors returned when a CLI run ends abnormally.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("scan could not start")]
    ScanStart(#[source] ScanError),
    #[error("scan processes terminated unexpectedly")]
    ScanTerminated,
    #[error("failed while waiting for a shutdown signal")]
    Signal(#[source] std::io::Error),
}

impl RunError {
    /// Process exit code reported for this failure class.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ScanStart(_error) => 2,
            Self::ScanTerminated | Self::Signal(_) => 1,
        }
    }
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Errors returned by the device handlers.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(DeviceError, Box<DeviceError>)]
    Device(Box<DeviceError>),
}
