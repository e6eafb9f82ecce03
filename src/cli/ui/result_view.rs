use std::fmt::{self, Display, Formatter};

use crate::cli::OutputFormat;
use crate::cli::operate::{DeviceKind, DoOutcome};
use crate::handlers::PlugState;

use super::painter::{Painter, Tone};

/// Renders the outcome of a `do` command.
///
/// JSON output is `true` for written commands and the plug state string
/// for the plug mini.
pub(crate) struct DoResultView<'a> {
    device: DeviceKind,
    outcome: DoOutcome,
    format: OutputFormat,
    painter: &'a Painter,
}

impl<'a> DoResultView<'a> {
    pub(crate) fn new(
        device: DeviceKind,
        outcome: DoOutcome,
        format: OutputFormat,
        painter: &'a Painter,
    ) -> Self {
        Self {
            device,
            outcome,
            format,
            painter,
        }
    }
}

impl Display for DoResultView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.format, self.outcome) {
            (OutputFormat::Json, DoOutcome::Written) => write!(f, "true"),
            (OutputFormat::Json, DoOutcome::Plug(state)) => write!(f, "\"{state}\""),
            (OutputFormat::Pretty, DoOutcome::Written) => write!(
                f,
                "{} {} command written",
                self.painter.paint(Tone::Done, "✓"),
                self.painter.paint(Tone::Identity, self.device.to_string())
            ),
            (OutputFormat::Pretty, DoOutcome::Plug(state)) => {
                let state_label = match state {
                    PlugState::On => self.painter.paint(Tone::Done, state.to_string()),
                    PlugState::Off => self.painter.paint(Tone::Attention, state.to_string()),
                };
                write!(
                    f,
                    "{} {} is {state_label}",
                    self.painter.paint(Tone::Done, "✓"),
                    self.painter.paint(Tone::Identity, self.device.to_string())
                )
            }
        }
    }
}
