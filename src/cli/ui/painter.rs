use owo_colors::{OwoColorize, Style};

/// What a piece of terminal output means, which decides its colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tone {
    /// Device model column in scan output.
    Model,
    /// MAC addresses and device names.
    Identity,
    /// Completed commands and relays that are on.
    Done,
    /// Low batteries and relays that are off.
    Attention,
    /// Secondary fields such as RSSI.
    Detail,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Model => Style::new().bold().cyan(),
            Self::Identity => Style::new().bold(),
            Self::Done => Style::new().bold().green(),
            Self::Attention => Style::new().bold().yellow(),
            Self::Detail => Style::new().dimmed(),
        }
    }
}

/// Colours terminal output when stdout is an interactive pretty sink.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint(&self, tone: Tone, text: impl AsRef<str>) -> String {
        let text = text.as_ref();
        if !self.use_colour {
            return text.to_owned();
        }
        text.style(tone.style()).to_string()
    }
}
