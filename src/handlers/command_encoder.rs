use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::error::CommandError;

const COMMAND_PREFIX: u8 = 0x57;
const CURTAIN_HEADER: [u8; 4] = [COMMAND_PREFIX, 0x0f, 0x45, 0x01];
const CURTAIN_MOVE: u8 = 0x05;
const CURTAIN_STOP: u8 = 0x00;
const CURTAIN_ANY_MODE: u8 = 0xff;
const MAX_PERCENT: i64 = 100;

/// Encoded bytes written to the command characteristic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandPayload(Vec<u8>);

impl CommandPayload {
    /// Returns the raw payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload as lower-case hex, two characters per byte.
    ///
    /// ```
    /// use switchbot::BotCommand;
    ///
    /// assert_eq!("570101", BotCommand::On.payload().hex());
    /// ```
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Display for CommandPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

fn invalid(device: &str, command: &str) -> CommandError {
    CommandError::InvalidCommand {
        device: device.to_string(),
        command: command.to_string(),
    }
}

/// Commands understood by the button-pressing bot.
#[derive(Debug, Clone, Copy, Eq, PartialEq, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BotCommand {
    Press,
    On,
    Off,
    Down,
    Up,
}

impl BotCommand {
    /// Returns the three-byte opcode for this command.
    #[must_use]
    pub fn payload(self) -> CommandPayload {
        let opcode = match self {
            Self::Press => 0x00,
            Self::On => 0x01,
            Self::Off => 0x02,
            Self::Down => 0x03,
            Self::Up => 0x04,
        };
        CommandPayload(vec![COMMAND_PREFIX, 0x01, opcode])
    }

    /// Parses a command word.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidCommand`] for unknown words.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        Self::from_str(text.trim()).map_err(|_error| invalid("bot", text))
    }
}

/// Motor mode used when moving a curtain to a position.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, StrumDisplay, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CurtainMode {
    #[default]
    Performance,
    Silence,
}

impl CurtainMode {
    /// Resolves a mode name, falling back to [`CurtainMode::Performance`]
    /// for anything unrecognised.
    #[must_use]
    pub fn resolve(name: Option<&str>) -> Self {
        name.and_then(|value| Self::from_str(value.trim()).ok())
            .unwrap_or_default()
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Performance => 0x00,
            Self::Silence => 0x01,
        }
    }
}

/// Commands understood by the curtain motor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CurtainCommand {
    Open,
    Close,
    Pause,
    /// Move to `percent` (0 fully open, 100 fully closed).
    Position { percent: u8, mode: CurtainMode },
}

#[derive(Debug, Deserialize)]
struct PositionRequest {
    percent: i64,
    mode: Option<String>,
}

impl CurtainCommand {
    /// Builds a position command, clamping `percent` into `0..=100`.
    #[must_use]
    pub fn position(percent: i64, mode: CurtainMode) -> Self {
        let clamped = u8::try_from(percent.clamp(0, MAX_PERCENT)).unwrap_or_default();
        Self::Position {
            percent: clamped,
            mode,
        }
    }

    /// Parses `open`, `close`, `pause`, or a JSON object such as
    /// `{"percent": 42, "mode": "silence"}`.
    ///
    /// ```
    /// use switchbot::{CurtainCommand, CurtainMode};
    ///
    /// let command = CurtainCommand::parse(r#"{"percent": 150, "mode": "bogus"}"#)?;
    /// assert_eq!(CurtainCommand::position(100, CurtainMode::Performance), command);
    /// # Ok::<(), switchbot::CommandError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidCommand`] for unknown words and for
    /// objects without an integer `percent`.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            let request = serde_json::from_str::<PositionRequest>(trimmed)
                .map_err(|_error| invalid("curtain", text))?;
            return Ok(Self::position(
                request.percent,
                CurtainMode::resolve(request.mode.as_deref()),
            ));
        }
        match trimmed {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "pause" => Ok(Self::Pause),
            _ => Err(invalid("curtain", text)),
        }
    }

    /// Returns the frame for this command.
    #[must_use]
    pub fn payload(self) -> CommandPayload {
        let tail: &[u8] = match self {
            Self::Open => &[CURTAIN_MOVE, CURTAIN_ANY_MODE, 0x00],
            Self::Close => &[CURTAIN_MOVE, CURTAIN_ANY_MODE, 0x64],
            Self::Pause => &[CURTAIN_STOP, CURTAIN_ANY_MODE],
            Self::Position { percent, mode } => {
                return CommandPayload(
                    CURTAIN_HEADER
                        .into_iter()
                        .chain([CURTAIN_MOVE, mode.as_byte(), percent])
                        .collect(),
                );
            }
        };
        CommandPayload(CURTAIN_HEADER.iter().chain(tail).copied().collect())
    }
}

/// Commands understood by the plug mini.
#[derive(Debug, Clone, Copy, Eq, PartialEq, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PlugMiniCommand {
    On,
    Off,
    Toggle,
}

impl PlugMiniCommand {
    /// Returns the six-byte frame for this command.
    #[must_use]
    pub fn payload(self) -> CommandPayload {
        let (action, state) = match self {
            Self::On => (0x01, 0x80),
            Self::Off => (0x01, 0x00),
            Self::Toggle => (0x02, 0x80),
        };
        CommandPayload(vec![COMMAND_PREFIX, 0x0f, 0x50, 0x01, action, state])
    }

    /// Parses a command word.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidCommand`] for unknown words.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        Self::from_str(text.trim()).map_err(|_error| invalid("plugmini", text))
    }
}

/// Relay state reported by the plug mini after a command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, StrumDisplay, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlugState {
    On,
    Off,
}

impl PlugState {
    /// Decodes the first two response bytes; missing bytes count as zero.
    #[must_use]
    pub fn from_response(bytes: &[u8]) -> Option<Self> {
        let high = bytes.first().copied().unwrap_or_default();
        let low = bytes.get(1).copied().unwrap_or_default();
        match u16::from_be_bytes([high, low]) {
            0x0180 => Some(Self::On),
            0x0100 => Some(Self::Off),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("on", "570101")]
    #[case("off", "570102")]
    #[case("press", "570100")]
    #[case("down", "570103")]
    #[case("up", "570104")]
    fn bot_commands_encode_opcodes(#[case] text: &str, #[case] expected: &str) {
        let command = BotCommand::parse(text).expect("bot command should parse");
        assert_eq!(expected, command.payload().hex());
    }

    #[rstest]
    #[case("on", "570f50010180")]
    #[case("off", "570f50010100")]
    #[case("toggle", "570f50010280")]
    fn plug_mini_commands_encode_frames(#[case] text: &str, #[case] expected: &str) {
        let command = PlugMiniCommand::parse(text).expect("plug command should parse");
        assert_eq!(expected, command.payload().hex());
    }

    #[rstest]
    #[case("open", "570f450105ff00")]
    #[case("close", "570f450105ff64")]
    #[case("pause", "570f450100ff")]
    fn curtain_words_encode_fixed_frames(#[case] text: &str, #[case] expected: &str) {
        let command = CurtainCommand::parse(text).expect("curtain word should parse");
        assert_eq!(expected, command.payload().hex());
    }

    #[test]
    fn curtain_percent_uses_default_mode() {
        let command = CurtainCommand::parse(r#"{"percent": 42}"#).expect("position should parse");

        assert_eq!(
            &[0x57, 0x0f, 0x45, 0x01, 0x05, 0x00, 0x2a],
            command.payload().bytes()
        );
    }

    #[rstest]
    #[case(r#"{"percent": 150}"#, 100, CurtainMode::Performance)]
    #[case(r#"{"percent": -5}"#, 0, CurtainMode::Performance)]
    #[case(r#"{"percent": 30, "mode": "bogus"}"#, 30, CurtainMode::Performance)]
    #[case(r#"{"percent": 30, "mode": "silence"}"#, 30, CurtainMode::Silence)]
    fn curtain_position_clamps_and_resolves_mode(
        #[case] text: &str,
        #[case] percent: u8,
        #[case] mode: CurtainMode,
    ) {
        assert_eq!(
            CurtainCommand::Position { percent, mode },
            CurtainCommand::parse(text).expect("position should parse")
        );
    }

    #[rstest]
    #[case::bot_word(BotCommand::parse("toggle").map(|_command| ()))]
    #[case::plug_word(PlugMiniCommand::parse("press").map(|_command| ()))]
    #[case::curtain_word(CurtainCommand::parse("half").map(|_command| ()))]
    #[case::curtain_missing_percent(CurtainCommand::parse(r#"{"mode": "silence"}"#).map(|_command| ()))]
    fn unknown_commands_are_rejected(#[case] result: Result<(), CommandError>) {
        assert_matches!(result, Err(CommandError::InvalidCommand { .. }));
    }

    #[rstest]
    #[case(&[0x01, 0x80], Some(PlugState::On))]
    #[case(&[0x01, 0x00], Some(PlugState::Off))]
    #[case(&[0x01, 0x80, 0xff], Some(PlugState::On))]
    #[case(&[0x01], None)]
    #[case(&[], None)]
    fn plug_state_decodes_response_pair(#[case] bytes: &[u8], #[case] expected: Option<PlugState>) {
        assert_eq!(expected, PlugState::from_response(bytes));
    }

    #[test]
    fn every_payload_is_even_length_lower_hex() {
        let payloads = [
            BotCommand::Up.payload(),
            PlugMiniCommand::Toggle.payload(),
            CurtainCommand::position(255, CurtainMode::Silence).payload(),
        ];

        for payload in payloads {
            let hex = payload.hex();
            assert_eq!(0, hex.len() % 2);
            assert_eq!(hex.to_ascii_lowercase(), hex);
        }
    }
}
