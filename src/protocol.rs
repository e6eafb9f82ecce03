//! Text contract of the `gatttool` interactive mode and the SwitchBot command
//! characteristic.

use strum_macros::{Display, EnumIter};

/// Characteristic every SwitchBot device exposes for user commands.
pub const COMMAND_CHARACTERISTIC_UUID: &str = "cba20002-224d-11e6-9fb8-0002a5d5c51b";

/// Success text printed by `connect`.
pub(crate) const CONNECT_SUCCESS: &str = "Connection successful";

/// Success text printed by `char-write-req`.
pub(crate) const WRITE_SUCCESS: &str = "Characteristic value was written successfully";

/// Failure prefixes printed by the tool, including its own misspelling.
pub(crate) const FAILURE_MARKERS: [&str; 3] = ["Error:", "Comand Failed:", "Command Failed:"];

/// Pattern for one row of the `characteristics` listing.
pub(crate) const CHARACTERISTIC_ROW_PATTERN: &str =
    r"handle: (.*?), char properties: (.*?), char value handle: (.*?), uuid: (.*)$";

/// Pattern for a notification line printed after a write.
pub(crate) const NOTIFICATION_PATTERN: &str = r"Notification handle = (0x[0-9a-fA-F]+) value: (.*)$";

/// Commands sent verbatim to the interactive tool.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, EnumIter)]
pub enum ToolCommand {
    #[strum(to_string = "connect")]
    Connect,
    #[strum(to_string = "characteristics")]
    Characteristics,
    #[strum(to_string = "char-write-req")]
    CharWriteReq,
    #[strum(to_string = "exit")]
    Exit,
}

/// Renders the idle prompt printed for `address`.
#[must_use]
pub fn idle_prompt(address: &str) -> String {
    format!("[{}][LE]>", address.to_ascii_uppercase())
}

/// Renders a `char-write-req` command line.
pub(crate) fn char_write_req(value_handle: &str, payload_hex: &str) -> String {
    format!("{} {value_handle} {payload_hex}", ToolCommand::CharWriteReq)
}
