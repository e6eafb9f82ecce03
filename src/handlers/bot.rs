use tracing::instrument;

use super::BotCommand;
use crate::device::{DeviceCommandProtocol, DeviceResponse};
use crate::error::ProtocolError;
use crate::gatt::TargetAddress;

/// Handler for the button-pressing bot.
pub struct BotHandler;

impl BotHandler {
    /// Sends one bot command. Bots advertise a random static address.
    ///
    /// ```
    /// # async fn demo(protocol: switchbot::DeviceCommandProtocol) -> Result<(), switchbot::ProtocolError> {
    /// use switchbot::{BotCommand, BotHandler};
    ///
    /// BotHandler::send(&protocol, "hci0", "C1:D2:E3:F4:A5:B6", BotCommand::Press).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when any protocol stage fails.
    #[instrument(skip(protocol), level = "info")]
    pub async fn send(
        protocol: &DeviceCommandProtocol,
        adapter: &str,
        address: &str,
        command: BotCommand,
    ) -> Result<DeviceResponse, ProtocolError> {
        let target = TargetAddress::random(address);
        let response = protocol
            .execute(adapter, &target, &command.payload().hex())
            .await?;
        Ok(response)
    }
}
