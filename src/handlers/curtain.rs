use tracing::instrument;

use super::CurtainCommand;
use crate::device::{DeviceCommandProtocol, DeviceResponse};
use crate::error::ProtocolError;
use crate::gatt::TargetAddress;

/// Handler for the curtain motor.
pub struct CurtainHandler;

impl CurtainHandler {
    /// Sends one curtain command over a random-address session.
    ///
    /// # Errors
    ///
    /// Returns an error when any protocol stage fails.
    #[instrument(skip(protocol), level = "info")]
    pub async fn send(
        protocol: &DeviceCommandProtocol,
        adapter: &str,
        address: &str,
        command: CurtainCommand,
    ) -> Result<DeviceResponse, ProtocolError> {
        let target = TargetAddress::random(address);
        let response = protocol
            .execute(adapter, &target, &command.payload().hex())
            .await?;
        Ok(response)
    }
}
