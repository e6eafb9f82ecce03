use tracing::{info, instrument};

use super::{PlugMiniCommand, PlugState};
use crate::device::DeviceCommandProtocol;
use crate::error::{DeviceError, ProtocolError};
use crate::gatt::TargetAddress;
use crate::utils::format_hex;

/// Handler for the plug mini relay.
pub struct PlugMiniHandler;

impl PlugMiniHandler {
    /// Sends one plug command and returns the relay state it reports.
    ///
    /// The plug mini uses its public address.
    ///
    /// # Errors
    ///
    /// Returns an error when any protocol stage fails, or
    /// [`DeviceError::UnexpectedResponse`] when the reply is neither the on
    /// nor the off state.
    #[instrument(skip(protocol), level = "info")]
    pub async fn send(
        protocol: &DeviceCommandProtocol,
        adapter: &str,
        address: &str,
        command: PlugMiniCommand,
    ) -> Result<PlugState, ProtocolError> {
        let target = TargetAddress::public(address);
        let response = protocol
            .execute(adapter, &target, &command.payload().hex())
            .await?;
        let bytes = response.notification().unwrap_or_default();
        let state = PlugState::from_response(bytes).ok_or_else(|| {
            DeviceError::UnexpectedResponse {
                response: format_hex(bytes),
            }
        })?;
        info!(%state, "plug state reported");
        Ok(state)
    }
}
