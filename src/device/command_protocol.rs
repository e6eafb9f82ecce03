use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bon::Builder;
use regex::Regex;
use serde::Serialize;
use strum_macros::Display;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use super::retry::{Attempt, RetryError, RetryPolicy};
use crate::error::{DeviceError, ExpectError};
use crate::gatt::{
    CharProperty, Characteristic, DEFAULT_EXPECT_TIMEOUT, DEFAULT_POLL_INTERVAL, ExpectOptions,
    Expectation, GattClient, GattTransport, TargetAddress, find_characteristic, send_and_expect,
};
use crate::protocol::{
    self, CHARACTERISTIC_ROW_PATTERN, COMMAND_CHARACTERISTIC_UUID, CONNECT_SUCCESS,
    NOTIFICATION_PATTERN, ToolCommand, WRITE_SUCCESS,
};
use crate::utils::parse_hex_tokens;

static CHARACTERISTIC_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(CHARACTERISTIC_ROW_PATTERN).expect("characteristic row pattern is valid")
});

static NOTIFICATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NOTIFICATION_PATTERN).expect("notification pattern is valid"));

/// Protocol stage a device failure is attributed to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Launching the tool and waiting for its first prompt.
    #[strum(to_string = "open")]
    Open,
    #[strum(to_string = "connect")]
    Connect,
    /// Listing characteristics.
    #[strum(to_string = "characteristics")]
    Characteristics,
    /// Locating the writable command characteristic in the listing.
    #[strum(to_string = "characteristic-find")]
    CharacteristicFind,
    #[strum(to_string = "char-write-req")]
    CharWriteReq,
}

/// What the device printed in reply to a successful write.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceResponse {
    output: Vec<String>,
    notification: Option<Vec<u8>>,
}

impl DeviceResponse {
    fn from_output(output: Vec<String>) -> Self {
        let notification = output
            .iter()
            .find_map(|line| NOTIFICATION_LINE.captures(line))
            .and_then(|captures| parse_hex_tokens(captures.get(2)?.as_str()));
        Self {
            output,
            notification,
        }
    }

    /// Returns the tool output captured by the write cycle.
    #[must_use]
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Returns the first notification value the write produced.
    #[must_use]
    pub fn notification(&self) -> Option<&[u8]> {
        self.notification.as_deref()
    }
}

#[derive(Debug)]
enum ProtocolState {
    Connecting,
    Discovering,
    Writing { value_handle: String },
    Done(DeviceResponse),
    Failed(DeviceError),
}

#[derive(Debug, derive_more::Display)]
enum StageFault {
    #[display("{_0}")]
    Expect(ExpectError),
    #[display("no writable characteristic {_0} listed")]
    MissingCharacteristic(String),
}

/// Connect, discover and write over one interactive session.
///
/// Each stage is its own bounded retry loop over the same [`RetryPolicy`].
/// Only a missing signal consumes a retry; an error printed by the tool
/// ends the operation at once.
#[derive(Clone, Builder)]
pub struct DeviceCommandProtocol {
    client: Arc<dyn GattClient>,
    #[builder(default)]
    policy: RetryPolicy,
    #[builder(default = DEFAULT_EXPECT_TIMEOUT)]
    expect_timeout: Duration,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
    /// Extra wait for a notification that trails the write confirmation.
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    notification_wait: Duration,
    #[builder(into, default = COMMAND_CHARACTERISTIC_UUID.to_string())]
    characteristic_uuid: String,
}

impl std::fmt::Debug for DeviceCommandProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCommandProtocol")
            .field("policy", &self.policy)
            .field("expect_timeout", &self.expect_timeout)
            .field("characteristic_uuid", &self.characteristic_uuid)
            .finish_non_exhaustive()
    }
}

impl DeviceCommandProtocol {
    /// Opens a session, writes `payload_hex` to the command characteristic
    /// and closes the session again, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] tagged with the stage that failed.
    #[instrument(
        skip(self, target),
        level = "info",
        fields(address = target.address(), max_retries = self.policy.max_retries())
    )]
    pub async fn execute(
        &self,
        adapter: &str,
        target: &TargetAddress,
        payload_hex: &str,
    ) -> Result<DeviceResponse, DeviceError> {
        let session = self
            .client
            .open(adapter, target)
            .await
            .map_err(|source| DeviceError::Session {
                stage: Stage::Open,
                source,
            })?;

        let result = self.drive(session.as_ref(), payload_hex).await;
        if let Err(error) = session.close().await {
            debug!(?error, "session did not close cleanly");
        }
        result
    }

    async fn drive(
        &self,
        session: &dyn GattTransport,
        payload_hex: &str,
    ) -> Result<DeviceResponse, DeviceError> {
        let mut state = ProtocolState::Connecting;
        loop {
            state = match state {
                ProtocolState::Connecting => match self.connect(session).await {
                    Ok(()) => ProtocolState::Discovering,
                    Err(error) => ProtocolState::Failed(error),
                },
                ProtocolState::Discovering => match self.discover(session).await {
                    Ok(characteristic) => ProtocolState::Writing {
                        value_handle: characteristic.value_handle().to_string(),
                    },
                    Err(error) => ProtocolState::Failed(error),
                },
                ProtocolState::Writing { value_handle } => {
                    match self.write(session, &value_handle, payload_hex).await {
                        Ok(response) => ProtocolState::Done(response),
                        Err(error) => ProtocolState::Failed(error),
                    }
                }
                ProtocolState::Done(response) => {
                    info!("device command written");
                    return Ok(response);
                }
                ProtocolState::Failed(error) => return Err(error),
            };
        }
    }

    #[instrument(skip_all, level = "debug")]
    async fn connect(&self, session: &dyn GattTransport) -> Result<(), DeviceError> {
        let options = ExpectOptions::builder()
            .success_marker(CONNECT_SUCCESS)
            .timeout(self.expect_timeout)
            .poll_interval(self.poll_interval)
            .build();
        let command = ToolCommand::Connect.to_string();

        self.policy
            .run(Stage::Connect.to_string().as_str(), |_attempt| {
                let (options, command) = (&options, &command);
                async move {
                    send_and_expect(session, command, options)
                        .await
                        .map(|_outcome| ())
                        .map_err(classify)
                }
            })
            .await
            .map_err(|error| stage_error(Stage::Connect, Stage::Connect, error))
    }

    #[instrument(skip_all, level = "debug")]
    async fn discover(&self, session: &dyn GattTransport) -> Result<Characteristic, DeviceError> {
        let options = ExpectOptions::builder()
            .expect(Expectation::Pattern(CHARACTERISTIC_ROW.clone()))
            .timeout(self.expect_timeout)
            .poll_interval(self.poll_interval)
            .build();
        let command = ToolCommand::Characteristics.to_string();
        let uuid = self.characteristic_uuid.as_str();

        self.policy
            .run(Stage::CharacteristicFind.to_string().as_str(), |_attempt| {
                let (options, command) = (&options, &command);
                async move {
                    send_and_expect(session, command, options)
                        .await
                        .map_err(classify)
                        .and_then(|outcome| {
                            let characteristics = outcome
                                .matches()
                                .iter()
                                .filter_map(Characteristic::from_match)
                                .collect::<Vec<_>>();
                            debug!(listed = characteristics.len(), "characteristics listed");
                            find_characteristic(&characteristics, uuid, CharProperty::Write)
                                .cloned()
                                .ok_or_else(|| {
                                    Attempt::Transient(StageFault::MissingCharacteristic(
                                        uuid.to_string(),
                                    ))
                                })
                        })
                }
            })
            .await
            .map_err(|error| stage_error(Stage::CharacteristicFind, Stage::Characteristics, error))
    }

    #[instrument(skip(self, session), level = "debug")]
    async fn write(
        &self,
        session: &dyn GattTransport,
        value_handle: &str,
        payload_hex: &str,
    ) -> Result<DeviceResponse, DeviceError> {
        let options = ExpectOptions::builder()
            .success_marker(WRITE_SUCCESS)
            .timeout(self.expect_timeout)
            .poll_interval(self.poll_interval)
            .build();
        let command = protocol::char_write_req(value_handle, payload_hex);

        let output = self
            .policy
            .run(Stage::CharWriteReq.to_string().as_str(), |_attempt| {
                let (options, command) = (&options, &command);
                async move {
                    send_and_expect(session, command, options)
                        .await
                        .map(|outcome| outcome.output().to_vec())
                        .map_err(classify)
                }
            })
            .await
            .map_err(|error| stage_error(Stage::CharWriteReq, Stage::CharWriteReq, error))?;

        let response = DeviceResponse::from_output(output);
        if response.notification().is_some() || self.notification_wait.is_zero() {
            return Ok(response);
        }
        // The confirmation can be printed before the notification line.
        sleep(self.notification_wait).await;
        Ok(DeviceResponse::from_output(session.lines().snapshot()))
    }
}

fn classify(error: ExpectError) -> Attempt<StageFault> {
    match error {
        ExpectError::Timeout { .. } => Attempt::Transient(StageFault::Expect(error)),
        ExpectError::ToolFatal { .. } | ExpectError::Session(_) => {
            Attempt::Fatal(StageFault::Expect(error))
        }
    }
}

fn stage_error(
    give_up_stage: Stage,
    fatal_stage: Stage,
    error: RetryError<StageFault>,
) -> DeviceError {
    match error {
        RetryError::GiveUp { attempts, .. } => DeviceError::GiveUp {
            stage: give_up_stage,
            attempts,
        },
        RetryError::Fatal(StageFault::Expect(ExpectError::ToolFatal { detail, .. })) => {
            DeviceError::ToolFatal {
                stage: fatal_stage,
                detail,
            }
        }
        RetryError::Fatal(StageFault::Expect(ExpectError::Session(source))) => {
            DeviceError::Session {
                stage: fatal_stage,
                source,
            }
        }
        RetryError::Fatal(fault) => DeviceError::ToolFatal {
            stage: fatal_stage,
            detail: fault.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::SessionError;

    #[test]
    fn stages_render_as_failure_tags() {
        let tags = [
            Stage::Open,
            Stage::Connect,
            Stage::Characteristics,
            Stage::CharacteristicFind,
            Stage::CharWriteReq,
        ]
        .map(|stage| stage.to_string());

        assert_eq!(
            ["open", "connect", "characteristics", "characteristic-find", "char-write-req"],
            tags
        );
    }

    #[test]
    fn response_extracts_first_notification_value() {
        let response = DeviceResponse::from_output(vec![
            "Characteristic value was written successfully".to_string(),
            "Notification handle = 0x0013 value: 01 80".to_string(),
            "Notification handle = 0x0013 value: 01 00".to_string(),
        ]);

        assert_eq!(Some(&[0x01, 0x80][..]), response.notification());
    }

    #[test]
    fn give_up_is_tagged_with_give_up_stage() {
        let error = stage_error(
            Stage::CharacteristicFind,
            Stage::Characteristics,
            RetryError::GiveUp {
                attempts: 3,
                last: StageFault::MissingCharacteristic("abcd".to_string()),
            },
        );

        assert_eq!("characteristic-find/give_up after 3 attempts", error.to_string());
    }

    #[test]
    fn tool_error_is_tagged_with_fatal_stage() {
        let error = stage_error(
            Stage::CharacteristicFind,
            Stage::Characteristics,
            RetryError::Fatal(StageFault::Expect(ExpectError::ToolFatal {
                detail: "Disconnected".to_string(),
                output: Vec::new(),
            })),
        );

        assert_matches!(
            error,
            DeviceError::ToolFatal { stage: Stage::Characteristics, ref detail } if detail == "Disconnected"
        );
    }

    #[test]
    fn session_failure_keeps_source() {
        let error = stage_error(
            Stage::CharWriteReq,
            Stage::CharWriteReq,
            RetryError::Fatal(StageFault::Expect(ExpectError::Session(SessionError::Closed))),
        );

        assert_matches!(
            error,
            DeviceError::Session { stage: Stage::CharWriteReq, source: SessionError::Closed }
        );
    }
}
