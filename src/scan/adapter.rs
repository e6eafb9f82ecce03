use std::process::Stdio;
use std::time::Duration;

use bon::Builder;
use tokio::process::Command;
use tracing::{info, instrument};

use crate::device::{Attempt, Backoff, RetryError, RetryPolicy};
use crate::error::AdapterError;

const RECOVERY_RETRIES: u32 = 2;
const RECOVERY_DELAY: Duration = Duration::from_secs(1);

fn recovery_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(RECOVERY_RETRIES)
        .delay(RECOVERY_DELAY)
        .backoff(Backoff::Linear)
        .build()
}

/// Best-effort recovery commands for a wedged adapter.
#[derive(Debug, Clone, Builder)]
pub struct AdapterControl {
    #[builder(into)]
    adapter: String,
    #[builder(into, default = "hciconfig".to_string())]
    hciconfig_program: String,
    #[builder(into, default = "systemctl".to_string())]
    systemctl_program: String,
    #[builder(into, default = "bluetooth".to_string())]
    service: String,
    #[builder(default = recovery_policy())]
    policy: RetryPolicy,
}

impl AdapterControl {
    /// Runs `hciconfig <adapter> reset`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Spawn`] when the program is missing and
    /// [`AdapterError::GiveUp`] when every attempt exited unsuccessfully.
    #[instrument(skip(self), level = "info", fields(adapter = %self.adapter))]
    pub async fn reset(&self) -> Result<(), AdapterError> {
        let args = [self.adapter.as_str(), "reset"];
        self.run_retried(&self.hciconfig_program, &args).await
    }

    /// Runs `systemctl restart bluetooth`.
    ///
    /// # Errors
    ///
    /// As for [`AdapterControl::reset`].
    #[instrument(skip(self), level = "info", fields(service = %self.service))]
    pub async fn restart_service(&self) -> Result<(), AdapterError> {
        let args = ["restart", self.service.as_str()];
        self.run_retried(&self.systemctl_program, &args).await
    }

    async fn run_retried(&self, program: &str, args: &[&str]) -> Result<(), AdapterError> {
        self.policy
            .run(program, |_attempt| run_once(program, args))
            .await
            .map_err(|error| match error {
                RetryError::GiveUp { attempts, .. } => AdapterError::GiveUp {
                    program: program.to_string(),
                    attempts,
                },
                RetryError::Fatal(error) => error,
            })?;
        info!(program, "adapter recovery command succeeded");
        Ok(())
    }
}

async fn run_once(program: &str, args: &[&str]) -> Result<(), Attempt<AdapterError>> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| {
            Attempt::Fatal(AdapterError::Spawn {
                program: program.to_string(),
                source,
            })
        })?;
    if status.success() {
        return Ok(());
    }
    Err(Attempt::Transient(AdapterError::CommandFailed {
        program: program.to_string(),
        status: status.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn control(program: &str) -> AdapterControl {
        AdapterControl::builder()
            .adapter("hci0")
            .hciconfig_program(program)
            .systemctl_program(program)
            .policy(
                RetryPolicy::builder()
                    .max_retries(2)
                    .delay(Duration::from_millis(1))
                    .backoff(Backoff::Linear)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn successful_command_returns_ok() {
        assert_matches!(control("true").reset().await, Ok(()));
    }

    #[tokio::test]
    async fn failing_command_gives_up_after_bounded_attempts() {
        let result = control("false").restart_service().await;

        assert_matches!(result, Err(AdapterError::GiveUp { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn missing_program_fails_without_retrying() {
        let result = control("/nonexistent/hciconfig").reset().await;

        assert_matches!(result, Err(AdapterError::Spawn { .. }));
    }
}
