mod command_protocol;
mod retry;

pub use self::command_protocol::{DeviceCommandProtocol, DeviceResponse, Stage};
pub use self::retry::{Attempt, Backoff, RetryError, RetryPolicy};
