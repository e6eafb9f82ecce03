mod characteristic;
mod expect;
mod fake;
mod line_buffer;
mod session;

pub use self::characteristic::{CharProperty, Characteristic};
pub(crate) use self::characteristic::find_characteristic;
pub use self::expect::{
    ExpectOptions, ExpectOutcome, Expectation, PatternMatch, send_and_expect,
};
pub(crate) use self::expect::DEFAULT_EXPECT_TIMEOUT;
pub use self::fake::{FakeGattTool, FakeReply};
pub use self::line_buffer::{LineBuffer, LineLog, strip_escapes};
pub use self::session::{
    AddressKind, GattClient, GattToolClient, GattToolConfig, GattTransport, GatttoolSession,
    TargetAddress, wait_for_prompt,
};
pub(crate) use self::session::DEFAULT_POLL_INTERVAL;
