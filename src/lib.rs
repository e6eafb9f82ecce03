mod app;
mod cli;
mod device;
mod error;
mod gatt;
mod handlers;
mod protocol;
mod scan;
mod telemetry;
mod terminal;
mod text_codec;
mod utils;

pub use app::{
    ToolBackend, real_backend, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use cli::{Args, Command, DeviceKind, DoArgs, LogLevel, OutputFormat, ScanArgs};
pub use device::{
    Attempt, Backoff, DeviceCommandProtocol, DeviceResponse, RetryError, RetryPolicy, Stage,
};
pub use error::{
    AdapterError, CommandError, DeviceError, ExpectError, ProtocolError, RunError, ScanError,
    SessionError,
};
pub use gatt::{
    AddressKind, CharProperty, Characteristic, ExpectOptions, ExpectOutcome, Expectation,
    FakeGattTool, FakeReply, GattClient, GattToolClient, GattToolConfig, GattTransport,
    GatttoolSession, LineBuffer, LineLog, PatternMatch, TargetAddress, send_and_expect,
    strip_escapes, wait_for_prompt,
};
pub use handlers::{
    BotCommand, BotHandler, CommandPayload, CurtainCommand, CurtainHandler, CurtainMode,
    PlugMiniCommand, PlugMiniHandler, PlugState,
};
pub use protocol::{COMMAND_CHARACTERISTIC_UUID, ToolCommand, idle_prompt};
pub use scan::{
    AD_MANUFACTURER_DATA, AD_SERVICE_DATA, AdStructure, AdapterControl, AdvertisementDecoder,
    AdvertisingReport, DecodedAdvertisement, DeviceReading, Direction, HexDumpParser,
    MergedAdvertisement, MergedBatch, PacketReassembler, RawPacket, ScanConfig, ScanEvent,
    ScanPhase, Scanner, SwitchbotDecoder, SwitchbotModel,
};
pub use terminal::TerminalClient;
