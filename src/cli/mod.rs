pub(crate) mod command;
pub(crate) mod operate;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::command::{Args, Command, LogLevel, OutputFormat};
pub use self::operate::{DeviceKind, DoArgs};
pub use self::scan::ScanArgs;
