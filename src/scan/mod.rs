mod adapter;
mod advertising;
mod hexdump;
mod reassembler;
mod scanner;

pub use self::adapter::AdapterControl;
pub use self::advertising::{
    AD_MANUFACTURER_DATA, AD_SERVICE_DATA, AdStructure, AdvertisementDecoder, AdvertisingReport,
    DecodedAdvertisement, DeviceReading, MergedAdvertisement, SwitchbotDecoder, SwitchbotModel,
};
pub use self::hexdump::{Direction, HexDumpParser, RawPacket};
pub use self::reassembler::{MergedBatch, PacketReassembler};
pub use self::scanner::{ScanConfig, ScanEvent, ScanPhase, Scanner};
