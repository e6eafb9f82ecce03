use serde::Serialize;
use serde_with::hex::Hex;
use serde_with::serde_as;
use strum_macros::Display;
use tracing::trace;

use super::reassembler::MergedBatch;

const HCI_EVENT_PACKET: u8 = 0x04;
const LE_META_EVENT: u8 = 0x3e;
const LE_ADVERTISING_REPORT: u8 = 0x02;
const RSSI_UNAVAILABLE: i8 = 127;
const SERVICE_UUID_LEN: usize = 2;

/// AD type carrying manufacturer specific data.
pub const AD_MANUFACTURER_DATA: u8 = 0xff;
/// AD type carrying 16-bit UUID service data.
pub const AD_SERVICE_DATA: u8 = 0x16;

/// One length-type-value field of advertising data.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct AdStructure {
    field_type: u8,
    #[serde_as(as = "Hex")]
    data: Vec<u8>,
}

impl AdStructure {
    #[must_use]
    pub fn new(field_type: u8, data: Vec<u8>) -> Self {
        Self { field_type, data }
    }

    #[must_use]
    pub fn field_type(&self) -> u8 {
        self.field_type
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn parse_all(mut bytes: &[u8]) -> Vec<Self> {
        let mut structures = Vec::new();
        while let Some((&length, rest)) = bytes.split_first() {
            let length = usize::from(length);
            if length == 0 || rest.len() < length {
                break;
            }
            let (field, remainder) = rest.split_at(length);
            structures.push(Self::new(field[0], field[1..].to_vec()));
            bytes = remainder;
        }
        structures
    }
}

/// One report from an HCI LE Advertising Report event.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct AdvertisingReport {
    event_type: u8,
    address_type: u8,
    address: String,
    data: Vec<AdStructure>,
    rssi: Option<i8>,
}

impl AdvertisingReport {
    #[must_use]
    pub fn new(address: &str, data: Vec<AdStructure>, rssi: Option<i8>) -> Self {
        Self {
            event_type: 0,
            address_type: 0,
            address: address.to_ascii_uppercase(),
            data,
            rssi,
        }
    }

    /// Parses the reports carried by a raw inbound HCI packet.
    ///
    /// Packets that are not LE advertising reports yield nothing; a
    /// truncated report ends parsing and keeps the reports before it.
    #[must_use]
    pub fn parse_event(packet: &[u8]) -> Vec<Self> {
        let [HCI_EVENT_PACKET, LE_META_EVENT, _length, LE_ADVERTISING_REPORT, count, body @ ..] =
            packet
        else {
            return Vec::new();
        };

        let mut reports = Vec::with_capacity(usize::from(*count));
        let mut rest = body;
        for _ in 0..*count {
            match Self::parse_one(rest) {
                Some((report, remainder)) => {
                    reports.push(report);
                    rest = remainder;
                }
                None => {
                    trace!(remaining = rest.len(), "truncated advertising report");
                    break;
                }
            }
        }
        reports
    }

    fn parse_one(bytes: &[u8]) -> Option<(Self, &[u8])> {
        let (&event_type, bytes) = bytes.split_first()?;
        let (&address_type, bytes) = bytes.split_first()?;
        let address = bytes.get(..6)?;
        let (&data_length, bytes) = bytes.get(6..)?.split_first()?;
        let data = bytes.get(..usize::from(data_length))?;
        let (&rssi, rest) = bytes.get(usize::from(data_length)..)?.split_first()?;
        let rssi = i8::from_le_bytes([rssi]);

        let report = Self {
            event_type,
            address_type,
            address: format_address(address),
            data: AdStructure::parse_all(data),
            rssi: (rssi != RSSI_UNAVAILABLE).then_some(rssi),
        };
        Some((report, rest))
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn event_type(&self) -> u8 {
        self.event_type
    }

    #[must_use]
    pub fn data(&self) -> &[AdStructure] {
        &self.data
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i8> {
        self.rssi
    }
}

/// Addresses travel least significant byte first.
fn format_address(wire: &[u8]) -> String {
    wire.iter()
        .rev()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// The fields of one reassembly window merged for decoding.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct MergedAdvertisement {
    address: String,
    rssi: Option<i16>,
    #[serde_as(as = "Hex")]
    manufacturer_data: Vec<u8>,
    #[serde_as(as = "Hex")]
    service_data: Vec<u8>,
}

impl MergedAdvertisement {
    /// Merges a batch: RSSI is averaged over the reports that carry one and
    /// the first manufacturer and service data fields are kept. Batches
    /// missing either field cannot be decoded and yield `None`.
    #[must_use]
    pub fn from_batch(batch: &MergedBatch) -> Option<Self> {
        let reports = batch.reports();
        let fields = reports.iter().flat_map(AdvertisingReport::data);
        let mut manufacturer_data = None;
        let mut service_data = None;
        for field in fields {
            match field.field_type() {
                AD_MANUFACTURER_DATA if manufacturer_data.is_none() => {
                    manufacturer_data = Some(field.data().to_vec());
                }
                AD_SERVICE_DATA if service_data.is_none() => {
                    service_data = field.data().get(SERVICE_UUID_LEN..).map(<[u8]>::to_vec);
                }
                _ => {}
            }
        }

        Some(Self {
            address: batch.address().to_string(),
            rssi: average_rssi(reports),
            manufacturer_data: manufacturer_data?,
            service_data: service_data?,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Rounded average RSSI.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn manufacturer_data(&self) -> &[u8] {
        &self.manufacturer_data
    }

    /// Service data without its 16-bit UUID.
    #[must_use]
    pub fn service_data(&self) -> &[u8] {
        &self.service_data
    }
}

fn average_rssi(reports: &[AdvertisingReport]) -> Option<i16> {
    let values = reports
        .iter()
        .filter_map(AdvertisingReport::rssi)
        .filter(|rssi| *rssi != 0)
        .map(i32::from)
        .collect::<Vec<_>>();
    let count = i32::try_from(values.len()).ok().filter(|count| *count > 0)?;
    let sum = values.iter().sum::<i32>();
    // Halves round towards positive infinity.
    let rounded = (f64::from(sum) / f64::from(count) + 0.5).floor();
    // Bounded by the i8 inputs.
    Some(rounded as i16)
}

/// Turns a merged advertisement into a device reading.
pub trait AdvertisementDecoder: Send + Sync {
    /// Returns `None` when the advertisement is not from a known device.
    fn decode(&self, advertisement: &MergedAdvertisement) -> Option<DecodedAdvertisement>;
}

/// Device family announced in the service data model byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SwitchbotModel {
    Bot,
    Curtain,
    Meter,
    PlugMini,
}

impl SwitchbotModel {
    fn from_model_byte(byte: u8) -> Option<Self> {
        match byte & 0x7f {
            b'H' => Some(Self::Bot),
            b'c' => Some(Self::Curtain),
            b'T' => Some(Self::Meter),
            b'g' | b'j' => Some(Self::PlugMini),
            _ => None,
        }
    }
}

/// Model specific fields of a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceReading {
    Bot { switch_mode: bool, on: bool },
    Curtain { calibrated: bool, position: u8, light_level: u8 },
    Meter { temperature_c: f32, humidity: u8 },
    PlugMini { on: bool },
}

/// A decoded advertisement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedAdvertisement {
    address: String,
    rssi: Option<i16>,
    model: SwitchbotModel,
    battery: Option<u8>,
    reading: DeviceReading,
}

impl DecodedAdvertisement {
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn model(&self) -> SwitchbotModel {
        self.model
    }

    #[must_use]
    pub fn battery(&self) -> Option<u8> {
        self.battery
    }

    #[must_use]
    pub fn reading(&self) -> &DeviceReading {
        &self.reading
    }
}

/// Decoder for SwitchBot service and manufacturer data.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwitchbotDecoder;

impl AdvertisementDecoder for SwitchbotDecoder {
    fn decode(&self, advertisement: &MergedAdvertisement) -> Option<DecodedAdvertisement> {
        let service = advertisement.service_data();
        let model = SwitchbotModel::from_model_byte(*service.first()?)?;
        let flags = service.get(1).copied().unwrap_or_default();
        let battery = service.get(2).map(|byte| byte & 0x7f);

        let reading = match model {
            SwitchbotModel::Bot => DeviceReading::Bot {
                switch_mode: flags & 0x80 != 0,
                on: flags & 0x40 == 0,
            },
            SwitchbotModel::Curtain => {
                let position = *service.get(3)?;
                DeviceReading::Curtain {
                    calibrated: flags & 0x40 != 0,
                    position: position & 0x7f,
                    light_level: service.get(4).map_or(0, |byte| byte >> 4),
                }
            }
            SwitchbotModel::Meter => {
                let (fraction, whole, humidity) = (*service.get(3)?, *service.get(4)?, *service.get(5)?);
                let sign = if whole & 0x80 == 0 { -1.0 } else { 1.0 };
                DeviceReading::Meter {
                    temperature_c: sign * (f32::from(whole & 0x7f) + f32::from(fraction & 0x0f) / 10.0),
                    humidity: humidity & 0x7f,
                }
            }
            SwitchbotModel::PlugMini => DeviceReading::PlugMini {
                on: advertisement.manufacturer_data().get(9)? & 0x80 != 0,
            },
        };

        Some(DecodedAdvertisement {
            address: advertisement.address().to_string(),
            rssi: advertisement.rssi(),
            model,
            battery: if model == SwitchbotModel::PlugMini { None } else { battery },
            reading,
        })
    }
}
