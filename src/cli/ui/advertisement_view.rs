use std::fmt::{self, Display, Formatter};

use crate::scan::{DecodedAdvertisement, DeviceReading};
use crate::utils::format_rssi;

use super::painter::{Painter, Tone};

const LOW_BATTERY_PERCENT: u8 = 20;

/// Renders one decoded advertisement on a single line.
pub(crate) struct AdvertisementView<'a> {
    advertisement: &'a DecodedAdvertisement,
    painter: &'a Painter,
}

impl<'a> AdvertisementView<'a> {
    pub(crate) fn new(advertisement: &'a DecodedAdvertisement, painter: &'a Painter) -> Self {
        Self {
            advertisement,
            painter,
        }
    }

    fn battery(&self) -> String {
        match self.advertisement.battery() {
            Some(percent) if percent < LOW_BATTERY_PERCENT => {
                self.painter.paint(Tone::Attention, format!("battery={percent}%"))
            }
            Some(percent) => format!("battery={percent}%"),
            None => self.painter.paint(Tone::Detail, "battery=-"),
        }
    }

    fn reading(&self) -> String {
        match self.advertisement.reading() {
            DeviceReading::Bot { switch_mode, on } => {
                format!("switch_mode={switch_mode} on={on}")
            }
            DeviceReading::Curtain {
                calibrated,
                position,
                light_level,
            } => format!("position={position}% calibrated={calibrated} light={light_level}"),
            DeviceReading::Meter {
                temperature_c,
                humidity,
            } => format!("temperature={temperature_c:.1}C humidity={humidity}%"),
            DeviceReading::PlugMini { on } => format!("on={on}"),
        }
    }
}

impl Display for AdvertisementView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.painter
                .paint(Tone::Model, format!("{:<9}", self.advertisement.model())),
            self.painter.paint(Tone::Identity, self.advertisement.address()),
            self.painter.paint(
                Tone::Detail,
                format!("rssi={}", format_rssi(self.advertisement.rssi()))
            ),
            self.battery(),
            self.reading()
        )
    }
}
