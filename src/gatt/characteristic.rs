use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use super::expect::PatternMatch;

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CharProperty {
    #[strum(to_string = "broadcast")]
    Broadcast,
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "write_without_response")]
    WriteWithoutResponse,
    /// Write with response.
    #[strum(to_string = "write")]
    Write,
    #[strum(to_string = "notify")]
    Notify,
    #[strum(to_string = "indicate")]
    Indicate,
    #[strum(to_string = "authenticated_signed_writes")]
    AuthenticatedSignedWrites,
    #[strum(to_string = "extended_properties")]
    ExtendedProperties,
}

impl CharProperty {
    /// Bit of this property in the raw property byte.
    #[must_use]
    pub fn bitmask(self) -> u8 {
        match self {
            Self::Broadcast => 0x01,
            Self::Read => 0x02,
            Self::WriteWithoutResponse => 0x04,
            Self::Write => 0x08,
            Self::Notify => 0x10,
            Self::Indicate => 0x20,
            Self::AuthenticatedSignedWrites => 0x40,
            Self::ExtendedProperties => 0x80,
        }
    }

    /// Decodes every property set in `raw`.
    #[must_use]
    pub fn decode(raw: u8) -> Vec<Self> {
        Self::iter()
            .filter(|property| raw & property.bitmask() == property.bitmask())
            .collect()
    }
}

/// A characteristic row reported by the `characteristics` command.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Characteristic {
    handle: String,
    raw_properties: u8,
    properties: Vec<CharProperty>,
    value_handle: String,
    uuid: String,
}

impl Characteristic {
    /// Creates a characteristic from its textual fields.
    #[must_use]
    pub fn new(handle: &str, raw_properties: &str, value_handle: &str, uuid: &str) -> Self {
        let raw = parse_property_byte(raw_properties).unwrap_or(0);
        Self {
            handle: handle.trim().to_string(),
            raw_properties: raw,
            properties: CharProperty::decode(raw),
            value_handle: value_handle.trim().to_string(),
            uuid: uuid.trim().to_ascii_lowercase(),
        }
    }

    pub(crate) fn from_match(found: &PatternMatch) -> Option<Self> {
        Some(Self::new(
            found.group(1)?,
            found.group(2)?,
            found.group(3)?,
            found.group(4)?,
        ))
    }

    /// Returns the declaration handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Returns the raw property byte.
    #[must_use]
    pub fn raw_properties(&self) -> u8 {
        self.raw_properties
    }

    /// Returns the decoded property set.
    #[must_use]
    pub fn properties(&self) -> &[CharProperty] {
        &self.properties
    }

    /// Returns the value handle used for reads and writes.
    #[must_use]
    pub fn value_handle(&self) -> &str {
        &self.value_handle
    }

    /// Returns the lower-cased UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns whether `property` is set.
    #[must_use]
    pub fn supports(&self, property: CharProperty) -> bool {
        self.properties.contains(&property)
    }
}

/// Finds the characteristic with `uuid` that also supports `property`.
pub(crate) fn find_characteristic<'a>(
    characteristics: &'a [Characteristic],
    uuid: &str,
    property: CharProperty,
) -> Option<&'a Characteristic> {
    characteristics.iter().find(|characteristic| {
        characteristic.uuid().eq_ignore_ascii_case(uuid) && characteristic.supports(property)
    })
}

fn parse_property_byte(text: &str) -> Option<u8> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u8::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x00, vec![])]
    #[case(0x08, vec![CharProperty::Write])]
    #[case(0x1a, vec![CharProperty::Read, CharProperty::Write, CharProperty::Notify])]
    #[case(0x0c, vec![CharProperty::WriteWithoutResponse, CharProperty::Write])]
    fn decode_maps_property_bits(#[case] raw: u8, #[case] expected: Vec<CharProperty>) {
        assert_eq!(expected, CharProperty::decode(raw));
    }

    #[test]
    fn new_parses_textual_fields() {
        let characteristic = Characteristic::new(
            "0x0015",
            "0x18",
            "0x0016",
            "CBA20002-224D-11E6-9FB8-0002A5D5C51B",
        );

        assert_eq!("0x0016", characteristic.value_handle());
        assert_eq!(0x18, characteristic.raw_properties());
        assert_eq!("cba20002-224d-11e6-9fb8-0002a5d5c51b", characteristic.uuid());
        assert!(characteristic.supports(CharProperty::Write));
        assert!(characteristic.supports(CharProperty::Notify));
    }

    #[test]
    fn unparsable_property_byte_has_no_properties() {
        let characteristic = Characteristic::new("0x0015", "??", "0x0016", "abcd");
        assert!(characteristic.properties().is_empty());
    }

    #[test]
    fn find_requires_uuid_and_property() {
        let uuid = "cba20002-224d-11e6-9fb8-0002a5d5c51b";
        let characteristics = vec![
            Characteristic::new("0x0010", "0x04", "0x0011", uuid),
            Characteristic::new("0x0012", "0x02", "0x0013", "00002a00-0000-1000-8000-00805f9b34fb"),
            Characteristic::new("0x0015", "0x08", "0x0016", uuid),
        ];

        let found = find_characteristic(&characteristics, uuid, CharProperty::Write);

        assert_eq!(Some("0x0016"), found.map(Characteristic::value_handle));
    }
}
