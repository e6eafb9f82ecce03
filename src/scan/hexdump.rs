use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_with::hex::Hex;
use serde_with::serde_as;
use strum_macros::Display;
use tracing::{debug, trace};

use crate::utils::parse_hex_tokens;

/// A direction marker followed by everything up to the next marker.
static PACKET_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([<>])([^<>]*)").expect("packet segment pattern is valid"));

/// Which way a dumped packet travelled.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Controller to host (`>`).
    #[strum(to_string = "inbound")]
    Inbound,
    /// Host to controller (`<`).
    #[strum(to_string = "outbound")]
    Outbound,
}

impl Direction {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            ">" => Some(Self::Inbound),
            "<" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// One packet recovered from the dump text.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RawPacket {
    direction: Direction,
    #[serde_as(as = "Hex")]
    bytes: Vec<u8>,
}

impl RawPacket {
    /// Creates a packet.
    #[must_use]
    pub fn new(direction: Direction, bytes: Vec<u8>) -> Self {
        Self { direction, bytes }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Incremental parser for `hcidump -R` style output.
///
/// Chunks may end anywhere, including inside a hex token. The segment after
/// the last direction marker is never parsed; it is carried over and
/// prefixed to the next chunk, so a packet is only emitted once the next
/// marker proves it complete.
#[derive(Debug, Default)]
pub struct HexDumpParser {
    carry: String,
}

impl HexDumpParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every packet it completed, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<RawPacket> {
        let text = format!("{}{chunk}", self.carry);
        self.carry.clear();

        let segments = PACKET_SEGMENT.captures_iter(&text).collect::<Vec<_>>();
        let Some((last, complete)) = segments.split_last() else {
            trace!(chars = text.len(), "no direction marker in chunk");
            return Vec::new();
        };
        if let Some(start) = last.get(0).map(|segment| segment.start()) {
            self.carry = text[start..].to_string();
        }

        complete
            .iter()
            .filter_map(|captures| {
                let direction = Direction::from_marker(captures.get(1)?.as_str())?;
                let body = captures.get(2)?.as_str();
                match parse_hex_tokens(body) {
                    Some(bytes) if !bytes.is_empty() => Some(RawPacket::new(direction, bytes)),
                    Some(_empty) => None,
                    None => {
                        debug!(body = body.trim(), "skipping segment with non-hex tokens");
                        None
                    }
                }
            })
            .collect()
    }

    /// Returns the unparsed tail carried into the next chunk.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.carry
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const DUMP: &str = "HCI sniffer - Bluetooth packet analyzer ver 5.50\n\
device: hci0 snap_len: 1500 filter: 0xffffffffffffffff\n\
< 01 0B 20 07 01 10 00 10 00 00 00\n\
> 04 0E 04 01 0B 20 00\n\
> 04 3E 1A 02 01 04 01 B6 A5 F4 E3 D2 C1 0E 09 16 3D FD 48 00 \n\
  E4 0F 05 FF 69 09 B2\n\
> 04 0E 04 01 0C 20 00\n";

    fn parse_all(chunks: &[&str]) -> Vec<RawPacket> {
        let mut parser = HexDumpParser::new();
        chunks.iter().flat_map(|chunk| parser.push(chunk)).collect()
    }

    #[test]
    fn header_is_skipped_and_last_segment_is_carried() {
        let mut parser = HexDumpParser::new();
        let packets = parser.push(DUMP);

        assert_eq!(
            vec![
                RawPacket::new(
                    Direction::Outbound,
                    vec![0x01, 0x0B, 0x20, 0x07, 0x01, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]
                ),
                RawPacket::new(Direction::Inbound, vec![0x04, 0x0E, 0x04, 0x01, 0x0B, 0x20, 0x00]),
                RawPacket::new(
                    Direction::Inbound,
                    vec![
                        0x04, 0x3E, 0x1A, 0x02, 0x01, 0x04, 0x01, 0xB6, 0xA5, 0xF4, 0xE3, 0xD2,
                        0xC1, 0x0E, 0x09, 0x16, 0x3D, 0xFD, 0x48, 0x00, 0xE4, 0x0F, 0x05, 0xFF,
                        0x69, 0x09, 0xB2
                    ]
                ),
            ],
            packets
        );
        assert_eq!("> 04 0E 04 01 0C 20 00\n", parser.pending());
    }

    #[rstest]
    #[case(1)]
    #[case(57)]
    #[case(150)]
    #[case(171)]
    #[case(172)]
    #[case(200)]
    fn splitting_anywhere_yields_same_packets(#[case] split_at: usize) {
        let (head, tail) = DUMP.split_at(split_at);

        assert_eq!(parse_all(&[DUMP, "> "]), parse_all(&[head, tail, "> "]));
    }

    #[test]
    fn split_inside_token_is_joined_without_space() {
        let packets = parse_all(&["> 04 3E 2", "B 02\n", "> 00"]);

        assert_eq!(vec![RawPacket::new(Direction::Inbound, vec![0x04, 0x3E, 0x2B, 0x02])], packets);
    }

    #[test]
    fn non_hex_segment_is_dropped() {
        let packets = parse_all(&["> 04 zz\n> 04 0E\n> "]);

        assert_eq!(vec![RawPacket::new(Direction::Inbound, vec![0x04, 0x0E])], packets);
    }

    #[test]
    fn text_without_marker_is_discarded() {
        let mut parser = HexDumpParser::new();

        assert!(parser.push("device: hci0 snap_len: 1500\n").is_empty());
        assert_eq!("", parser.pending());
    }
}
