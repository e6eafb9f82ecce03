/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

/// Parses whitespace-separated hexadecimal byte tokens such as `01 80`.
///
/// Returns `None` when any token is not a valid byte.
pub(crate) fn parse_hex_tokens(text: &str) -> Option<Vec<u8>> {
    text.split_whitespace()
        .map(|token| u8::from_str_radix(token.trim_start_matches("0x"), 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("05 00 A1 FF", format_hex(&[0x05, 0x00, 0xA1, 0xFF]));
    }

    #[test]
    fn format_rssi_handles_unknown() {
        assert_eq!("-", format_rssi(None));
    }

    #[rstest]
    #[case("01 80", Some(vec![0x01, 0x80]))]
    #[case("  04\n3e  ff ", Some(vec![0x04, 0x3E, 0xFF]))]
    #[case("", Some(vec![]))]
    #[case("01 zz", None)]
    #[case("100", None)]
    fn parse_hex_tokens_reads_byte_runs(#[case] text: &str, #[case] expected: Option<Vec<u8>>) {
        assert_eq!(expected, parse_hex_tokens(text));
    }
}
