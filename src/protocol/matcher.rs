//! Response classification.
//!
//! The same [`classify`] call decides whether a line ends a response and
//! extracts the payload that is handed to line observers and returned to
//! callers, so both always agree.

use super::{FIELD_SEPARATOR, LINE_TERMINATOR};

/// Result of classifying one line against a set of terminal markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification<'a> {
    /// The marker that matched, if any.
    pub marker: Option<&'a str>,
    /// For terminal lines the text from the marker up to the terminator,
    /// otherwise the whole line without its terminator.
    pub payload: &'a str,
}

impl Classification<'_> {
    pub fn is_terminal(&self) -> bool {
        self.marker.is_some()
    }
}

/// Classifies `line` against `markers`, checked in order; the first marker
/// found anywhere in the line wins.
pub fn classify<'a>(line: &'a str, markers: &[&'a str]) -> Classification<'a> {
    let body = strip_terminator(line);
    for &marker in markers {
        if let Some(start) = body.find(marker) {
            return Classification {
                marker: Some(marker),
                payload: &body[start..],
            };
        }
    }
    Classification {
        marker: None,
        payload: body,
    }
}

/// Returns the value of a `+NAME:value` field line: everything after the
/// first separator.
pub fn field_value(line: &str) -> Option<&str> {
    let body = strip_terminator(line);
    body.find(FIELD_SEPARATOR).map(|index| &body[index + 1..])
}

fn strip_terminator(line: &str) -> &str {
    line.strip_suffix(LINE_TERMINATOR).unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_marker_extracts_from_marker() {
        let result = classify("\u{0}garbage+VER:V2.1\r\n", &["+VER"]);
        assert!(result.is_terminal());
        assert_eq!(result.payload, "+VER:V2.1");
    }

    #[test]
    fn test_non_terminal_line_is_stripped() {
        let result = classify("AA:BB:CC:DD:EE:FF 0 -67 MyDevice\r\n", &["+SCAN END"]);
        assert!(!result.is_terminal());
        assert_eq!(result.payload, "AA:BB:CC:DD:EE:FF 0 -67 MyDevice");
    }

    #[test]
    fn test_first_marker_in_order_wins() {
        let markers = ["+CONNECTED", "+CONNECT TIMEOUT"];
        let result = classify("+CONNECT TIMEOUT\r\n", &markers);
        assert_eq!(result.marker, Some("+CONNECT TIMEOUT"));

        let result = classify("ERROR OK\r\n", &["OK", "ERROR"]);
        assert_eq!(result.marker, Some("OK"));
        assert_eq!(result.payload, "OK");
    }

    #[test]
    fn test_classification_is_idempotent() {
        let markers = ["ERROR", "+DEV"];
        for line in ["xx+DEV:0,AA:BB\r\n", "ERROR\r\n", "plain data\r\n"] {
            let first = classify(line, &markers);
            let second = classify(first.payload, &markers);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_field_value_after_first_colon() {
        assert_eq!(field_value("+VER:V2.1\r\n"), Some("V2.1"));
        assert_eq!(field_value("+MAC:AA:BB:CC:DD:EE:FF"), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(field_value("OK"), None);
    }
}
