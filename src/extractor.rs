//! Pulls a candidate IPv4 literal out of a raw log field.
//!
//! Audit records rarely carry a clean address: the field may read
//! `"CLIENT: 203.0.113.9"`, `"203.0.113.9:58731"`, or `"<local machine>"`.
//! The extractor takes the first dotted-quad occurrence with octets 0-255
//! and leaves validation of anything stronger to the consumer.
//!
//! Pure function, no state. A `None` result means the event is
//! unattributable and must not create or mutate any attempt entry.

use regex::Regex;
use std::sync::LazyLock;

/// Dotted quad, each octet 0-255, delimited by word boundaries so the quad
/// inside `"CLIENT: 10.0.0.5]"` still matches.
static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .expect("regex")
});

/// Extract the first well-formed IPv4 literal from a raw log field.
///
/// Returns a slice of the input, so the caller decides when to allocate.
pub fn extract_ipv4(field: &str) -> Option<&str> {
    RE_IPV4.find(field).map(|m| m.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address() {
        assert_eq!(extract_ipv4("203.0.113.9"), Some("203.0.113.9"));
    }

    #[test]
    fn test_surrounding_text() {
        assert_eq!(extract_ipv4("CLIENT: 203.0.113.9]"), Some("203.0.113.9"));
        assert_eq!(extract_ipv4("from 10.0.0.5 port 22"), Some("10.0.0.5"));
    }

    #[test]
    fn test_address_with_port_suffix() {
        assert_eq!(extract_ipv4("198.51.100.7:58731"), Some("198.51.100.7"));
    }

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(
            extract_ipv4("proxy 192.0.2.1 forwarded for 203.0.113.9"),
            Some("192.0.2.1"),
        );
    }

    #[test]
    fn test_octet_bounds() {
        assert_eq!(extract_ipv4("255.255.255.255"), Some("255.255.255.255"));
        assert_eq!(extract_ipv4("0.0.0.0"), Some("0.0.0.0"));
        // 256 is not an octet; no quad can be assembled from these digits.
        assert_eq!(extract_ipv4("256.1.1.1"), None);
        assert_eq!(extract_ipv4("1.2.3.260"), None);
    }

    #[test]
    fn test_no_address() {
        assert_eq!(extract_ipv4(""), None);
        assert_eq!(extract_ipv4("<local machine>"), None);
        assert_eq!(extract_ipv4("-"), None);
        assert_eq!(extract_ipv4("1.2.3"), None);
    }

    #[test]
    fn test_named_pipe_field() {
        // MSSQL reports named-pipe clients without any address.
        assert_eq!(extract_ipv4(r"\\.\pipe\sql\query"), None);
    }
}
