//! Identifier value and its textual format
//!
//! `<domain><yyyyMMddHHmmssSSS><node:3><sequence:4>`, timestamp in UTC.
//! The numeric tail has a fixed width of 24 digits, so the parser slices
//! from the right without delimiters.

use crate::error::{IdError, IdResult};
use crate::node::NodeId;
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use herald_core::constants::{
    ID_DOMAIN_LENGTH_BYTES_MAX, ID_NODE_DIGITS_COUNT, ID_SEQUENCE_COUNT_MAX,
    ID_SEQUENCE_DIGITS_COUNT, ID_TAIL_DIGITS_COUNT, ID_TIMESTAMP_DIGITS_COUNT,
};
use std::cmp::Ordering;
use std::fmt;

/// 9999-12-31T23:59:59.999Z, the last instant with a four-digit year
pub const ID_TIMESTAMP_MS_MAX: u64 = 253_402_300_799_999;

/// A minted identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    id: String,
    domain: String,
    exhausted_at_ms: u64,
    node: NodeId,
    sequence: u16,
}

impl Id {
    /// Build an ID from its parts, validating each
    pub fn from_parts(
        domain: &str,
        exhausted_at_ms: u64,
        node: NodeId,
        sequence: u16,
    ) -> IdResult<Self> {
        validate_domain(domain)?;
        if !node.is_printable() {
            return Err(IdError::InvalidNodeId {
                node_id: node.get() as u32,
                limit: herald_core::constants::ID_NODE_PRINTABLE_COUNT_MAX,
            });
        }
        if sequence >= ID_SEQUENCE_COUNT_MAX {
            return Err(IdError::invalid_config(
                "sequence",
                format!("must be < {}", ID_SEQUENCE_COUNT_MAX),
            ));
        }
        let timestamp = format_timestamp(exhausted_at_ms)?;
        let id = format!(
            "{}{}{:0nw$}{:0sw$}",
            domain,
            timestamp,
            node.get(),
            sequence,
            nw = ID_NODE_DIGITS_COUNT,
            sw = ID_SEQUENCE_DIGITS_COUNT,
        );
        debug_assert_eq!(id.len(), domain.len() + ID_TAIL_DIGITS_COUNT);

        Ok(Self {
            id,
            domain: domain.to_string(),
            exhausted_at_ms,
            node,
            sequence,
        })
    }

    /// Parse the textual form back into its parts
    pub fn parse(text: &str) -> IdResult<Self> {
        if text.len() < ID_TAIL_DIGITS_COUNT {
            return Err(IdError::malformed(
                text,
                format!("shorter than the {}-digit tail", ID_TAIL_DIGITS_COUNT),
            ));
        }
        let split = text.len() - ID_TAIL_DIGITS_COUNT;
        if !text.is_char_boundary(split) {
            return Err(IdError::malformed(text, "tail is not ASCII"));
        }
        let (domain, tail) = text.split_at(split);
        if !tail.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::malformed(text, "tail must be 24 ASCII digits"));
        }
        validate_domain(domain).map_err(|e| IdError::malformed(text, e.to_string()))?;

        let (timestamp, rest) = tail.split_at(ID_TIMESTAMP_DIGITS_COUNT);
        let (node, sequence) = rest.split_at(ID_NODE_DIGITS_COUNT);

        let exhausted_at_ms = parse_timestamp(timestamp).ok_or_else(|| {
            IdError::malformed(text, format!("'{}' is not a calendar instant", timestamp))
        })?;
        let node = NodeId::new(digits(node) as u16)?;
        let sequence = digits(sequence) as u16;

        Ok(Self {
            id: text.to_string(),
            domain: domain.to_string(),
            exhausted_at_ms,
            node,
            sequence,
        })
    }

    /// Printable form
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Millisecond timestamp the ID represents
    pub fn exhausted_at_ms(&self) -> u64 {
        self.exhausted_at_ms
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

/// Mint order: timestamp, then sequence, then node and domain as tie-breakers
impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.exhausted_at_ms, self.sequence, self.node, &self.domain).cmp(&(
            other.exhausted_at_ms,
            other.sequence,
            other.node,
            &other.domain,
        ))
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::str::FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> IdResult<Self> {
        Self::parse(s)
    }
}

/// Domains are ASCII, bounded, and must not end in a digit
pub fn validate_domain(domain: &str) -> IdResult<()> {
    if domain.len() > ID_DOMAIN_LENGTH_BYTES_MAX {
        return Err(IdError::invalid_domain(
            domain,
            format!("longer than {} bytes", ID_DOMAIN_LENGTH_BYTES_MAX),
        ));
    }
    if !domain.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(IdError::invalid_domain(
            domain,
            "must be printable ASCII without spaces",
        ));
    }
    if domain.bytes().last().is_some_and(|b| b.is_ascii_digit()) {
        return Err(IdError::invalid_domain(domain, "must not end in a digit"));
    }
    Ok(())
}

fn format_timestamp(ms: u64) -> IdResult<String> {
    if ms > ID_TIMESTAMP_MS_MAX {
        return Err(IdError::ClockOutOfRange { ms });
    }
    let instant =
        DateTime::from_timestamp_millis(ms as i64).ok_or(IdError::ClockOutOfRange { ms })?;
    Ok(format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:03}",
        instant.year(),
        instant.month(),
        instant.day(),
        instant.hour(),
        instant.minute(),
        instant.second(),
        instant.timestamp_subsec_millis(),
    ))
}

fn parse_timestamp(field: &str) -> Option<u64> {
    debug_assert_eq!(field.len(), ID_TIMESTAMP_DIGITS_COUNT);
    let year = digits(&field[0..4]) as i32;
    let month = digits(&field[4..6]);
    let day = digits(&field[6..8]);
    let hour = digits(&field[8..10]);
    let minute = digits(&field[10..12]);
    let second = digits(&field[12..14]);
    let milli = digits(&field[14..17]);

    let instant = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_milli_opt(hour, minute, second, milli)?
        .and_utc();
    // Leap-second encodings (second == 60) are rejected by and_hms_milli_opt
    u64::try_from(instant.timestamp_millis()).ok()
}

/// Caller guarantees `field` is all ASCII digits and at most nine long
fn digits(field: &str) -> u32 {
    field
        .bytes()
        .fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u16) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_format_layout() {
        // 2024-01-01T00:00:00.123Z
        let id = Id::from_parts("ORD", 1_704_067_200_123, node(7), 42).unwrap();
        assert_eq!(id.as_str(), "ORD202401010000001230070042");
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_parse_inverse_of_format() {
        let minted = Id::from_parts("T-", 1_718_451_045_999, node(999), 9999).unwrap();
        let parsed = Id::parse(minted.as_str()).unwrap();
        assert_eq!(parsed, minted);
        assert_eq!(parsed.domain(), "T-");
        assert_eq!(parsed.node().get(), 999);
        assert_eq!(parsed.sequence(), 9999);
        assert_eq!(parsed.exhausted_at_ms(), 1_718_451_045_999);
    }

    #[test]
    fn test_empty_domain() {
        let minted = Id::from_parts("", 0, node(0), 0).unwrap();
        assert_eq!(minted.as_str(), "197001010000000000000000");
        assert_eq!(Id::parse(minted.as_str()).unwrap(), minted);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases = [
            "",
            "X2024010100000000000700",   // 22 digits
            "X20240101000000000007000a", // non-digit tail
            "X20241301000000000007000",  // 23 digits, domain swallowed
            "X202413010000000000070000", // month 13
            "X202402300000000000070000", // Feb 30
            "X202401012500000000070000", // hour 25
            "X202401010000600000070000", // second 60
            "é202401010000000000070000", // non-ASCII domain
        ];
        for text in cases {
            assert!(
                matches!(Id::parse(text), Err(IdError::Malformed { .. })),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_parse_extra_leading_digit_is_domain_error() {
        // 25 digits: the 25th from the right would become a digit-terminated domain
        let text = "X1202401010000000000070000";
        assert!(matches!(Id::parse(text), Err(IdError::Malformed { .. })));
    }

    #[test]
    fn test_domain_validation() {
        assert!(validate_domain("ORD").is_ok());
        assert!(validate_domain("").is_ok());
        assert!(validate_domain("A1").is_err());
        assert!(validate_domain("has space").is_err());
        assert!(validate_domain(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_from_parts_rejects_unprintable_node_and_sequence() {
        assert!(Id::from_parts("X", 0, node(1000), 0).is_err());
        assert!(Id::from_parts("X", 0, node(1), 10_000).is_err());
        assert!(matches!(
            Id::from_parts("X", ID_TIMESTAMP_MS_MAX + 1, node(1), 0),
            Err(IdError::ClockOutOfRange { .. })
        ));
    }

    #[test]
    fn test_ordering_by_time_then_sequence() {
        let a = Id::from_parts("X", 1_000, node(1), 5).unwrap();
        let b = Id::from_parts("X", 1_000, node(1), 6).unwrap();
        let c = Id::from_parts("X", 1_001, node(1), 0).unwrap();
        assert!(a < b && b < c);
    }
}
