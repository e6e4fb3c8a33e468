//! Shared Serde helpers
//!
//! Flexible scalar parsing for operator input and the hex representation
//! used for binary parameter values.

use serde::{Deserialize, Deserializer, Serializer};

/// Parse a boolean written by a human
///
/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive,
/// surrounding whitespace ignored). Returns `None` for anything else.
pub fn parse_bool_flexible(input: &str) -> Option<bool> {
    let t = input.trim();
    if t == "1"
        || t.eq_ignore_ascii_case("true")
        || t.eq_ignore_ascii_case("yes")
        || t.eq_ignore_ascii_case("on")
    {
        Some(true)
    } else if t == "0"
        || t.eq_ignore_ascii_case("false")
        || t.eq_ignore_ascii_case("no")
        || t.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        None
    }
}

/// Serialize `Vec<u8>` as an uppercase hex string
///
/// Use with `#[serde(with = "common::serde_helpers::hex_bytes")]`.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&crate::hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;
        crate::hex::decode(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Calibration {
        #[serde(with = "hex_bytes")]
        table: Vec<u8>,
    }

    #[test]
    fn test_parse_bool_flexible() {
        assert_eq!(parse_bool_flexible(" TRUE "), Some(true));
        assert_eq!(parse_bool_flexible("1"), Some(true));
        assert_eq!(parse_bool_flexible("off"), Some(false));
        assert_eq!(parse_bool_flexible("maybe"), None);
        assert_eq!(parse_bool_flexible(""), None);
    }

    #[test]
    fn test_hex_bytes_field() {
        let json = r#"{"table":"0x00ff10"}"#;
        let parsed: Calibration = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.table, vec![0x00, 0xFF, 0x10]);

        let out = serde_json::to_string(&parsed).unwrap();
        assert!(out.contains(r#""table":"00FF10""#));
    }

    #[test]
    fn test_hex_bytes_rejects_bad_digits() {
        let json = r#"{"table":"0G"}"#;
        assert!(serde_json::from_str::<Calibration>(json).is_err());
    }
}
