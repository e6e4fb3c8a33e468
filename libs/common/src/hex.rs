//! Hex encoding utility
//! Blob parameters are exchanged as uppercase hex on the CLI and in stored JSON

use std::fmt::Write;

use thiserror::Error;

/// Hex decoding failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("Odd number of hex digits: {0}")]
    OddLength(usize),

    #[error("Invalid hex digit '{digit}' at position {position}")]
    InvalidDigit { digit: char, position: usize },
}

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Decode a hex string (either case) into bytes
///
/// An optional `0x` prefix and ASCII whitespace between digits are accepted,
/// so values copied from a hexdump can be pasted as-is.
pub fn decode(input: &str) -> Result<Vec<u8>, HexError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: Vec<(usize, char)> = body
        .char_indices()
        .filter(|(_, c)| !c.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }

    let nibble = |(position, digit): (usize, char)| {
        digit
            .to_digit(16)
            .map(|v| v as u8)
            .ok_or(HexError::InvalidDigit { digit, position })
    };

    digits
        .chunks(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}
