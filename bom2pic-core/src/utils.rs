//! Utility functions for coordinate parsing and conversion.

use crate::error::{Bom2PicError, Result};

/// Maximum column number in Excel (XFD = 16384).
pub const MAX_COLUMN: u32 = 16384;
/// Maximum row number in Excel.
pub const MAX_ROW: u32 = 1_048_576;

/// Pack a 1-indexed (row, column) pair into a single map key.
#[inline]
pub fn cell_key(row: u32, column: u32) -> u64 {
    ((row as u64) << 32) | column as u64
}

/// Parse an Excel cell coordinate from bytes (e.g., b"A1", b"AB123") into (row, column).
/// Row and column are 1-indexed.
#[inline]
pub fn parse_coordinate_bytes(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.is_empty() {
        return None;
    }

    let mut i = 0usize;
    let mut column: u32 = 0;

    while i < bytes.len() {
        let upper = match bytes[i] {
            b @ b'a'..=b'z' => b - 32,
            b @ b'A'..=b'Z' => b,
            _ => break,
        };
        column = column.checked_mul(26)?.checked_add((upper - b'A' + 1) as u32)?;
        if column > MAX_COLUMN {
            return None;
        }
        i += 1;
    }

    if i == 0 || i >= bytes.len() || column == 0 {
        return None;
    }

    let row = parse_u32_bytes(&bytes[i..])?;
    if row == 0 || row > MAX_ROW {
        return None;
    }

    Some((row, column))
}

/// Parse a u32 directly from bytes without string allocation.
#[inline]
pub fn parse_u32_bytes(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    Some(result)
}

/// Parse an f64 directly from bytes without string allocation.
/// Falls back to string parsing for complex cases.
#[inline]
pub fn parse_f64_bytes(bytes: &[u8]) -> Option<f64> {
    // Fast path for simple integers
    if !bytes.is_empty() && bytes.len() < 16 && bytes.iter().all(|&b| b.is_ascii_digit()) {
        let mut result: f64 = 0.0;
        for &b in bytes {
            result = result * 10.0 + (b - b'0') as f64;
        }
        return Some(result);
    }
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Convert column letters (e.g., "A", "AB", "XFD") to column number (1-indexed).
pub fn letter_to_column(letters: &str) -> Result<u32> {
    let mut result: u32 = 0;
    let mut saw_letter = false;

    for &b in letters.as_bytes() {
        let upper = match b {
            b'a'..=b'z' => b - 32,
            b'A'..=b'Z' => b,
            _ => {
                return Err(Bom2PicError::InvalidColumnReference(format!(
                    "invalid character in column '{}': {:?}",
                    letters, b as char
                )))
            }
        };
        saw_letter = true;
        result = result
            .checked_mul(26)
            .and_then(|r| r.checked_add((upper - b'A' + 1) as u32))
            .ok_or_else(|| {
                Bom2PicError::InvalidColumnReference(format!("column '{}' exceeds maximum", letters))
            })?;
        if result > MAX_COLUMN {
            return Err(Bom2PicError::InvalidColumnReference(format!(
                "column '{}' exceeds Excel maximum (XFD = {})",
                letters, MAX_COLUMN
            )));
        }
    }

    if !saw_letter || result == 0 {
        return Err(Bom2PicError::InvalidColumnReference(
            "empty column letters".to_string(),
        ));
    }

    Ok(result)
}

/// Validate a caller-supplied column reference such as `"a"` or `" C "`.
///
/// Surrounding whitespace is ignored and letters are case-insensitive.
/// Returns the 1-indexed column number.
pub fn parse_column_reference(input: &str) -> Result<u32> {
    let letters = input.trim();
    if letters.len() > 3 {
        return Err(Bom2PicError::InvalidColumnReference(format!(
            "column '{}' is longer than three letters",
            letters
        )));
    }
    letter_to_column(letters)
}

/// Convert column number (1-indexed) to letters (e.g., 1 -> "A", 28 -> "AB").
pub fn column_to_letter(column: u32) -> String {
    let mut result = String::new();
    let mut col = column;

    while col > 0 {
        col -= 1;
        let letter = (b'A' + (col % 26) as u8) as char;
        result.insert(0, letter);
        col /= 26;
    }

    result
}
