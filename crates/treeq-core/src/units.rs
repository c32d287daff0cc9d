//! Capacity strings.
//!
//! Capacities in the option map are written as an integer immediately
//! followed by a lower-case binary unit: `100gib`, `2tib`. Nothing else is
//! accepted; callers normalise before handing strings in.

use crate::error::{ProvisionError, TreeqResult};

/// 2^30 bytes.
pub const GIB: u64 = 1 << 30;
/// 2^40 bytes.
pub const TIB: u64 = 1 << 40;

/// Unit suffixes, largest first.
const UNITS: [(&str, u64); 2] = [("tib", TIB), ("gib", GIB)];

/// Parse a capacity string into bytes.
pub fn parse_size(s: &str) -> TreeqResult<u64> {
    let invalid = || ProvisionError::InvalidSizeFormat(s.to_string());

    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, multiplier)| s.strip_suffix(suffix).map(|d| (d, *multiplier)))
        .ok_or_else(invalid)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Render a byte count with the largest unit that divides it exactly.
///
/// Counts that are not a whole number of GiB come out as bare integers,
/// which [`parse_size`] rejects.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0gib".to_string();
    }
    for (suffix, multiplier) in UNITS {
        if bytes % multiplier == 0 {
            return format!("{}{suffix}", bytes / multiplier);
        }
    }
    bytes.to_string()
}
