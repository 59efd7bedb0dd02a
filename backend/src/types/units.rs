//! Unit Conversion Utilities
//!
//! Decimal strings at the edges, integer minor units everywhere else.
//! No floating point is involved in either direction.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount {0} has more than {1} decimal places")]
    TooPrecise(String, u8),

    #[error("amount {0} overflows")]
    Overflow(String),
}

/// Parse a decimal string ("1.5", "0.00000001", "42") into minor units
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128, UnitsError> {
    let s = amount.trim();
    if s.is_empty() {
        return Err(UnitsError::Empty);
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Invalid(s.to_string()));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitsError::Invalid(s.to_string()));
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise(s.to_string(), decimals));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| UnitsError::Overflow(s.to_string()))?;

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| UnitsError::Overflow(s.to_string()))?
    };

    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded
            .parse::<u128>()
            .map_err(|_| UnitsError::Invalid(s.to_string()))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(|| UnitsError::Overflow(s.to_string()))
}

/// Format minor units as a decimal string without trailing zeros
pub fn format_units(value: u128, decimals: u8) -> String {
    format_digits(&value.to_string(), decimals)
}

/// Same as `format_units` for an arbitrary-width base-10 digit string
pub fn format_digits(digits: &str, decimals: u8) -> String {
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return "0".to_string();
    }

    let decimals = decimals as usize;
    if decimals == 0 {
        return digits.to_string();
    }

    let padded = if digits.len() <= decimals {
        format!("{:0>width$}", digits, width = decimals + 1)
    } else {
        digits.to_string()
    };

    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1", 8), Ok(100_000_000));
        assert_eq!(parse_units("1.5", 8), Ok(150_000_000));
        assert_eq!(parse_units("0.00000001", 8), Ok(1));
        assert_eq!(parse_units(".5", 6), Ok(500_000));
        assert_eq!(parse_units("  2.10  ", 2), Ok(210));
        assert_eq!(parse_units("1.000000000000000000", 18), Ok(1_000_000_000_000_000_000));
        assert_eq!(parse_units("7", 0), Ok(7));
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert_eq!(parse_units("", 8), Err(UnitsError::Empty));
        assert!(matches!(parse_units("-1", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("1e8", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units(".", 8), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("0.000000001", 8), Err(UnitsError::TooPrecise(_, 8))));
        assert!(matches!(
            parse_units("999999999999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(0, 8), "0");
        assert_eq!(format_units(1, 8), "0.00000001");
        assert_eq!(format_units(150_000_000, 8), "1.5");
        assert_eq!(format_units(100_000_000, 8), "1");
        assert_eq!(format_units(1_234_567, 6), "1.234567");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn test_format_digits_beyond_u128() {
        let digits = "1000000000000000000000000000000000000000000";
        assert_eq!(format_digits(digits, 18), "1000000000000000000000000");
    }
}
