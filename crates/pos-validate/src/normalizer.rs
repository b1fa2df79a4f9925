//! Canonical normalization of raw upstream positions.
//!
//! Converts `pos_schemas::RawPosition` values into [`NormalizedPosition`]s
//! with integer-micro quantities and prices.
//!
//! It does **not**:
//! - fetch data (no upstream client)
//! - apply business rules (that is `rules.rs`)
//! - hash anything (that is `hash.rs`)

use std::fmt;

use pos_schemas::{RawPosition, MICROS_SCALE};

// ---------------------------------------------------------------------------
// Output type
// ---------------------------------------------------------------------------

/// A fully normalized position ready for validation and storage.
///
/// Quantities and prices are integer micros (1 unit = 1_000_000 micros) so no
/// floating-point rounding is introduced at any later stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPosition {
    pub product_id: String,
    pub position_type: String,
    pub quantity_micros: i64,
    /// Zero when the upstream sent no price or an explicit zero; the rule
    /// layer decides what that means.
    pub price_micros: i64,
    pub currency: String,
    /// Provided market value when present, otherwise `quantity × price`.
    pub market_value_micros: i64,
    /// Market value exactly as provided, kept for the tolerance check.
    pub provided_market_value_micros: Option<i64>,
    pub ticker: Option<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced during normalization.
#[derive(Debug, PartialEq, Eq)]
pub enum NormalizeError {
    /// A required field was empty.
    EmptyField { field: &'static str },
    /// A decimal string could not be parsed.
    InvalidDecimal { field: &'static str, raw: String },
    /// More than 6 decimal places (ambiguous micro conversion).
    TooManyDecimalPlaces { field: &'static str, raw: String },
    /// `quantity × price` overflowed i64 micros.
    ValueOverflow { product_id: String },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::EmptyField { field } => {
                write!(f, "field '{field}' is empty")
            }
            NormalizeError::InvalidDecimal { field, raw } => {
                write!(f, "field '{field}' could not be parsed: '{raw}'")
            }
            NormalizeError::TooManyDecimalPlaces { field, raw } => {
                write!(
                    f,
                    "field '{field}' has more than 6 decimal places \
                     (ambiguous micro conversion): '{raw}'"
                )
            }
            NormalizeError::ValueOverflow { product_id } => {
                write!(f, "quantity × price overflowed for product '{product_id}'")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Decimal conversion
// ---------------------------------------------------------------------------

/// Convert a decimal string to integer micros deterministically.
///
/// Rules:
/// - Accepts optional leading `+` or `-`.
/// - Accepts an optional fractional part separated by `.`.
/// - Rejects strings with more than 6 decimal places (would require rounding).
/// - Rejects empty strings, non-numeric characters, or multiple `.` separators.
/// - Does **not** use floating-point at any stage.
pub fn decimal_to_micros(s: &str, field: &'static str) -> Result<i64, NormalizeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormalizeError::EmptyField { field });
    }

    let (negative, digits) = if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    };

    if digits.is_empty() {
        return Err(NormalizeError::InvalidDecimal {
            field,
            raw: s.to_string(),
        });
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(NormalizeError::InvalidDecimal {
            field,
            raw: s.to_string(),
        });
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(NormalizeError::InvalidDecimal {
            field,
            raw: s.to_string(),
        });
    }

    if frac_part.len() > 6 {
        return Err(NormalizeError::TooManyDecimalPlaces {
            field,
            raw: s.to_string(),
        });
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<i64>()
            .map_err(|_| NormalizeError::InvalidDecimal {
                field,
                raw: s.to_string(),
            })?
    };

    let mut frac_padded = frac_part.to_string();
    while frac_padded.len() < 6 {
        frac_padded.push('0');
    }
    let frac_val: i64 = frac_padded
        .parse::<i64>()
        .map_err(|_| NormalizeError::InvalidDecimal {
            field,
            raw: s.to_string(),
        })?;

    let micros = int_val
        .checked_mul(MICROS_SCALE)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| NormalizeError::InvalidDecimal {
            field,
            raw: s.to_string(),
        })?;

    Ok(if negative { -micros } else { micros })
}

/// Render integer micros back to the canonical plain decimal string.
///
/// Trailing fractional zeros are trimmed; a whole number renders with no
/// decimal point. This rendering feeds the content hash, so it must be the
/// exact inverse of [`decimal_to_micros`] up to canonical form.
pub fn micros_to_plain(micros: i64) -> String {
    let negative = micros < 0;
    let abs = micros.unsigned_abs();
    let int_part = abs / MICROS_SCALE as u64;
    let frac_part = abs % MICROS_SCALE as u64;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&int_part.to_string());

    if frac_part != 0 {
        let mut frac = format!("{frac_part:06}");
        while frac.ends_with('0') {
            frac.pop();
        }
        out.push('.');
        out.push_str(&frac);
    }
    out
}

/// Multiply quantity micros by price micros, rescaling back to micros.
///
/// `i128` intermediate keeps the product exact; overflow of the final `i64`
/// is surfaced to the caller.
pub fn mul_micros(quantity_micros: i64, price_micros: i64) -> Option<i64> {
    let wide = (quantity_micros as i128) * (price_micros as i128) / (MICROS_SCALE as i128);
    i64::try_from(wide).ok()
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a single [`RawPosition`].
///
/// A missing price normalizes to `price_micros = 0`; the rule layer raises
/// `ZERO_PRICE` for it. A missing market value is derived from
/// `quantity × price`.
pub fn normalize(raw: &RawPosition) -> Result<NormalizedPosition, NormalizeError> {
    if raw.product_id.trim().is_empty() {
        return Err(NormalizeError::EmptyField { field: "productId" });
    }

    let quantity_micros = decimal_to_micros(&raw.quantity, "quantity")?;
    let price_micros = match raw.price.as_deref() {
        Some(p) if !p.trim().is_empty() => decimal_to_micros(p, "price")?,
        _ => 0,
    };

    let provided_market_value_micros = match raw.market_value.as_deref() {
        Some(mv) if !mv.trim().is_empty() => Some(decimal_to_micros(mv, "marketValue")?),
        _ => None,
    };

    let computed = mul_micros(quantity_micros, price_micros).ok_or_else(|| {
        NormalizeError::ValueOverflow {
            product_id: raw.product_id.clone(),
        }
    })?;

    Ok(NormalizedPosition {
        product_id: raw.product_id.trim().to_string(),
        position_type: raw.position_type.trim().to_string(),
        quantity_micros,
        price_micros,
        currency: raw.currency.trim().to_string(),
        market_value_micros: provided_market_value_micros.unwrap_or(computed),
        provided_market_value_micros,
        ticker: raw.ticker.as_deref().map(|t| t.trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_to_micros_handles_signs_and_fractions() {
        assert_eq!(decimal_to_micros("150.25", "price").unwrap(), 150_250_000);
        assert_eq!(decimal_to_micros("-0.5", "quantity").unwrap(), -500_000);
        assert_eq!(decimal_to_micros("+4000", "price").unwrap(), 4_000_000_000);
        assert_eq!(decimal_to_micros("0.000001", "price").unwrap(), 1);
    }

    #[test]
    fn decimal_to_micros_rejects_garbage() {
        assert!(decimal_to_micros("", "price").is_err());
        assert!(decimal_to_micros("abc", "price").is_err());
        assert!(decimal_to_micros("1.2.3", "price").is_err());
        assert!(decimal_to_micros("1.1234567", "price").is_err());
    }

    #[test]
    fn micros_to_plain_is_canonical() {
        assert_eq!(micros_to_plain(150_250_000), "150.25");
        assert_eq!(micros_to_plain(4_000_000_000), "4000");
        assert_eq!(micros_to_plain(-500_000), "-0.5");
        assert_eq!(micros_to_plain(0), "0");
    }

    #[test]
    fn plain_round_trips_through_micros() {
        for s in ["150.25", "4000", "-0.5", "0", "0.000001"] {
            let m = decimal_to_micros(s, "x").unwrap();
            assert_eq!(micros_to_plain(m), *s);
        }
    }

    #[test]
    fn mul_micros_rescales() {
        // 100 × 150.25 = 15_025
        assert_eq!(
            mul_micros(100_000_000, 150_250_000),
            Some(15_025_000_000)
        );
    }
}
