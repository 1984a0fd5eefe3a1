//! Native numeric value types without a direct Rust primitive.
//!
//! * [`Decimal`]: a base-10 fixed-point number with a 96-bit mantissa and a scale of at most
//!   28 fractional digits, the range of the `Decimal` schema kind.
//! * [`FractionalNumber`]: a double that uses the compact `FractionalNumber` wire encoding
//!   instead of the fixed 8-byte `Double` encoding.

use std::fmt;
use std::str::FromStr;

use crate::error::{EvocodeError, Result};

/// Largest mantissa magnitude: 2^96 - 1.
const MAX_MANTISSA: i128 = (1i128 << 96) - 1;

/// Maximum number of fractional digits.
pub const MAX_SCALE: u8 = 28;

/// A base-10 fixed-point number: `mantissa / 10^scale`.
///
/// Values are kept normalized (no trailing fractional zeros), so structural equality is
/// numeric equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Zero.
    pub const ZERO: Decimal = Decimal { mantissa: 0, scale: 0 };
    /// Largest representable value, 79228162514264337593543950335.
    pub const MAX: Decimal = Decimal { mantissa: MAX_MANTISSA, scale: 0 };
    /// Smallest representable value, -79228162514264337593543950335.
    pub const MIN: Decimal = Decimal { mantissa: -MAX_MANTISSA, scale: 0 };

    /// Builds `mantissa / 10^scale`, rejecting values outside the decimal range.
    pub fn new(mantissa: i128, scale: u8) -> Result<Self> {
        if scale > MAX_SCALE {
            return Err(EvocodeError::malformed(format!(
                "decimal scale {scale} exceeds {MAX_SCALE}"
            )));
        }
        if mantissa.unsigned_abs() > MAX_MANTISSA.unsigned_abs() {
            return Err(EvocodeError::malformed(format!(
                "decimal mantissa {mantissa} exceeds 96 bits"
            )));
        }
        Ok(Self::normalized(mantissa, scale))
    }

    fn normalized(mut mantissa: i128, mut scale: u8) -> Self {
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    /// The unscaled integer value.
    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Number of fractional digits.
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Exact conversion from a signed integer.
    pub fn from_i64(v: i64) -> Self {
        Self { mantissa: i128::from(v), scale: 0 }
    }

    /// Exact conversion from an unsigned integer.
    pub fn from_u64(v: u64) -> Self {
        Self { mantissa: i128::from(v), scale: 0 }
    }

    /// Converts a double, saturating to [`Decimal::MIN`]/[`Decimal::MAX`] when out of range.
    ///
    /// NaN converts to zero. Digits beyond the 28th fractional place are truncated.
    pub fn from_f64_saturating(v: f64) -> Self {
        if v.is_nan() {
            return Self::ZERO;
        }
        if v >= Self::MAX.to_f64() {
            return Self::MAX;
        }
        if v <= Self::MIN.to_f64() {
            return Self::MIN;
        }
        // `Display` for f64 yields the shortest round-tripping digits without exponent.
        Self::parse(&v.to_string()).unwrap_or(Self::ZERO)
    }

    /// Nearest double.
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(i32::from(self.scale))
    }

    /// Integer part, truncated toward zero.
    pub fn trunc(&self) -> i128 {
        self.mantissa / 10i128.pow(u32::from(self.scale))
    }

    fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
            return Err(EvocodeError::malformed(format!("'{s}' is not a decimal number")));
        }

        let mut mantissa: i128 = 0;
        for b in int_part.bytes() {
            mantissa = mantissa * 10 + i128::from(b - b'0');
            if mantissa > MAX_MANTISSA {
                return Err(EvocodeError::malformed(format!("'{s}' is outside the decimal range")));
            }
        }
        let mut scale = 0u8;
        for b in frac_part.bytes() {
            let next = mantissa * 10 + i128::from(b - b'0');
            if scale == MAX_SCALE || next > MAX_MANTISSA {
                break;
            }
            mantissa = next;
            scale += 1;
        }
        if negative {
            mantissa = -mantissa;
        }
        Ok(Self::normalized(mantissa, scale))
    }
}

impl FromStr for Decimal {
    type Err = EvocodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let scale = usize::from(self.scale);
        let digits = format!("{:0>width$}", self.mantissa.unsigned_abs(), width = scale + 1);
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Self::from_i64(v)
    }
}

impl From<u64> for Decimal {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

/// A double stored with the compact `FractionalNumber` encoding.
///
/// Integral values cost as little as one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct FractionalNumber(pub f64);

impl From<f64> for FractionalNumber {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl From<FractionalNumber> for f64 {
    fn from(v: FractionalNumber) -> Self {
        v.0
    }
}
