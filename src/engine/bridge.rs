//! Conversions between native kinds.
//!
//! A source value of one native kind is read into one of five bridge representations and then
//! converted into the target type. Every ordered pair of bridges has exactly one rule:
//!
//! | to \ from | `Str` | `Signed` | `Unsigned` | `Double` | `Decimal` |
//! |---|---|---|---|---|---|
//! | `Str` | same | format | format | format | format |
//! | `Signed` | parse | same | modular | saturating | truncate, modular |
//! | `Unsigned` | parse | modular | same | saturating | truncate, modular |
//! | `Double` | parse | nearest | nearest | same | nearest |
//! | `Decimal` | parse | exact | exact | saturating | same |
//!
//! A string that does not parse is a deserialization error. A char is text for string
//! targets and its code point (`Unsigned`) for every other target.

use tracing::debug;
use uuid::Uuid;

use crate::codec::Input;
use crate::decimal::Decimal;
use crate::engine::{BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::native::Native;
use crate::registry::TypeKey;
use crate::schema::{Schema, SchemaKind};

/// Intermediate representation of a native value.
#[derive(Debug, Clone, PartialEq)]
pub enum Bridge {
    /// Text.
    Str(String),
    /// Any signed integer.
    Signed(i64),
    /// Any unsigned integer or boolean.
    Unsigned(u64),
    /// Any floating-point number.
    Double(f64),
    /// A decimal.
    Decimal(Decimal),
}

fn unparsable(text: &str, target: &str) -> EvocodeError {
    EvocodeError::malformed(format!("cannot convert '{text}' to {target}"))
}

impl Bridge {
    /// Textual form.
    pub fn to_str(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Signed(v) => v.to_string(),
            Self::Unsigned(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Decimal(v) => v.to_string(),
        }
    }

    /// As a signed 64-bit integer.
    pub fn to_signed(self) -> Result<i64> {
        Ok(match self {
            Self::Str(s) => s.trim().parse::<i64>().map_err(|_| unparsable(&s, "a signed integer"))?,
            Self::Signed(v) => v,
            Self::Unsigned(v) => v as i64,
            Self::Double(v) => v as i64,
            Self::Decimal(v) => v.trunc() as i64,
        })
    }

    /// As an unsigned 64-bit integer.
    pub fn to_unsigned(self) -> Result<u64> {
        Ok(match self {
            Self::Str(s) => s.trim().parse::<u64>().map_err(|_| unparsable(&s, "an unsigned integer"))?,
            Self::Signed(v) => v as u64,
            Self::Unsigned(v) => v,
            Self::Double(v) => v as u64,
            Self::Decimal(v) => v.trunc() as u64,
        })
    }

    /// As a double.
    pub fn to_double(self) -> Result<f64> {
        Ok(match self {
            Self::Str(s) => s.trim().parse::<f64>().map_err(|_| unparsable(&s, "a floating-point number"))?,
            Self::Signed(v) => v as f64,
            Self::Unsigned(v) => v as f64,
            Self::Double(v) => v,
            Self::Decimal(v) => v.to_f64(),
        })
    }

    /// As a decimal.
    pub fn to_decimal(self) -> Result<Decimal> {
        Ok(match self {
            Self::Str(s) => s.parse::<Decimal>()?,
            Self::Signed(v) => Decimal::from_i64(v),
            Self::Unsigned(v) => Decimal::from_u64(v),
            Self::Double(v) => Decimal::from_f64_saturating(v),
            Self::Decimal(v) => v,
        })
    }
}

/// Reads a value of native `kind` into its bridge. `None` means null.
pub fn read_bridge(kind: SchemaKind, nullable: bool, input: &mut Input<'_>) -> Result<Option<Bridge>> {
    match kind {
        SchemaKind::String => {
            let Some(len) = input.read_count(nullable)? else {
                return Ok(None);
            };
            return Ok(Some(Bridge::Str(input.read_str(len)?.to_owned())));
        }
        SchemaKind::WholeNumber => return Ok(input.read_shifted(nullable)?.map(Bridge::Unsigned)),
        SchemaKind::SignedWholeNumber => return Ok(input.read_shifted_signed(nullable)?.map(Bridge::Signed)),
        _ => {}
    }

    if nullable && input.read_null_marker()? {
        return Ok(None);
    }
    let bridge = match kind {
        SchemaKind::Bool => Bridge::Unsigned(u64::from(input.read_bool()?)),
        SchemaKind::Byte => Bridge::Unsigned(u64::from(input.read_u8()?)),
        SchemaKind::UShort => Bridge::Unsigned(u64::from(input.read_u16()?)),
        SchemaKind::UInt => Bridge::Unsigned(u64::from(input.read_u32()?)),
        SchemaKind::ULong => Bridge::Unsigned(input.read_u64()?),
        SchemaKind::SByte => Bridge::Signed(i64::from(input.read_i8()?)),
        SchemaKind::Short => Bridge::Signed(i64::from(input.read_i16()?)),
        SchemaKind::Int => Bridge::Signed(i64::from(input.read_i32()?)),
        SchemaKind::Long => Bridge::Signed(input.read_i64()?),
        SchemaKind::Float => Bridge::Double(f64::from(input.read_f32()?)),
        SchemaKind::Double => Bridge::Double(input.read_f64()?),
        SchemaKind::FractionalNumber => Bridge::Double(input.read_fractional()?),
        SchemaKind::Decimal => Bridge::Decimal(read_decimal(input)?),
        SchemaKind::Guid => Bridge::Str(Uuid::from_bytes(input.read_array()?).to_string()),
        SchemaKind::Char => Bridge::Str(read_char(input)?.to_string()),
        other => {
            return Err(EvocodeError::Internal(format!("{other:?} has no bridge representation")));
        }
    };
    Ok(Some(bridge))
}

pub(crate) fn read_decimal(input: &mut Input<'_>) -> Result<Decimal> {
    let mantissa = input.read_i128()?;
    let scale = input.read_u8()?;
    Decimal::new(mantissa, scale)
}

pub(crate) fn read_char(input: &mut Input<'_>) -> Result<char> {
    let code = input.read_u32()?;
    char::from_u32(code).ok_or_else(|| EvocodeError::malformed(format!("invalid char code point {code:#x}")))
}

/// Reader of a native `T` from any source schema.
///
/// The same kind reads directly; another native kind converts through its bridge; any
/// composite kind is skipped and reads as `None`.
pub fn native_reader<T: Native>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<T>>> {
    let kind = source.kind();
    let nullable = source.is_nullable();
    if kind == T::KIND {
        return Ok(Reader::new(move |input| T::read_native(input, nullable)));
    }
    if !kind.is_native() {
        debug!(target_type = %TypeKey::of::<T>(), %source, "incompatible source kind, value will be skipped");
        return cx.skip_as_none::<T>(source);
    }
    debug!(target_type = %TypeKey::of::<T>(), %source, "synthesized bridge converter");
    if kind == SchemaKind::Char && !matches!(T::KIND, SchemaKind::String | SchemaKind::Guid) {
        return Ok(Reader::new(move |input| {
            read_char_code(nullable, input)?.map(T::from_bridge).transpose()
        }));
    }
    Ok(Reader::new(move |input| {
        read_bridge(kind, nullable, input)?.map(T::from_bridge).transpose()
    }))
}

/// Reads a char as its code point, the bridge of a char read into a numeric target.
fn read_char_code(nullable: bool, input: &mut Input<'_>) -> Result<Option<Bridge>> {
    if nullable && input.read_null_marker()? {
        return Ok(None);
    }
    Ok(Some(Bridge::Unsigned(u64::from(u32::from(read_char(input)?)))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::Output;

    #[test]
    fn narrowing_is_modular_and_doubles_saturate() {
        assert_eq!(Bridge::Unsigned(u64::MAX).to_signed().unwrap(), -1);
        assert_eq!(Bridge::Signed(-1).to_unsigned().unwrap(), u64::MAX);
        assert_eq!(Bridge::Double(1e300).to_signed().unwrap(), i64::MAX);
        assert_eq!(Bridge::Double(-5.0).to_unsigned().unwrap(), 0);
        assert_eq!(Bridge::Double(f64::NAN).to_signed().unwrap(), 0);
    }

    #[test]
    fn decimals_truncate_toward_zero() {
        let d: Decimal = "-12.75".parse().unwrap();
        assert_eq!(Bridge::Decimal(d).to_signed().unwrap(), -12);
        assert_eq!(Bridge::Double(1e40).to_decimal().unwrap(), Decimal::MAX);
        assert_eq!(Bridge::Signed(7).to_decimal().unwrap(), Decimal::from_i64(7));
    }

    #[test]
    fn strings_parse_and_format() {
        assert_eq!(Bridge::Str(" 42 ".into()).to_unsigned().unwrap(), 42);
        assert_eq!(Bridge::Str("2.5".into()).to_double().unwrap(), 2.5);
        assert_eq!(Bridge::Signed(-3).to_str(), "-3");
        assert_eq!(Bridge::Double(0.5).to_str(), "0.5");
        let err = Bridge::Str("forty-two".into()).to_signed().unwrap_err();
        assert!(matches!(err, EvocodeError::Deserialization(_)));
    }

    #[test]
    fn reads_every_fixed_width_kind_into_a_bridge() {
        let mut buf = Vec::new();
        let mut out = Output::plain(&mut buf);
        out.write_null_marker(false);
        out.write_i16(-2);
        out.write_null_marker(true);
        out.write_u32(0x1F600);
        out.write_shifted(Some(9), true);

        let mut input = Input::new(&buf);
        assert_eq!(read_bridge(SchemaKind::Short, true, &mut input).unwrap(), Some(Bridge::Signed(-2)));
        assert_eq!(read_bridge(SchemaKind::Double, true, &mut input).unwrap(), None);
        assert_eq!(
            read_bridge(SchemaKind::Char, false, &mut input).unwrap(),
            Some(Bridge::Str("\u{1F600}".into()))
        );
        assert_eq!(read_bridge(SchemaKind::WholeNumber, true, &mut input).unwrap(), Some(Bridge::Unsigned(9)));
        assert!(input.is_exhausted());
    }

    #[test]
    fn chars_bridge_as_code_points() {
        let mut buf = Vec::new();
        let mut out = Output::plain(&mut buf);
        out.write_null_marker(true);
        out.write_null_marker(false);
        out.write_u32(u32::from('A'));

        let mut input = Input::new(&buf);
        assert_eq!(read_char_code(true, &mut input).unwrap(), None);
        assert_eq!(read_char_code(true, &mut input).unwrap(), Some(Bridge::Unsigned(65)));
        assert!(input.is_exhausted());
    }
}
