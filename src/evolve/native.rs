//! [`Evolve`] for native values.

use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{Input, Output};
use crate::decimal::{Decimal, FractionalNumber};
use crate::defaults::{DefaultFn, DefaultValues};
use crate::engine::bridge::{native_reader, read_char, read_decimal, Bridge};
use crate::engine::{BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::schema::{Schema, SchemaKind};
use crate::schema_by_type::SchemaCx;

/// A native value: one schema kind with a direct encoding and a bridge conversion.
pub trait Native: Evolve {
    /// The schema kind this type is written as.
    const KIND: SchemaKind;

    /// Reads a value written under [`Self::KIND`]. `None` means null.
    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>>;

    /// Converts a value read under another native kind.
    fn from_bridge(bridge: Bridge) -> Result<Self>;
}

macro_rules! native_evolve {
    ($t:ty, $kind:ident) => {
        fn schema(_: &mut SchemaCx<'_>) -> Result<Schema> {
            Schema::native(SchemaKind::$kind)
        }

        fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
            native_reader::<Self>(source, cx)
        }

        fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
            Ok(Arc::new(<$t>::default))
        }
    };
}

#[inline]
fn sentinel_present(input: &mut Input<'_>, nullable: bool) -> Result<bool> {
    Ok(!nullable || !input.read_null_marker()?)
}

macro_rules! fixed_int {
    ($($t:ty: $kind:ident, $write:ident, $read:ident, $via:ident;)*) => {
        $(
            impl Evolve for $t {
                native_evolve!($t, $kind);

                fn write(&self, out: &mut Output<'_>) -> Result<()> {
                    out.$write(*self);
                    Ok(())
                }
            }

            impl Native for $t {
                const KIND: SchemaKind = SchemaKind::$kind;

                fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
                    if !sentinel_present(input, nullable)? {
                        return Ok(None);
                    }
                    input.$read().map(Some)
                }

                fn from_bridge(bridge: Bridge) -> Result<Self> {
                    Ok(match bridge {
                        Bridge::Double(v) => v as $t,
                        other => other.$via()? as $t,
                    })
                }
            }
        )*
    };
}

fixed_int! {
    u8: Byte, write_u8, read_u8, to_unsigned;
    u16: UShort, write_u16, read_u16, to_unsigned;
    u32: UInt, write_u32, read_u32, to_unsigned;
    u64: ULong, write_u64, read_u64, to_unsigned;
    i8: SByte, write_i8, read_i8, to_signed;
    i16: Short, write_i16, read_i16, to_signed;
    i32: Int, write_i32, read_i32, to_signed;
    i64: Long, write_i64, read_i64, to_signed;
}

macro_rules! fixed_float {
    ($($t:ty: $kind:ident, $write:ident, $read:ident;)*) => {
        $(
            impl Evolve for $t {
                native_evolve!($t, $kind);

                fn write(&self, out: &mut Output<'_>) -> Result<()> {
                    out.$write(*self);
                    Ok(())
                }
            }

            impl Native for $t {
                const KIND: SchemaKind = SchemaKind::$kind;

                fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
                    if !sentinel_present(input, nullable)? {
                        return Ok(None);
                    }
                    input.$read().map(Some)
                }

                fn from_bridge(bridge: Bridge) -> Result<Self> {
                    Ok(bridge.to_double()? as $t)
                }
            }
        )*
    };
}

fixed_float! {
    f32: Float, write_f32, read_f32;
    f64: Double, write_f64, read_f64;
}

impl Evolve for bool {
    native_evolve!(bool, Bool);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_bool(*self);
        Ok(())
    }
}

impl Native for bool {
    const KIND: SchemaKind = SchemaKind::Bool;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        if !sentinel_present(input, nullable)? {
            return Ok(None);
        }
        input.read_bool().map(Some)
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        match bridge {
            Bridge::Str(s) => {
                let text = s.trim();
                if text.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if text.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Ok(Bridge::Str(s).to_double()? != 0.0)
                }
            }
            Bridge::Signed(v) => Ok(v != 0),
            Bridge::Unsigned(v) => Ok(v != 0),
            Bridge::Double(v) => Ok(v != 0.0),
            Bridge::Decimal(v) => Ok(v != Decimal::ZERO),
        }
    }
}

impl Evolve for char {
    native_evolve!(char, Char);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_u32(u32::from(*self));
        Ok(())
    }
}

impl Native for char {
    const KIND: SchemaKind = SchemaKind::Char;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        if !sentinel_present(input, nullable)? {
            return Ok(None);
        }
        read_char(input).map(Some)
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        if let Bridge::Str(s) = &bridge {
            let mut chars = s.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(EvocodeError::malformed(format!("cannot convert '{s}' to a char"))),
            };
        }
        let code = match bridge {
            Bridge::Double(v) => v as u32,
            other => other.to_unsigned()? as u32,
        };
        char::from_u32(code).ok_or_else(|| EvocodeError::malformed(format!("invalid char code point {code:#x}")))
    }
}

impl Evolve for String {
    native_evolve!(String, String);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_str(self, false);
        Ok(())
    }

    fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
        match value {
            Some(s) => out.write_str(s, true),
            None => out.write_shifted(None, true),
        }
        Ok(())
    }
}

impl Native for String {
    const KIND: SchemaKind = SchemaKind::String;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        match input.read_count(nullable)? {
            Some(len) => Ok(Some(input.read_str(len)?.to_owned())),
            None => Ok(None),
        }
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        Ok(bridge.to_str())
    }
}

impl Evolve for usize {
    native_evolve!(usize, WholeNumber);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_var_u64(*self as u64);
        Ok(())
    }

    fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
        out.write_shifted(value.map(|v| *v as u64), true);
        Ok(())
    }
}

impl Native for usize {
    const KIND: SchemaKind = SchemaKind::WholeNumber;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        Ok(input.read_shifted(nullable)?.map(|v| v as usize))
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        Ok(match bridge {
            Bridge::Double(v) => v as usize,
            other => other.to_unsigned()? as usize,
        })
    }
}

impl Evolve for isize {
    native_evolve!(isize, SignedWholeNumber);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_var_i64(*self as i64);
        Ok(())
    }

    fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
        out.write_shifted_signed(value.map(|v| *v as i64), true);
        Ok(())
    }
}

impl Native for isize {
    const KIND: SchemaKind = SchemaKind::SignedWholeNumber;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        Ok(input.read_shifted_signed(nullable)?.map(|v| v as isize))
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        Ok(match bridge {
            Bridge::Double(v) => v as isize,
            other => other.to_signed()? as isize,
        })
    }
}

impl Evolve for FractionalNumber {
    native_evolve!(FractionalNumber, FractionalNumber);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_fractional(self.0);
        Ok(())
    }
}

impl Native for FractionalNumber {
    const KIND: SchemaKind = SchemaKind::FractionalNumber;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        if !sentinel_present(input, nullable)? {
            return Ok(None);
        }
        Ok(Some(Self(input.read_fractional()?)))
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        bridge.to_double().map(Self)
    }
}

impl Evolve for Decimal {
    native_evolve!(Decimal, Decimal);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_i128(self.mantissa());
        out.write_u8(self.scale());
        Ok(())
    }
}

impl Native for Decimal {
    const KIND: SchemaKind = SchemaKind::Decimal;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        if !sentinel_present(input, nullable)? {
            return Ok(None);
        }
        read_decimal(input).map(Some)
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        bridge.to_decimal()
    }
}

impl Evolve for Uuid {
    native_evolve!(Uuid, Guid);

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        out.write_bytes(self.as_bytes());
        Ok(())
    }
}

impl Native for Uuid {
    const KIND: SchemaKind = SchemaKind::Guid;

    fn read_native(input: &mut Input<'_>, nullable: bool) -> Result<Option<Self>> {
        if !sentinel_present(input, nullable)? {
            return Ok(None);
        }
        Ok(Some(Uuid::from_bytes(input.read_array()?)))
    }

    fn from_bridge(bridge: Bridge) -> Result<Self> {
        let text = bridge.to_str();
        Uuid::parse_str(text.trim()).map_err(|e| EvocodeError::malformed(format!("cannot convert '{text}' to a guid: {e}")))
    }
}
