//! Native codec: fixed- and variable-width scalar encodings.
//!
//! Every value on the wire is built from the primitives in this module:
//!
//! * fixed-width little-endian integers and floats;
//! * LEB128 "whole number" varints and zigzag "signed whole number" varints, used for
//!   integers, collection counts, string lengths and union discriminators;
//! * the two null encodings described by [`NullStyle`].
//!
//! [`Output`] appends to a caller-owned buffer and never fails. [`Input`] reads from a
//! borrowed slice and reports truncation or malformed data as
//! [`EvocodeError::Deserialization`].

use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::TypeRegistry;

/// Leading byte marking an absent record, tuple, union or fixed-width scalar.
pub const NULL_SENTINEL: u8 = 255;

/// Leading byte marking a present value for sentinel-style nullables.
pub const PRESENT: u8 = 0;

/// Longest LEB128 encoding of a `u128`.
const MAX_VARINT_LEN: usize = 19;

/// How a nullable value of some schema kind encodes "null".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullStyle {
    /// An explicit leading byte: [`NULL_SENTINEL`] for null, [`PRESENT`] otherwise.
    Sentinel,
    /// The value's leading varint (a count, a length or the number itself) is shifted by one
    /// and zero means null.
    Shifted,
}

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Largest magnitude a fractional number may have to use the compact integral encoding.
const FRACTIONAL_INTEGRAL_LIMIT: f64 = 4_503_599_627_370_496.0; // 2^52

/// Append-only writer over a caller-owned buffer.
///
/// The writer may carry the [`TypeRegistry`] so named types can dispatch to their
/// registered writers. Schema and block encoding use a plain writer without one.
#[derive(Debug)]
pub struct Output<'a> {
    buf: &'a mut Vec<u8>,
    types: Option<&'a TypeRegistry>,
}

macro_rules! write_fixed {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(
            #[doc = concat!("Writes a little-endian `", stringify!($t), "`.")]
            #[inline]
            pub fn $name(&mut self, v: $t) {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        )*
    };
}

impl<'a> Output<'a> {
    /// Creates a writer appending to `buf` that resolves named types through `types`.
    pub fn new(buf: &'a mut Vec<u8>, types: &'a TypeRegistry) -> Self {
        Self { buf, types: Some(types) }
    }

    /// Creates a writer for structural data only (schemas, blocks, headers).
    pub fn plain(buf: &'a mut Vec<u8>) -> Self {
        Self { buf, types: None }
    }

    /// Number of bytes in the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Writes raw bytes with no length prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    write_fixed!(
        write_i8: i8,
        write_u16: u16,
        write_i16: i16,
        write_u32: u32,
        write_i32: i32,
        write_u64: u64,
        write_i64: i64,
        write_i128: i128,
        write_f32: f32,
        write_f64: f64,
    );

    /// Writes a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    /// Writes a LEB128 varint.
    pub fn write_varint(&mut self, mut v: u128) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Writes a whole number (unsigned varint).
    #[inline]
    pub fn write_var_u64(&mut self, v: u64) {
        self.write_varint(u128::from(v));
    }

    /// Writes a signed whole number (zigzag varint).
    #[inline]
    pub fn write_var_i64(&mut self, v: i64) {
        self.write_varint(u128::from(zigzag(v)));
    }

    /// Writes the leading varint of a shifted-style value.
    ///
    /// `None` encodes null; present values are shifted by one when `nullable` is set.
    pub fn write_shifted(&mut self, v: Option<u64>, nullable: bool) {
        match (v, nullable) {
            (None, _) => self.write_varint(0),
            (Some(n), true) => self.write_varint(u128::from(n) + 1),
            (Some(n), false) => self.write_varint(u128::from(n)),
        }
    }

    /// Writes a shifted signed whole number; `None` encodes null.
    pub fn write_shifted_signed(&mut self, v: Option<i64>, nullable: bool) {
        self.write_shifted(v.map(zigzag), nullable);
    }

    /// Writes the null marker of a sentinel-style nullable.
    #[inline]
    pub fn write_null_marker(&mut self, is_null: bool) {
        self.buf.push(if is_null { NULL_SENTINEL } else { PRESENT });
    }

    /// Writes a string body: varint length (shifted if `nullable`) followed by UTF-8 bytes.
    pub fn write_str(&mut self, s: &str, nullable: bool) {
        self.write_shifted(Some(s.len() as u64), nullable);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Writes a fractional number in its compact form.
    ///
    /// Integral values below 2^52 in magnitude become an even varint; everything else is
    /// the varint `1` followed by the 8-byte double.
    pub fn write_fractional(&mut self, v: f64) {
        let integral = v.fract() == 0.0
            && v.abs() < FRACTIONAL_INTEGRAL_LIMIT
            && !(v == 0.0 && v.is_sign_negative());
        if integral {
            self.write_varint(u128::from(zigzag(v as i64)) << 1);
        } else {
            self.write_varint(1);
            self.write_f64(v);
        }
    }

    /// Writes a named value through the writer registered for `T`.
    pub fn write_named<T: Evolve>(&mut self, value: &T) -> Result<()> {
        let writer = self.registry()?.writer::<T>()?;
        writer(value, self)
    }

    /// Writes a possibly-null named value through the nullable writer registered for `T`.
    pub fn write_named_nullable<T: Evolve>(&mut self, value: Option<&T>) -> Result<()> {
        let writer = self.registry()?.nullable_writer::<T>()?;
        writer(value, self)
    }

    fn registry(&self) -> Result<&'a TypeRegistry> {
        self.types.ok_or_else(|| {
            EvocodeError::Internal("named value written through a plain output".to_string())
        })
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Input<'a> {
    bytes: &'a [u8],
    pos: usize,
}

macro_rules! read_fixed {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(
            #[doc = concat!("Reads a little-endian `", stringify!($t), "`.")]
            #[inline]
            pub fn $name(&mut self) -> Result<$t> {
                Ok(<$t>::from_le_bytes(self.read_array()?))
            }
        )*
    };
}

impl<'a> Input<'a> {
    /// Creates a cursor at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Returns true when every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// The unread tail of the input.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn truncated(&self, wanted: usize) -> EvocodeError {
        EvocodeError::malformed(format!(
            "unexpected end of input: needed {wanted} byte(s) at offset {}, {} available",
            self.pos,
            self.remaining()
        ))
    }

    /// Reads one byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| self.truncated(1))?;
        self.pos += 1;
        Ok(b)
    }

    /// Borrows the next `n` bytes.
    #[inline]
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads exactly `N` bytes into an array.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Advances the cursor by `n` bytes.
    #[inline]
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        self.pos += n;
        Ok(())
    }

    read_fixed!(
        read_i8: i8,
        read_u16: u16,
        read_i16: i16,
        read_u32: u32,
        read_i32: i32,
        read_u64: u64,
        read_i64: i64,
        read_i128: i128,
        read_f32: f32,
        read_f64: f64,
    );

    /// Reads a one-byte boolean. Only `0` and `1` are accepted.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(EvocodeError::malformed(format!("invalid boolean byte {other}"))),
        }
    }

    /// Reads a LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u128> {
        let mut result: u128 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let chunk = u128::from(byte & 0x7f);
            let shift = 7 * i as u32;
            if shift >= 128 || (shift > 121 && chunk >> (128 - shift) != 0) {
                return Err(EvocodeError::malformed("varint overflows 128 bits"));
            }
            result |= chunk << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(EvocodeError::malformed("varint longer than 19 bytes"))
    }

    /// Advances past one varint without decoding it.
    pub fn skip_varint(&mut self) -> Result<()> {
        for _ in 0..MAX_VARINT_LEN {
            if self.read_u8()? & 0x80 == 0 {
                return Ok(());
            }
        }
        Err(EvocodeError::malformed("varint longer than 19 bytes"))
    }

    /// Reads a whole number (unsigned varint).
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let v = self.read_varint()?;
        u64::try_from(v).map_err(|_| EvocodeError::malformed(format!("whole number {v} exceeds 64 bits")))
    }

    /// Reads a signed whole number (zigzag varint).
    pub fn read_var_i64(&mut self) -> Result<i64> {
        Ok(unzigzag(self.read_var_u64()?))
    }

    /// Reads the leading varint of a shifted-style value; `None` means null.
    pub fn read_shifted(&mut self, nullable: bool) -> Result<Option<u64>> {
        let raw = self.read_varint()?;
        let v = if nullable {
            if raw == 0 {
                return Ok(None);
            }
            raw - 1
        } else {
            raw
        };
        u64::try_from(v)
            .map(Some)
            .map_err(|_| EvocodeError::malformed(format!("varint {v} exceeds 64 bits")))
    }

    /// Reads a shifted signed whole number; `None` means null.
    pub fn read_shifted_signed(&mut self, nullable: bool) -> Result<Option<i64>> {
        Ok(self.read_shifted(nullable)?.map(unzigzag))
    }

    /// Reads a collection count or string length; `None` means null.
    pub fn read_count(&mut self, nullable: bool) -> Result<Option<usize>> {
        match self.read_shifted(nullable)? {
            None => Ok(None),
            Some(n) => usize::try_from(n)
                .map(Some)
                .map_err(|_| EvocodeError::malformed(format!("count {n} does not fit in memory"))),
        }
    }

    /// Reads a sentinel-style null marker. Returns `true` for null.
    pub fn read_null_marker(&mut self) -> Result<bool> {
        match self.read_u8()? {
            NULL_SENTINEL => Ok(true),
            PRESENT => Ok(false),
            other => Err(EvocodeError::malformed(format!("invalid null marker byte {other}"))),
        }
    }

    /// Reads a string body of `len` bytes.
    pub fn read_str(&mut self, len: usize) -> Result<&'a str> {
        let bytes = self.read_slice(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| EvocodeError::malformed(format!("invalid UTF-8 in string: {e}")))
    }

    /// Reads a fractional number written by [`Output::write_fractional`].
    pub fn read_fractional(&mut self) -> Result<f64> {
        let header = self.read_var_u64()?;
        if header & 1 == 0 {
            Ok(unzigzag(header >> 1) as f64)
        } else if header == 1 {
            self.read_f64()
        } else {
            Err(EvocodeError::malformed(format!("invalid fractional number header {header}")))
        }
    }

    /// Advances past a fractional number.
    pub fn skip_fractional(&mut self) -> Result<()> {
        if self.read_var_u64()? & 1 == 1 {
            self.skip(8)?;
        }
        Ok(())
    }

    /// Capacity to preallocate for `count` untrusted elements.
    pub fn bounded_capacity(&self, count: usize) -> usize {
        count.min(self.remaining())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut Output<'_>)) -> Vec<u8> {
        let mut buf = Vec::new();
        f(&mut Output::plain(&mut buf));
        buf
    }

    #[test]
    fn varint_sizes_grow_with_magnitude() {
        assert_eq!(encode(|o| o.write_var_u64(0)), vec![0]);
        assert_eq!(encode(|o| o.write_var_u64(127)), vec![127]);
        assert_eq!(encode(|o| o.write_var_u64(128)), vec![0x80, 0x01]);
        assert_eq!(encode(|o| o.write_var_u64(u64::MAX)).len(), 10);
    }

    #[test]
    fn zigzag_keeps_small_negatives_small() {
        assert_eq!(encode(|o| o.write_var_i64(-1)), vec![1]);
        assert_eq!(encode(|o| o.write_var_i64(1)), vec![2]);
        let bytes = encode(|o| o.write_var_i64(i64::MIN));
        assert_eq!(Input::new(&bytes).read_var_i64().unwrap(), i64::MIN);
    }

    #[test]
    fn shifted_null_round_trips_extreme_values() {
        let bytes = encode(|o| {
            o.write_shifted(None, true);
            o.write_shifted(Some(u64::MAX), true);
            o.write_shifted(Some(0), true);
        });
        let mut input = Input::new(&bytes);
        assert_eq!(input.read_shifted(true).unwrap(), None);
        assert_eq!(input.read_shifted(true).unwrap(), Some(u64::MAX));
        assert_eq!(input.read_shifted(true).unwrap(), Some(0));
        assert!(input.is_exhausted());
    }

    #[test]
    fn fractional_prefers_compact_integral_form() {
        assert_eq!(encode(|o| o.write_fractional(3.0)).len(), 1);
        assert_eq!(encode(|o| o.write_fractional(0.5)).len(), 9);
        let bytes = encode(|o| {
            o.write_fractional(-42.0);
            o.write_fractional(-0.0);
            o.write_fractional(f64::INFINITY);
        });
        let mut input = Input::new(&bytes);
        assert_eq!(input.read_fractional().unwrap(), -42.0);
        let neg_zero = input.read_fractional().unwrap();
        assert!(neg_zero == 0.0 && neg_zero.is_sign_negative());
        assert_eq!(input.read_fractional().unwrap(), f64::INFINITY);
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut input = Input::new(&[0x80]);
        assert!(matches!(input.read_varint(), Err(EvocodeError::Deserialization(_))));
        let mut input = Input::new(&[1, 2]);
        assert!(input.read_u32().is_err());
    }

    #[test]
    fn invalid_null_marker_is_rejected() {
        let mut input = Input::new(&[7]);
        assert!(input.read_null_marker().is_err());
    }
}
