//! Defines the per-message header of the Evocode wire format.
//!
//! # Layout
//! Every message starts with a one-byte [`FormatTag`]:
//!
//! ```text
//! 254 Full:       [u32 blockId LE][schema][body]
//! 253 NoBlockId:                  [schema][body]
//! 252..245 raw:                           [body]   (Byte, SByte, Short, UShort,
//!                                                   Int, UInt, Long, ULong)
//! ```
//!
//! The writer picks the cheapest header that still round-trips. A raw tag implies a
//! non-nullable schema of the matching integer kind. `NoBlockId` is used when the schema
//! references no record or union. `Full` carries the latest block known at write time so a
//! reader can tell whether it is missing shapes.

use crate::codec::{Input, Output};
use crate::error::{EvocodeError, Result};
use crate::schema::{Schema, SchemaKind};
use crate::storage::{BlockId, SchemaVersioning};

/// First byte of every message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Block ID and schema follow.
    Full = 254,
    /// Schema follows; it references no contents.
    NoBlockId = 253,
    /// Raw `u8` body.
    Byte = 252,
    /// Raw `i8` body.
    SByte = 251,
    /// Raw `i16` body.
    Short = 250,
    /// Raw `u16` body.
    UShort = 249,
    /// Raw `i32` body.
    Int = 248,
    /// Raw `u32` body.
    UInt = 247,
    /// Raw `i64` body.
    Long = 246,
    /// Raw `u64` body.
    ULong = 245,
}

impl FormatTag {
    /// Decodes a tag byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            254 => Self::Full,
            253 => Self::NoBlockId,
            252 => Self::Byte,
            251 => Self::SByte,
            250 => Self::Short,
            249 => Self::UShort,
            248 => Self::Int,
            247 => Self::UInt,
            246 => Self::Long,
            245 => Self::ULong,
            _ => return None,
        })
    }

    /// The tag byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The integer kind implied by a raw tag.
    pub fn raw_kind(self) -> Option<SchemaKind> {
        Some(match self {
            Self::Byte => SchemaKind::Byte,
            Self::SByte => SchemaKind::SByte,
            Self::Short => SchemaKind::Short,
            Self::UShort => SchemaKind::UShort,
            Self::Int => SchemaKind::Int,
            Self::UInt => SchemaKind::UInt,
            Self::Long => SchemaKind::Long,
            Self::ULong => SchemaKind::ULong,
            Self::Full | Self::NoBlockId => return None,
        })
    }

    /// The raw tag for a non-nullable schema of an integer kind.
    pub fn raw_for(schema: &Schema) -> Option<Self> {
        if schema.is_nullable() {
            return None;
        }
        Some(match schema.kind() {
            SchemaKind::Byte => Self::Byte,
            SchemaKind::SByte => Self::SByte,
            SchemaKind::Short => Self::Short,
            SchemaKind::UShort => Self::UShort,
            SchemaKind::Int => Self::Int,
            SchemaKind::UInt => Self::UInt,
            SchemaKind::Long => Self::Long,
            SchemaKind::ULong => Self::ULong,
            _ => return None,
        })
    }
}

/// A decoded message header.
#[derive(Debug, Clone)]
pub struct Header {
    /// Tag the message was written with.
    pub tag: FormatTag,
    /// Block referenced by a `Full` header.
    pub block: Option<BlockId>,
    /// Schema of the body.
    pub schema: Schema,
    /// Encoded length of the header.
    pub len: usize,
}

/// Writes the cheapest header for `schema`.
pub fn write_header(
    out: &mut Output<'_>,
    schema: &Schema,
    latest: Option<BlockId>,
    raw_integers: bool,
) -> Result<FormatTag> {
    if raw_integers {
        if let Some(tag) = FormatTag::raw_for(schema) {
            out.write_u8(tag.as_u8());
            return Ok(tag);
        }
    }
    if !schema.uses_contents() {
        out.write_u8(FormatTag::NoBlockId.as_u8());
        schema.encode(out)?;
        return Ok(FormatTag::NoBlockId);
    }
    let block = latest.ok_or_else(|| {
        EvocodeError::Internal(format!("no schema block recorded for {schema}"))
    })?;
    out.write_u8(FormatTag::Full.as_u8());
    out.write_u32(block.0);
    schema.encode(out)?;
    Ok(FormatTag::Full)
}

/// Reads a header, reloading schema storage once if it references an unknown block.
pub fn read_header(input: &mut Input<'_>, versioning: &SchemaVersioning) -> Result<Header> {
    let start = input.position();
    let byte = input.read_u8()?;
    let tag = FormatTag::from_u8(byte)
        .ok_or_else(|| EvocodeError::malformed(format!("unknown format tag {byte}")))?;

    if let Some(kind) = tag.raw_kind() {
        return Ok(Header {
            tag,
            block: None,
            schema: Schema::native(kind)?,
            len: input.position() - start,
        });
    }

    let block = if tag == FormatTag::Full {
        let id = BlockId(input.read_u32()?);
        if !versioning.ensure_block(id)? {
            return Err(EvocodeError::malformed(format!("cannot find schemas for block {id}")));
        }
        Some(id)
    } else {
        None
    };

    let store = versioning.contents();
    let schema = Schema::decode(input, &mut |id| store.get(id))?;
    Ok(Header {
        tag,
        block,
        schema,
        len: input.position() - start,
    })
}
