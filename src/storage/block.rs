//! Binary format of one block of the schema log.
//!
//! ```text
//! [u16 marker 0xad5d LE][u8 version][u32 blockId LE][varint shapeCount]
//!   per shape:  [varint contentsId][varint memberCount]
//!     per member: [varint memberId][schema]
//! ```
//!
//! Nested records and unions are written as contents-ID back-references. When decoding,
//! references to shapes defined later in the same block (or to the shape itself) are
//! resolved through placeholders that are filled once the whole block has been read.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{Input, Output};
use crate::error::{EvocodeError, Result};
use crate::schema::contents::ContentsStore;
use crate::schema::{Contents, ContentsId, Schema, SchemaMember};

/// Leading marker of every block.
pub const BLOCK_MARKER: u16 = 0xad5d;

/// Current block format version.
pub const BLOCK_VERSION: u8 = 1;

/// Random nonzero identifier of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Draws a fresh random, nonzero block ID.
    pub fn random() -> Self {
        loop {
            let id: u32 = rand::random();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encodes `shapes` as one block. Every shape and every nested reference must carry an ID.
pub fn encode_block(id: BlockId, shapes: &[Arc<Contents>]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut out = Output::plain(&mut buf);
    out.write_u16(BLOCK_MARKER);
    out.write_u8(BLOCK_VERSION);
    out.write_u32(id.0);
    out.write_var_u64(shapes.len() as u64);
    for shape in shapes {
        let contents_id = shape
            .id()
            .ok_or_else(|| EvocodeError::Internal("block shape has no contents id".to_string()))?;
        out.write_var_u64(u64::from(contents_id.0));
        out.write_var_u64(shape.members().len() as u64);
        for member in shape.members() {
            out.write_var_u64(u64::from(member.id));
            member.schema.encode(&mut out)?;
        }
    }
    Ok(buf)
}

/// Decodes every block in `bytes` into `store` and returns their IDs in log order.
pub fn ingest_blocks(bytes: &[u8], store: &ContentsStore) -> Result<Vec<BlockId>> {
    let mut input = Input::new(bytes);
    let mut ids = Vec::new();
    while !input.is_exhausted() {
        ids.push(read_block(&mut input, store)?);
    }
    Ok(ids)
}

fn read_block(input: &mut Input<'_>, store: &ContentsStore) -> Result<BlockId> {
    let start = input.position();
    let marker = input.read_u16().map_err(corrupt)?;
    if marker != BLOCK_MARKER {
        return Err(EvocodeError::corrupt_log(format!(
            "bad block marker {marker:#06x} at offset {start}"
        )));
    }
    let version = input.read_u8().map_err(corrupt)?;
    if version != BLOCK_VERSION {
        return Err(EvocodeError::corrupt_log(format!(
            "unsupported block version {version} at offset {start}"
        )));
    }
    let id = BlockId(input.read_u32().map_err(corrupt)?);
    let count = input.read_var_u64().map_err(corrupt)?;

    let mut placeholders: BTreeMap<ContentsId, Arc<Contents>> = BTreeMap::new();
    let mut defined: Vec<ContentsId> = Vec::new();
    for _ in 0..count {
        let contents_id = read_contents_id(input)?;
        let member_count = input.read_var_u64().map_err(corrupt)?;
        let mut members = Vec::new();
        for _ in 0..member_count {
            let member_id = u32::try_from(input.read_var_u64().map_err(corrupt)?)
                .map_err(|_| EvocodeError::corrupt_log("member id exceeds 32 bits"))?;
            let mut resolve = |cid: ContentsId| -> Result<Arc<Contents>> {
                if let Some(known) = placeholders.get(&cid) {
                    return Ok(known.clone());
                }
                if let Some(known) = store.try_get(cid) {
                    return Ok(known);
                }
                let pending = Contents::pending();
                placeholders.insert(cid, pending.clone());
                Ok(pending)
            };
            let schema = Schema::decode(input, &mut resolve).map_err(corrupt)?;
            members.push(SchemaMember::new(member_id, schema));
        }
        let node = placeholders
            .entry(contents_id)
            .or_insert_with(Contents::pending)
            .clone();
        if node.is_complete() {
            return Err(EvocodeError::corrupt_log(format!(
                "contents id {contents_id} defined twice in block {id}"
            )));
        }
        node.set_members(members).map_err(corrupt)?;
        defined.push(contents_id);
    }

    if let Some((dangling, _)) = placeholders.iter().find(|(_, c)| !c.is_complete()) {
        return Err(EvocodeError::corrupt_log(format!(
            "block {id} references contents id {dangling} that no block defines"
        )));
    }
    for contents_id in defined {
        if let Some(node) = placeholders.get(&contents_id) {
            store.insert_loaded(contents_id, node.clone())?;
        }
    }
    Ok(id)
}

fn read_contents_id(input: &mut Input<'_>) -> Result<ContentsId> {
    let raw = input.read_var_u64().map_err(corrupt)?;
    u32::try_from(raw)
        .ok()
        .filter(|id| *id != 0)
        .map(ContentsId)
        .ok_or_else(|| EvocodeError::corrupt_log(format!("invalid contents id {raw}")))
}

fn corrupt(err: EvocodeError) -> EvocodeError {
    match err {
        EvocodeError::Deserialization(msg) | EvocodeError::Schema(msg) => EvocodeError::corrupt_log(msg),
        other => other,
    }
}
