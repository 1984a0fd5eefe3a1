//! Union readers.
//!
//! A union value is `[null marker if nullable][varint discriminator][payload]`. The
//! discriminator selects a member of the *source* union; a discriminator the source schema
//! does not list is malformed data. A member the target does not bind is skipped and the
//! value reads as `None`, which the caller turns into the target's default.

use tracing::debug;

use crate::engine::{BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::{TypeKey, UnionFactory};
use crate::schema::{Schema, SchemaKind};
use crate::skipper::Skipper;

enum Arm<T: 'static> {
    Read(Reader<Option<T>>),
    Skip(Skipper),
}

fn dispatch<T: 'static>(source: &Schema, arms: Vec<(u64, Arm<T>)>) -> Reader<Option<T>> {
    let nullable = source.is_nullable();
    Reader::new(move |input| {
        if nullable && input.read_null_marker()? {
            return Ok(None);
        }
        let discriminator = input.read_var_u64()?;
        let index = arms
            .binary_search_by_key(&discriminator, |(id, _)| *id)
            .map_err(|_| EvocodeError::malformed(format!("unknown union discriminator {discriminator}")))?;
        match &arms[index].1 {
            Arm::Read(reader) => reader.read(input),
            Arm::Skip(skipper) => {
                skipper.skip(input)?;
                Ok(None)
            }
        }
    })
}

/// Union source, union target: cases are matched by discriminator.
pub fn union_reader<T: Evolve>(
    factory: &UnionFactory<T>,
    source: &Schema,
    cx: &mut BuildCx<'_>,
) -> Result<Reader<Option<T>>> {
    let mut arms = Vec::with_capacity(source.members().len());
    for member in source.members() {
        let arm = match factory.case_for(member.id) {
            Some(case) => Arm::Read((case.bind)(&member.schema, cx)?.map(Some)),
            None => Arm::Skip(cx.skipper(&member.schema)?),
        };
        arms.push((u64::from(member.id), arm));
    }
    debug!(target_type = %TypeKey::of::<T>(), %source, cases = arms.len(), "synthesized union converter");
    Ok(dispatch(source, arms))
}

/// Record source, union target: the record is read as the case whose own schema has the
/// same shape. Without such a case the record is skipped.
pub fn record_to_union<T: Evolve>(
    factory: &UnionFactory<T>,
    source: &Schema,
    cx: &mut BuildCx<'_>,
) -> Result<Reader<Option<T>>> {
    let wanted = source.with_nullable(false);
    let schemas = cx.schemas().clone();
    let matching = factory.cases().iter().find(|case| {
        (case.schema_of)(&schemas)
            .map(|schema| schema.with_nullable(false) == wanted)
            .unwrap_or(false)
    });
    let Some(case) = matching else {
        debug!(target_type = %TypeKey::of::<T>(), %source, "no union case matches the record, value will be skipped");
        return cx.skip_as_none::<T>(source);
    };
    let read = (case.bind)(&wanted, cx)?;
    let nullable = source.is_nullable();
    Ok(Reader::new(move |input| {
        if nullable && input.read_null_marker()? {
            return Ok(None);
        }
        read.read(input).map(Some)
    }))
}

/// Union source, record target: record-shaped cases are converted to the target; every other
/// case is skipped.
pub fn union_to_record<T: Evolve>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<T>>> {
    let mut arms = Vec::with_capacity(source.members().len());
    for member in source.members() {
        let arm = if member.schema.kind() == SchemaKind::Record {
            Arm::Read(cx.nullable::<T>(&member.schema)?)
        } else {
            Arm::Skip(cx.skipper(&member.schema)?)
        };
        arms.push((u64::from(member.id), arm));
    }
    Ok(dispatch(source, arms))
}
