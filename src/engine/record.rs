//! Readers for named types: records, unions and C-like enums.
//!
//! A record converter is a plan with one step per *source* member, in member-ID order:
//! members the target binds are read into the value, members it does not know are skipped.
//! Target members the source lacks keep the value they have in the target's default.
//! Consecutive skips are grouped so the common "one to three unknown members" cases avoid a
//! loop.

use tracing::debug;

use crate::codec::Input;
use crate::engine::{union, BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::{ReaderFactory, RecordFactory, Setter, TypeKey};
use crate::schema::{Schema, SchemaKind};
use crate::skipper::Skipper;

enum SkipRun {
    One(Skipper),
    Two(Skipper, Skipper),
    Three(Skipper, Skipper, Skipper),
    Many(Vec<Skipper>),
}

impl SkipRun {
    fn push(self, next: Skipper) -> Self {
        match self {
            Self::One(a) => Self::Two(a, next),
            Self::Two(a, b) => Self::Three(a, b, next),
            Self::Three(a, b, c) => Self::Many(vec![a, b, c, next]),
            Self::Many(mut all) => {
                all.push(next);
                Self::Many(all)
            }
        }
    }

    #[inline]
    fn skip(&self, input: &mut Input<'_>) -> Result<()> {
        match self {
            Self::One(a) => a.skip(input),
            Self::Two(a, b) => {
                a.skip(input)?;
                b.skip(input)
            }
            Self::Three(a, b, c) => {
                a.skip(input)?;
                b.skip(input)?;
                c.skip(input)
            }
            Self::Many(all) => all.iter().try_for_each(|s| s.skip(input)),
        }
    }
}

enum Step<T> {
    Read(Setter<T>),
    Skip(SkipRun),
}

/// Reader of a named type `T` from any source schema.
///
/// Resolution order: a registered exact-schema deserializer, enum data, then the registered
/// reader factory. A source whose kind the factory cannot consume is skipped.
pub fn named_reader<T: Evolve>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<T>>> {
    let types = cx.types().clone();

    if let Some(reader) = exact_reader::<T>(source, cx)? {
        return Ok(reader);
    }
    if let Some(data) = types.enum_data::<T>() {
        return (data.bind)(source, cx);
    }
    match (types.factory::<T>(), source.kind()) {
        (Some(ReaderFactory::Record(factory)), SchemaKind::Record) => record_reader(factory, source, cx),
        (Some(ReaderFactory::Record(_)), SchemaKind::Union) => union::union_to_record::<T>(source, cx),
        (Some(ReaderFactory::Union(factory)), SchemaKind::Union) => union::union_reader(factory, source, cx),
        (Some(ReaderFactory::Union(factory)), SchemaKind::Record) => union::record_to_union(factory, source, cx),
        (Some(_), _) => {
            debug!(target_type = %TypeKey::of::<T>(), %source, "incompatible source kind, value will be skipped");
            cx.skip_as_none::<T>(source)
        }
        (None, _) => Err(EvocodeError::schema(format!(
            "no reader registered for type {}",
            TypeKey::of::<T>()
        ))),
    }
}

fn exact_reader<T: Evolve>(source: &Schema, cx: &BuildCx<'_>) -> Result<Option<Reader<Option<T>>>> {
    let types = cx.types();
    let (plain, nullable) = (types.deserializer::<T>(), types.nullable_deserializer::<T>());
    if plain.is_none() && nullable.is_none() {
        return Ok(None);
    }
    let own = cx.schema_of::<T>()?;
    if source.with_nullable(false) != own.with_nullable(false) {
        return Ok(None);
    }
    Ok(match (source.is_nullable(), plain, nullable) {
        (true, _, Some(reader)) => Some(reader.clone()),
        (false, Some(reader), _) => Some(reader.clone().map(Some)),
        _ => None,
    })
}

fn record_reader<T: Evolve>(
    factory: &RecordFactory<T>,
    source: &Schema,
    cx: &mut BuildCx<'_>,
) -> Result<Reader<Option<T>>> {
    let mut steps: Vec<Step<T>> = Vec::with_capacity(source.members().len());
    let (mut read, mut skipped) = (0usize, 0usize);
    for member in source.members() {
        if let Some(setter) = factory.bind(member.id, &member.schema, cx) {
            steps.push(Step::Read(setter?));
            read += 1;
            continue;
        }
        let skipper = cx.skipper(&member.schema)?;
        skipped += 1;
        match steps.pop() {
            Some(Step::Skip(run)) => steps.push(Step::Skip(run.push(skipper))),
            Some(other) => {
                steps.push(other);
                steps.push(Step::Skip(SkipRun::One(skipper)));
            }
            None => steps.push(Step::Skip(SkipRun::One(skipper))),
        }
    }
    debug!(
        target_type = %TypeKey::of::<T>(),
        %source,
        read,
        skipped,
        defaulted = factory.ids().len().saturating_sub(read),
        "synthesized record converter"
    );

    let default = cx.default_fn::<T>()?;
    let nullable = source.is_nullable();
    Ok(Reader::new(move |input| {
        if nullable && input.read_null_marker()? {
            return Ok(None);
        }
        let mut value = default();
        for step in &steps {
            match step {
                Step::Read(set) => set(input, &mut value)?,
                Step::Skip(run) => run.skip(input)?,
            }
        }
        Ok(Some(value))
    }))
}
