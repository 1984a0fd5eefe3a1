// src/engine/mod.rs

//! The deserializer store and conversion engine.
//!
//! A [`Reader<T>`] reads one value of `T` from data written under some *source* schema. The
//! engine synthesizes readers on demand and memoizes them per `(source schema, type)`:
//!
//! * identical native kinds read directly, other native kinds go through a bridge value
//!   ([`bridge`]);
//! * records are matched member by member, skipping source members the target lacks and
//!   leaving defaults in target members the source lacks ([`record`]);
//! * unions dispatch on the discriminator ([`union`]);
//! * collections convert element by element.
//!
//! ## Cycles
//!
//! A reader for a recursive type needs itself. While a key is being built it owns a pending
//! slot; re-entrant requests for that key get a deferred reader that forwards to whatever ends
//! up in the slot. Readers built during one top-level request are published to the shared
//! cache only once that request succeeds, and the first published reader for a key wins.

pub mod bridge;
pub mod record;
pub mod union;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::trace;

use crate::codec::Input;
use crate::defaults::{DefaultFn, DefaultValues};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::{TypeKey, TypeRegistry};
use crate::schema::{Schema, SchemaKind};
use crate::schema_by_type::SchemaByType;
use crate::skipper::{Skipper, SkipperStore};

type ReadFn<T> = dyn Fn(&mut Input<'_>) -> Result<T> + Send + Sync;

/// Reads one `T` from an input positioned at a value of the reader's source schema.
pub struct Reader<T>(Arc<ReadFn<T>>);

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reader<{}>", std::any::type_name::<T>())
    }
}

impl<T: 'static> Reader<T> {
    /// Wraps a read function.
    pub fn new(f: impl Fn(&mut Input<'_>) -> Result<T> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Reads one value.
    #[inline]
    pub fn read(&self, input: &mut Input<'_>) -> Result<T> {
        (self.0)(input)
    }

    /// A reader that applies `f` to every value read.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Reader<U> {
        Reader::new(move |input| self.read(input).map(&f))
    }

    /// True if both handles share one read function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Memo key: source schema, target type, and whether null is replaced by the default.
type ReaderKey = (Schema, TypeId, bool);

type Published = Box<dyn Any + Send + Sync>;

/// The deserializer store.
pub struct Engine {
    types: Arc<TypeRegistry>,
    schemas: Arc<SchemaByType>,
    defaults: DefaultValues,
    skippers: SkipperStore,
    readers: DashMap<ReaderKey, Published>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("types", &self.types.len())
            .field("readers", &self.readers.len())
            .field("skippers", &self.skippers)
            .finish()
    }
}

impl Engine {
    /// Creates an empty store over the registered types and their schemas.
    pub fn new(types: Arc<TypeRegistry>, schemas: Arc<SchemaByType>) -> Self {
        Self {
            defaults: DefaultValues::new(types.clone()),
            types,
            schemas,
            skippers: SkipperStore::new(),
            readers: DashMap::new(),
        }
    }

    /// The registered types.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// The schema-by-type store.
    pub fn schemas(&self) -> &Arc<SchemaByType> {
        &self.schemas
    }

    /// The default-value factory.
    pub fn defaults(&self) -> &DefaultValues {
        &self.defaults
    }

    /// Reader of `T` from data of schema `source`. Null values read as `T`'s default.
    ///
    /// Every call with an equal schema returns the same cached reader.
    pub fn reader<T: Evolve>(&self, source: &Schema) -> Result<Reader<T>> {
        let key = (source.clone(), TypeId::of::<T>(), true);
        if let Some(hit) = lookup::<Reader<T>>(&self.readers, &key)? {
            return Ok(hit);
        }
        let mut cx = BuildCx::new(self);
        cx.reader::<T>(source)?;
        let finished = std::mem::take(&mut cx.finished);
        trace!(target_type = %TypeKey::of::<T>(), %source, built = finished.len(), "publishing readers");
        for (key, reader) in finished {
            self.readers.entry(key).or_insert(reader);
        }
        lookup::<Reader<T>>(&self.readers, &key)?
            .ok_or_else(|| EvocodeError::Internal(format!("reader for {} was not published", TypeKey::of::<T>())))
    }

    /// Skipper for `schema`.
    pub fn skipper(&self, schema: &Schema) -> Result<Skipper> {
        self.skippers.get(schema)
    }

    /// A fresh default value of `T`.
    pub fn default_value<T: Evolve>(&self) -> Result<T> {
        Ok((self.defaults.get::<T>()?)())
    }

    /// Number of cached readers.
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// True if no reader has been built yet.
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

fn lookup<R: Clone + 'static>(readers: &DashMap<ReaderKey, Published>, key: &ReaderKey) -> Result<Option<R>> {
    match readers.get(key) {
        None => Ok(None),
        Some(entry) => entry
            .downcast_ref::<R>()
            .cloned()
            .map(Some)
            .ok_or_else(|| EvocodeError::Internal("reader cache holds a foreign type".to_string())),
    }
}

/// Reader construction context handed to [`Evolve::nullable_reader`] and [`Evolve::reader`].
pub struct BuildCx<'a> {
    engine: &'a Engine,
    pending: HashMap<ReaderKey, Box<dyn Any>>,
    finished: HashMap<ReaderKey, Published>,
}

impl<'a> BuildCx<'a> {
    fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            pending: HashMap::new(),
            finished: HashMap::new(),
        }
    }

    /// The registered types.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.engine.types
    }

    /// The schema-by-type store.
    pub fn schemas(&self) -> &Arc<SchemaByType> {
        &self.engine.schemas
    }

    /// Schema of `T`.
    pub fn schema_of<T: Evolve>(&self) -> Result<Schema> {
        self.engine.schemas.get::<T>()
    }

    /// Default-value function of `T`.
    pub fn default_fn<T: Evolve>(&self) -> Result<DefaultFn<T>> {
        self.engine.defaults.get::<T>()
    }

    /// Skipper for `schema`.
    pub fn skipper(&self, schema: &Schema) -> Result<Skipper> {
        self.engine.skippers.get(schema)
    }

    /// A reader that skips a value of `source` and yields `None`.
    pub fn skip_as_none<T: 'static>(&self, source: &Schema) -> Result<Reader<Option<T>>> {
        let skipper = self.skipper(source)?;
        Ok(Reader::new(move |input| {
            skipper.skip(input)?;
            Ok(None)
        }))
    }

    /// Reader of `Option<T>` from `source`; null reads as `None`.
    pub fn nullable<T: Evolve>(&mut self, source: &Schema) -> Result<Reader<Option<T>>> {
        self.memo((source.clone(), TypeId::of::<T>(), false), |cx| T::nullable_reader(source, cx))
    }

    /// Reader of `T` from `source`; null reads as `T`'s default.
    pub fn reader<T: Evolve>(&mut self, source: &Schema) -> Result<Reader<T>> {
        self.memo((source.clone(), TypeId::of::<T>(), true), |cx| T::reader(source, cx))
    }

    fn memo<O: 'static>(
        &mut self,
        key: ReaderKey,
        build: impl FnOnce(&mut Self) -> Result<Reader<O>>,
    ) -> Result<Reader<O>> {
        if let Some(hit) = lookup::<Reader<O>>(&self.engine.readers, &key)? {
            return Ok(hit);
        }
        if let Some(hit) = self.finished.get(&key) {
            return hit
                .downcast_ref::<Reader<O>>()
                .cloned()
                .ok_or_else(|| EvocodeError::Internal("reader cache holds a foreign type".to_string()));
        }
        if let Some(slot) = self.pending.get(&key) {
            let slot = slot
                .downcast_ref::<Arc<OnceLock<Reader<O>>>>()
                .cloned()
                .ok_or_else(|| EvocodeError::Internal("pending reader slot holds a foreign type".to_string()))?;
            return Ok(Reader::new(move |input| match slot.get() {
                Some(reader) => reader.read(input),
                None => Err(EvocodeError::Internal("reader used before construction".to_string())),
            }));
        }

        let slot: Arc<OnceLock<Reader<O>>> = Arc::new(OnceLock::new());
        self.pending.insert(key.clone(), Box::new(slot.clone()));
        let built = build(self);
        self.pending.remove(&key);
        let reader = built?;
        let _ = slot.set(reader.clone());
        self.finished.insert(key, Box::new(reader.clone()));
        Ok(reader)
    }
}

impl fmt::Debug for BuildCx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildCx")
            .field("pending", &self.pending.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}

// --- COLLECTION READERS ---

/// Element schema of a sequence source: arrays yield their element, dictionaries yield
/// `(key, value)` pairs. Other kinds are not sequences.
fn element_schema(source: &Schema) -> Option<Schema> {
    match source.kind() {
        SchemaKind::Array => source.inner().first().cloned(),
        SchemaKind::Dictionary => match source.inner() {
            [key, value] => Some(Schema::tuple2(key.clone(), value.clone())),
            _ => None,
        },
        _ => None,
    }
}

/// Reader of any collection of `E` from an array or dictionary source.
pub fn sequence_reader<E, C>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<C>>>
where
    E: Evolve,
    C: FromIterator<E> + 'static,
{
    let Some(element) = element_schema(source) else {
        return cx.skip_as_none::<C>(source);
    };
    let read = cx.reader::<E>(&element)?;
    let nullable = source.is_nullable();
    Ok(Reader::new(move |input| {
        let Some(count) = input.read_count(nullable)? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(input.bounded_capacity(count));
        for _ in 0..count {
            items.push(read.read(input)?);
        }
        Ok(Some(items.into_iter().collect()))
    }))
}

enum Slot<T: 'static> {
    Read(Reader<T>),
    Default(DefaultFn<T>),
}

impl<T: 'static> Slot<T> {
    fn bind(source: Option<&Schema>, cx: &mut BuildCx<'_>) -> Result<Self>
    where
        T: Evolve,
    {
        Ok(match source {
            Some(schema) => Self::Read(cx.reader::<T>(schema)?),
            None => Self::Default(cx.default_fn::<T>()?),
        })
    }

    #[inline]
    fn take(&self, input: &mut Input<'_>) -> Result<T> {
        match self {
            Self::Read(reader) => reader.read(input),
            Self::Default(default) => Ok(default()),
        }
    }
}

fn tuple_source(source: &Schema) -> Option<&[Schema]> {
    matches!(source.kind(), SchemaKind::Tuple2 | SchemaKind::Tuple3).then(|| source.inner())
}

fn extra_skippers(elements: &[Schema], used: usize, cx: &BuildCx<'_>) -> Result<Vec<Skipper>> {
    elements.iter().skip(used).map(|schema| cx.skipper(schema)).collect()
}

/// Reader of a pair from a tuple source. A missing second element takes its default; a
/// third source element is skipped.
pub fn pair_reader<A: Evolve, B: Evolve>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<(A, B)>>> {
    let Some(elements) = tuple_source(source) else {
        return cx.skip_as_none::<(A, B)>(source);
    };
    let a = Slot::<A>::bind(elements.first(), cx)?;
    let b = Slot::<B>::bind(elements.get(1), cx)?;
    let rest = extra_skippers(elements, 2, cx)?;
    let nullable = source.is_nullable();
    Ok(Reader::new(move |input| {
        if nullable && input.read_null_marker()? {
            return Ok(None);
        }
        let value = (a.take(input)?, b.take(input)?);
        rest.iter().try_for_each(|s| s.skip(input))?;
        Ok(Some(value))
    }))
}

/// Reader of a triple from a tuple source. Elements the source lacks take their defaults.
pub fn triple_reader<A: Evolve, B: Evolve, C: Evolve>(
    source: &Schema,
    cx: &mut BuildCx<'_>,
) -> Result<Reader<Option<(A, B, C)>>> {
    let Some(elements) = tuple_source(source) else {
        return cx.skip_as_none::<(A, B, C)>(source);
    };
    let a = Slot::<A>::bind(elements.first(), cx)?;
    let b = Slot::<B>::bind(elements.get(1), cx)?;
    let c = Slot::<C>::bind(elements.get(2), cx)?;
    let nullable = source.is_nullable();
    Ok(Reader::new(move |input| {
        if nullable && input.read_null_marker()? {
            return Ok(None);
        }
        Ok(Some((a.take(input)?, b.take(input)?, c.take(input)?)))
    }))
}
