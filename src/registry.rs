//! The type registration seam.
//!
//! Named types (records, unions, C-like enums) describe themselves to the engine by filling a
//! [`TypeRegistry`] before the façade is built. The registry maps a stable [`TypeKey`] to
//! type-erased closures:
//!
//! | Registration | Purpose |
//! |---|---|
//! | [`TypeRegistry::add_member_type`] | one member of a record/union and its type |
//! | [`TypeRegistry::add_reader_factory`] | how to assemble a value from members ([`RecordFactory`]) or cases ([`UnionFactory`]) |
//! | [`TypeRegistry::add_writer`] | writes the members of a value |
//! | [`TypeRegistry::add_default_value_getter`] | value used when the type is absent or null |
//! | [`TypeRegistry::add_enum_data`] | C-like enums carried as an integer |
//! | [`TypeRegistry::add_schema`] | a fixed, hand-built schema |
//! | [`TypeRegistry::add_deserializer`] / [`TypeRegistry::add_nullable_deserializer`] | readers used when the stored schema is exactly the type's own |
//!
//! The derive macro and [`crate::evolve_named!`] produce these calls; writing them by hand is
//! equally supported. Inconsistent registrations are recorded and reported as one
//! [`EvocodeError::Schema`] when the façade is built.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::codec::{Input, Output};
use crate::defaults::DefaultFn;
use crate::engine::{BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::schema::{Schema, SchemaKind};
use crate::schema_by_type::{SchemaByType, SchemaCx};

/// Builds the schema of one type.
pub type SchemaFn = fn(&mut SchemaCx<'_>) -> Result<Schema>;

/// Writes a present value of `T`.
pub type WriteFn<T> = Box<dyn Fn(&T, &mut Output<'_>) -> Result<()> + Send + Sync>;

/// Writes a possibly-null value of `T`.
pub type NullableWriteFn<T> = Box<dyn Fn(Option<&T>, &mut Output<'_>) -> Result<()> + Send + Sync>;

/// Reads one member from the input into a partially built value.
pub type Setter<T> = Box<dyn Fn(&mut Input<'_>, &mut T) -> Result<()> + Send + Sync>;

type BindMember<T> = Box<dyn Fn(&Schema, &mut BuildCx<'_>) -> Result<Setter<T>> + Send + Sync>;
type BindCase<T> = Box<dyn Fn(&Schema, &mut BuildCx<'_>) -> Result<Reader<T>> + Send + Sync>;
type BindEnum<T> = Box<dyn Fn(&Schema, &mut BuildCx<'_>) -> Result<Reader<Option<T>>> + Send + Sync>;

/// Stable identifier of a Rust type. The name is informational only.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name, for messages.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Binds record member IDs to fields of `T`.
///
/// ```rust
/// use evocode::registry::RecordFactory;
///
/// #[derive(Default)]
/// struct Point { x: i32, y: i32 }
///
/// let factory = RecordFactory::<Point>::new()
///     .member(1, |p| &mut p.x)
///     .member(2, |p| &mut p.y);
/// assert_eq!(factory.ids(), vec![1, 2]);
/// ```
pub struct RecordFactory<T> {
    members: Vec<(u32, BindMember<T>)>,
}

impl<T: Send + Sync + 'static> RecordFactory<T> {
    /// Creates a factory with no members.
    pub fn new() -> Self {
        Self { members: Vec::new() }
    }

    /// Binds member `id` to the field returned by `field`.
    pub fn member<M: Evolve>(mut self, id: u32, field: fn(&mut T) -> &mut M) -> Self {
        let bind: BindMember<T> = Box::new(move |source, cx| {
            let read = cx.reader::<M>(source)?;
            let set: Setter<T> = Box::new(move |input, target| {
                *field(target) = read.read(input)?;
                Ok(())
            });
            Ok(set)
        });
        self.members.push((id, bind));
        self
    }

    /// Bound member IDs, in binding order.
    pub fn ids(&self) -> Vec<u32> {
        self.members.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn bind(&self, id: u32, source: &Schema, cx: &mut BuildCx<'_>) -> Option<Result<Setter<T>>> {
        self.members
            .iter()
            .find(|(member, _)| *member == id)
            .map(|(_, bind)| bind(source, cx))
    }
}

impl<T: Send + Sync + 'static> Default for RecordFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct UnionCase<T> {
    pub(crate) id: u32,
    pub(crate) schema_of: fn(&SchemaByType) -> Result<Schema>,
    pub(crate) bind: BindCase<T>,
}

/// Binds union member IDs (discriminators) to case constructors of `T`.
pub struct UnionFactory<T> {
    cases: Vec<UnionCase<T>>,
}

impl<T: Send + Sync + 'static> UnionFactory<T> {
    /// Creates a factory with no cases.
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Binds discriminator `id` to a case carrying a `C`.
    pub fn case<C: Evolve>(mut self, id: u32, make: fn(C) -> T) -> Self {
        let bind: BindCase<T> = Box::new(move |source, cx| Ok(cx.reader::<C>(source)?.map(make)));
        self.cases.push(UnionCase {
            id,
            schema_of: SchemaByType::get::<C>,
            bind,
        });
        self
    }

    /// Bound discriminators, in binding order.
    pub fn ids(&self) -> Vec<u32> {
        self.cases.iter().map(|c| c.id).collect()
    }

    pub(crate) fn case_for(&self, id: u32) -> Option<&UnionCase<T>> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub(crate) fn cases(&self) -> &[UnionCase<T>] {
        &self.cases
    }
}

impl<T: Send + Sync + 'static> Default for UnionFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a named type is assembled when read.
pub enum ReaderFactory<T> {
    /// Member-by-member construction.
    Record(RecordFactory<T>),
    /// One constructor per discriminator.
    Union(UnionFactory<T>),
}

impl<T> ReaderFactory<T> {
    fn kind(&self) -> SchemaKind {
        match self {
            Self::Record(_) => SchemaKind::Record,
            Self::Union(_) => SchemaKind::Union,
        }
    }

    fn bound_ids(&self) -> Vec<u32>
    where
        T: Send + Sync + 'static,
    {
        match self {
            Self::Record(f) => f.ids(),
            Self::Union(f) => f.ids(),
        }
    }
}

pub(crate) struct EnumData<T> {
    pub(crate) bind: BindEnum<T>,
}

/// Implemented by named types that can fill a registry with their own registrations.
///
/// Registering a type also registers the types of its members.
pub trait Register {
    /// Adds this type's registrations.
    fn register(types: &mut TypeRegistry);
}

type Erased = Box<dyn Any + Send + Sync>;

/// How the schema of a registered type is obtained.
pub(crate) enum Shape<'a> {
    Explicit(&'a Schema),
    Enum(SchemaFn),
    Members(SchemaKind, &'a [(u32, SchemaFn)]),
}

struct TypeEntry {
    key: TypeKey,
    schema_fn: SchemaFn,
    schema: Option<Schema>,
    members: Vec<(u32, SchemaFn)>,
    shape_kind: Option<SchemaKind>,
    bound_ids: Vec<u32>,
    enum_schema: Option<SchemaFn>,
    writer: Option<Erased>,
    nullable_writer: Option<Erased>,
    deserializer: Option<Erased>,
    nullable_deserializer: Option<Erased>,
    factory: Option<Erased>,
    enum_data: Option<Erased>,
    default_getter: Option<Erased>,
}

impl TypeEntry {
    fn new<T: Evolve>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            schema_fn: T::schema,
            schema: None,
            members: Vec::new(),
            shape_kind: None,
            bound_ids: Vec::new(),
            enum_schema: None,
            writer: None,
            nullable_writer: None,
            deserializer: None,
            nullable_deserializer: None,
            factory: None,
            enum_data: None,
            default_getter: None,
        }
    }
}

/// Registrations of every named type known to one façade.
#[derive(Default)]
pub struct TypeRegistry {
    entries: HashMap<TypeKey, TypeEntry>,
    order: Vec<TypeKey>,
    errors: Vec<String>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.order.iter().map(|k| k.name()).collect::<Vec<_>>())
            .field("errors", &self.errors)
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `T` as registered. Returns false if it already was.
    ///
    /// Generated registration code calls this first so that cyclic type graphs terminate.
    pub fn begin<T: Evolve>(&mut self) -> bool {
        if self.contains::<T>() {
            return false;
        }
        self.entry::<T>();
        true
    }

    /// True if `T` has any registration.
    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeKey::of::<T>())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry<T: Evolve>(&mut self) -> &mut TypeEntry {
        let key = TypeKey::of::<T>();
        if !self.entries.contains_key(&key) {
            self.order.push(key);
        }
        self.entries.entry(key).or_insert_with(TypeEntry::new::<T>)
    }

    fn conflict(&mut self, what: &str, key: TypeKey) {
        self.errors.push(format!("{what} for type {key} registered twice"));
    }

    /// Registers a fixed schema for `T`.
    pub fn add_schema<T: Evolve>(&mut self, schema: Schema) {
        let entry = self.entry::<T>();
        if entry.schema.replace(schema).is_some() {
            let key = entry.key;
            self.conflict("schema", key);
        }
    }

    /// Registers the writer of `T`. A sentinel-style nullable writer is derived from it
    /// unless one is registered explicitly.
    pub fn add_writer<T: Evolve>(&mut self, writer: impl Fn(&T, &mut Output<'_>) -> Result<()> + Send + Sync + 'static) {
        let entry = self.entry::<T>();
        let boxed: WriteFn<T> = Box::new(writer);
        if entry.writer.replace(Box::new(boxed)).is_some() {
            let key = entry.key;
            self.conflict("writer", key);
            return;
        }
        if entry.nullable_writer.is_none() {
            let nullable: NullableWriteFn<T> = Box::new(|value: Option<&T>, out: &mut Output<'_>| match value {
                None => {
                    out.write_null_marker(true);
                    Ok(())
                }
                Some(v) => {
                    out.write_null_marker(false);
                    out.write_named(v)
                }
            });
            entry.nullable_writer = Some(Box::new(nullable));
        }
    }

    /// Registers the writer used for possibly-null values of `T`.
    pub fn add_nullable_writer<T: Evolve>(
        &mut self,
        writer: impl Fn(Option<&T>, &mut Output<'_>) -> Result<()> + Send + Sync + 'static,
    ) {
        let boxed: NullableWriteFn<T> = Box::new(writer);
        self.entry::<T>().nullable_writer = Some(Box::new(boxed));
    }

    /// Registers a reader for payloads whose schema is exactly `T`'s own, non-nullable.
    pub fn add_deserializer<T: Evolve>(&mut self, reader: Reader<T>) {
        let entry = self.entry::<T>();
        if entry.deserializer.replace(Box::new(reader)).is_some() {
            let key = entry.key;
            self.conflict("deserializer", key);
        }
    }

    /// Registers a reader for payloads whose schema is exactly `T`'s own, nullable.
    pub fn add_nullable_deserializer<T: Evolve>(&mut self, reader: Reader<Option<T>>) {
        let entry = self.entry::<T>();
        if entry.nullable_deserializer.replace(Box::new(reader)).is_some() {
            let key = entry.key;
            self.conflict("nullable deserializer", key);
        }
    }

    /// Registers how `T` is assembled from members or cases.
    pub fn add_reader_factory<T: Evolve>(&mut self, factory: ReaderFactory<T>) {
        let entry = self.entry::<T>();
        entry.shape_kind = Some(factory.kind());
        entry.bound_ids = factory.bound_ids();
        if entry.factory.replace(Box::new(factory)).is_some() {
            let key = entry.key;
            self.conflict("reader factory", key);
        }
    }

    /// Registers the value used when `T` is absent.
    pub fn add_default_value_getter<T: Evolve>(&mut self, getter: impl Fn() -> T + Send + Sync + 'static) {
        let entry = self.entry::<T>();
        let getter: DefaultFn<T> = Arc::new(getter);
        if entry.default_getter.replace(Box::new(getter)).is_some() {
            let key = entry.key;
            self.conflict("default value getter", key);
        }
    }

    /// Declares member `id` of `Owner` to have type `M`, and registers `M`.
    pub fn add_member_type<Owner: Evolve, M: Evolve>(&mut self, id: u32) {
        let entry = self.entry::<Owner>();
        if entry.members.iter().any(|(existing, _)| *existing == id) {
            let key = entry.key;
            self.errors.push(format!("duplicate member id {id} on type {key}"));
        } else {
            entry.members.push((id, M::schema));
        }
        M::register_types(self);
    }

    /// Declares `E` to be carried on the wire as its underlying integer type `U`.
    ///
    /// `to` extracts the underlying value; `from` maps any underlying value back, including
    /// values unknown to this version of `E`.
    pub fn add_enum_data<E: Evolve, U: Evolve>(&mut self, to: fn(&E) -> U, from: fn(U) -> E) {
        let writer: WriteFn<E> = Box::new(move |value, out| to(value).write(out));
        let nullable: NullableWriteFn<E> = Box::new(move |value, out| U::write_nullable(value.map(to).as_ref(), out));
        let data = EnumData::<E> {
            bind: Box::new(move |source, cx| Ok(cx.nullable::<U>(source)?.map(move |v| v.map(from)))),
        };
        let entry = self.entry::<E>();
        entry.enum_schema = Some(U::schema);
        let duplicate = entry.enum_data.replace(Box::new(data)).is_some();
        entry.writer = Some(Box::new(writer));
        entry.nullable_writer = Some(Box::new(nullable));
        if duplicate {
            let key = entry.key;
            self.conflict("enum data", key);
        }
        U::register_types(self);
    }

    /// Validates the registrations. Called when the façade is built.
    pub fn check(&self) -> Result<()> {
        let mut errors = self.errors.clone();
        for key in &self.order {
            let Some(entry) = self.entries.get(key) else { continue };
            let has_shape = entry.schema.is_some() || entry.enum_schema.is_some() || entry.shape_kind.is_some();
            if !has_shape {
                errors.push(format!("no schema for type {key}"));
            }
            if entry.shape_kind.is_none() && !entry.members.is_empty() {
                errors.push(format!("type {key} declares members but has no reader factory"));
            }
            for id in &entry.bound_ids {
                if !entry.members.iter().any(|(member, _)| member == id) {
                    errors.push(format!("member id {id} of type {key} is bound but has no member type"));
                }
            }
            if entry.writer.is_none() {
                errors.push(format!("no writer registered for type {key}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EvocodeError::schema(errors.join("; ")))
        }
    }

    /// Schema builders of every registered type, in registration order.
    pub(crate) fn schema_fns(&self) -> Vec<SchemaFn> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| entry.schema_fn)
            .collect()
    }

    pub(crate) fn shape(&self, key: &TypeKey) -> Option<Shape<'_>> {
        let entry = self.entries.get(key)?;
        if let Some(schema) = &entry.schema {
            return Some(Shape::Explicit(schema));
        }
        if let Some(f) = entry.enum_schema {
            return Some(Shape::Enum(f));
        }
        entry.shape_kind.map(|kind| Shape::Members(kind, &entry.members[..]))
    }

    fn erased<T: 'static, V: 'static>(&self, pick: fn(&TypeEntry) -> &Option<Erased>) -> Option<&V> {
        self.entries
            .get(&TypeKey::of::<T>())
            .and_then(|entry| pick(entry).as_ref())
            .and_then(|boxed| boxed.downcast_ref::<V>())
    }

    /// The writer registered for `T`.
    pub fn writer<T: Evolve>(&self) -> Result<&WriteFn<T>> {
        self.erased::<T, WriteFn<T>>(|e| &e.writer)
            .ok_or_else(|| EvocodeError::schema(format!("no writer registered for type {}", TypeKey::of::<T>())))
    }

    /// The nullable writer registered for `T`.
    pub fn nullable_writer<T: Evolve>(&self) -> Result<&NullableWriteFn<T>> {
        self.erased::<T, NullableWriteFn<T>>(|e| &e.nullable_writer)
            .ok_or_else(|| EvocodeError::schema(format!("no writer registered for type {}", TypeKey::of::<T>())))
    }

    pub(crate) fn deserializer<T: Evolve>(&self) -> Option<&Reader<T>> {
        self.erased::<T, Reader<T>>(|e| &e.deserializer)
    }

    pub(crate) fn nullable_deserializer<T: Evolve>(&self) -> Option<&Reader<Option<T>>> {
        self.erased::<T, Reader<Option<T>>>(|e| &e.nullable_deserializer)
    }

    pub(crate) fn factory<T: Evolve>(&self) -> Option<&ReaderFactory<T>> {
        self.erased::<T, ReaderFactory<T>>(|e| &e.factory)
    }

    pub(crate) fn enum_data<T: Evolve>(&self) -> Option<&EnumData<T>> {
        self.erased::<T, EnumData<T>>(|e| &e.enum_data)
    }

    pub(crate) fn default_getter<T: Evolve>(&self) -> Option<DefaultFn<T>> {
        self.erased::<T, DefaultFn<T>>(|e| &e.default_getter).cloned()
    }
}
