//! Cache from Rust types to their schemas.
//!
//! Named types are resolved once, when the façade is built: this is the only time new
//! contents nodes are created. Types that reference each other (or themselves) get a pending
//! contents node that is shared by every reference and completed when the outermost type
//! finishes. Composite types (`Vec<T>`, `Option<T>`, tuples, maps) are built on demand from
//! the cached schemas of their elements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::{Shape, TypeKey, TypeRegistry};
use crate::schema::{Contents, Schema, SchemaKind, SchemaMember};

/// Cache key of a schema: a type and whether it is used as nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotatedType {
    /// The type.
    pub key: TypeKey,
    /// True for `Option<key>`.
    pub nullable: bool,
}

impl AnnotatedType {
    /// Creates a key.
    pub fn new(key: TypeKey, nullable: bool) -> Self {
        Self { key, nullable }
    }
}

/// Thread-safe `AnnotatedType -> Schema` store.
pub struct SchemaByType {
    types: Arc<TypeRegistry>,
    cache: DashMap<AnnotatedType, Schema>,
    unit: Schema,
}

impl fmt::Debug for SchemaByType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaByType").field("cached", &self.cache.len()).finish()
    }
}

impl SchemaByType {
    /// Creates a store over `types`.
    pub fn new(types: Arc<TypeRegistry>) -> Result<Self> {
        Ok(Self {
            types,
            cache: DashMap::new(),
            unit: Schema::record(Contents::new(Vec::new())?),
        })
    }

    /// The shared empty record, schema of `()`.
    pub fn unit(&self) -> &Schema {
        &self.unit
    }

    /// Schema of `T`. Named types must have been resolved by [`Self::build_registered`].
    pub fn get<T: Evolve>(&self) -> Result<Schema> {
        SchemaCx::new(self, false).schema_of::<T>()
    }

    /// Resolves every registered type and returns the schemas that must be persisted: the
    /// shared empty record followed by every registered type's schema.
    pub fn build_registered(&self) -> Result<Vec<Schema>> {
        let mut cx = SchemaCx::new(self, true);
        let mut roots = vec![self.unit.clone()];
        for schema_fn in self.types.schema_fns() {
            roots.push(schema_fn(&mut cx)?);
        }
        if let Some(key) = cx.pending.keys().next() {
            return Err(EvocodeError::Internal(format!("schema of {key} left incomplete")));
        }
        Ok(roots)
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Schema construction context handed to [`Evolve::schema`].
pub struct SchemaCx<'a> {
    store: &'a SchemaByType,
    pending: HashMap<TypeKey, (SchemaKind, Arc<Contents>)>,
    allow_new: bool,
}

impl<'a> SchemaCx<'a> {
    fn new(store: &'a SchemaByType, allow_new: bool) -> Self {
        Self {
            store,
            pending: HashMap::new(),
            allow_new,
        }
    }

    /// Schema of `T`, cached.
    pub fn schema_of<T: Evolve>(&mut self) -> Result<Schema> {
        let key = T::annotated();
        if let Some(hit) = self.store.cache.get(&key).map(|s| s.clone()) {
            return Ok(hit);
        }
        let schema = T::schema(self)?;
        Ok(self.store.cache.entry(key).or_insert(schema).clone())
    }

    /// The shared empty record.
    pub fn unit(&self) -> Schema {
        self.store.unit.clone()
    }

    /// Schema of a registered named type.
    pub fn named<T: Evolve>(&mut self) -> Result<Schema> {
        let key = TypeKey::of::<T>();
        let annotated = AnnotatedType::new(key, false);
        if let Some(hit) = self.store.cache.get(&annotated).map(|s| s.clone()) {
            return Ok(hit);
        }
        if let Some((kind, contents)) = self.pending.get(&key) {
            return Ok(with_contents(*kind, contents.clone()));
        }
        let types = self.store.types.clone();
        let shape = match (self.allow_new, types.shape(&key)) {
            (true, Some(shape)) => shape,
            _ => return Err(EvocodeError::schema(format!("no schema for type {key}"))),
        };
        let schema = match shape {
            Shape::Explicit(schema) => schema.clone(),
            Shape::Enum(schema_fn) => schema_fn(self)?,
            Shape::Members(kind, members) => {
                let contents = Contents::pending();
                self.pending.insert(key, (kind, contents.clone()));
                let mut built = Vec::with_capacity(members.len());
                for (id, schema_fn) in members {
                    built.push(SchemaMember::new(*id, schema_fn(self)?));
                }
                self.pending.remove(&key);
                contents.set_members(built)?;
                with_contents(kind, contents)
            }
        };
        Ok(self.store.cache.entry(annotated).or_insert(schema).clone())
    }
}

fn with_contents(kind: SchemaKind, contents: Arc<Contents>) -> Schema {
    if kind == SchemaKind::Union {
        Schema::union(contents)
    } else {
        Schema::record(contents)
    }
}
