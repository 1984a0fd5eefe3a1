// src/api.rs

//! The main entry point: [`Evocode`] and its builder.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::{Input, Output};
use crate::engine::{Engine, Reader};
use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::format::{read_header, write_header, Header};
use crate::registry::TypeRegistry;
use crate::schema::{ContentsId, Schema};
use crate::schema_by_type::SchemaByType;
use crate::skipper::Skipper;
use crate::storage::{BlockId, MemoryStorage, SchemaStorage, SchemaVersioning};

/// Tunables of one façade.
///
/// ```rust
/// use evocode::EvocodeOptions;
///
/// let options: EvocodeOptions = serde_json::from_str(r#"{ "init_attempts": 5 }"#).unwrap();
/// assert_eq!(options.init_attempts, 5);
/// assert!(options.raw_integer_headers);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvocodeOptions {
    /// Write bare integers with a one-byte raw header instead of a schema.
    pub raw_integer_headers: bool,
    /// How many times storage initialization is attempted before failing.
    pub init_attempts: u32,
    /// Fail deserialization when bytes remain after the value.
    pub reject_trailing_bytes: bool,
}

impl Default for EvocodeOptions {
    fn default() -> Self {
        Self {
            raw_integer_headers: true,
            init_attempts: 3,
            reject_trailing_bytes: true,
        }
    }
}

/// Collects registrations, storage and options, then builds an [`Evocode`].
#[derive(Debug, Default)]
pub struct EvocodeBuilder {
    types: TypeRegistry,
    storage: Option<Arc<dyn SchemaStorage>>,
    options: EvocodeOptions,
}

impl EvocodeBuilder {
    /// Registers `T` and every named type it is built from.
    pub fn register<T: Evolve>(mut self) -> Self {
        T::register_types(&mut self.types);
        self
    }

    /// The registry, for hand-written registrations.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// Uses `storage` for the schema log. Defaults to a fresh [`MemoryStorage`].
    pub fn storage(mut self, storage: impl SchemaStorage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Replaces all options.
    pub fn options(mut self, options: EvocodeOptions) -> Self {
        self.options = options;
        self
    }

    /// See [`EvocodeOptions::raw_integer_headers`].
    pub fn raw_integer_headers(mut self, enabled: bool) -> Self {
        self.options.raw_integer_headers = enabled;
        self
    }

    /// See [`EvocodeOptions::init_attempts`].
    pub fn init_attempts(mut self, attempts: u32) -> Self {
        self.options.init_attempts = attempts;
        self
    }

    /// See [`EvocodeOptions::reject_trailing_bytes`].
    pub fn reject_trailing_bytes(mut self, enabled: bool) -> Self {
        self.options.reject_trailing_bytes = enabled;
        self
    }

    /// Validates the registrations, resolves every registered schema and synchronizes them
    /// with schema storage.
    ///
    /// This is the only point where new shapes are created and persisted.
    pub fn build(self) -> Result<Evocode> {
        self.types.check()?;
        let types = Arc::new(self.types);
        let schemas = Arc::new(SchemaByType::new(types.clone())?);
        let roots = schemas.build_registered()?;

        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let versioning = SchemaVersioning::new(storage);
        versioning.initialize(&roots, self.options.init_attempts)?;
        info!(
            types = types.len(),
            shapes = versioning.contents().len(),
            blocks = versioning.blocks().len(),
            "schema storage initialized"
        );

        Ok(Evocode {
            inner: Arc::new(Inner {
                engine: Engine::new(types, schemas),
                versioning,
                options: self.options,
            }),
        })
    }
}

struct Inner {
    engine: Engine,
    versioning: SchemaVersioning,
    options: EvocodeOptions,
}

/// The serializer façade. Cheap to clone; clones share every cache.
///
/// # Example
/// ```rust
/// use evocode::Evocode;
///
/// let codec = Evocode::builder().build()?;
/// let bytes = codec.serialize(&vec![1i64, 2, 3])?;
/// let back: Vec<i32> = codec.deserialize(&bytes)?;
/// assert_eq!(back, vec![1, 2, 3]);
/// # Ok::<(), evocode::EvocodeError>(())
/// ```
#[derive(Clone)]
pub struct Evocode {
    inner: Arc<Inner>,
}

impl fmt::Debug for Evocode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evocode")
            .field("engine", &self.inner.engine)
            .field("latest_block", &self.inner.versioning.latest())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Evocode {
    /// Starts a builder.
    pub fn builder() -> EvocodeBuilder {
        EvocodeBuilder::default()
    }

    /// The options in effect.
    pub fn options(&self) -> &EvocodeOptions {
        &self.inner.options
    }

    /// The deserializer store.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// The schema storage coordinator.
    pub fn versioning(&self) -> &SchemaVersioning {
        &self.inner.versioning
    }

    /// Serializes `value` into a new buffer.
    pub fn serialize<T: Evolve>(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize_into(value, &mut buf)?;
        Ok(buf)
    }

    /// Appends the header and body of `value` to `buf`.
    pub fn serialize_into<T: Evolve>(&self, value: &T, buf: &mut Vec<u8>) -> Result<()> {
        let schema = self.schema_of::<T>()?;
        let mut out = Output::new(buf, self.inner.engine.types());
        write_header(
            &mut out,
            &schema,
            self.inner.versioning.latest(),
            self.inner.options.raw_integer_headers,
        )?;
        value.write(&mut out)
    }

    /// Reads a value of `T` from a message, converting from whatever schema it was written
    /// with.
    pub fn deserialize<T: Evolve>(&self, bytes: &[u8]) -> Result<T> {
        let mut input = Input::new(bytes);
        let header = read_header(&mut input, &self.inner.versioning)?;
        let value = self.inner.engine.reader::<T>(&header.schema)?.read(&mut input)?;
        self.finish(&input)?;
        Ok(value)
    }

    /// Reads a value of `T` from a headerless body written with `schema`.
    pub fn deserialize_with_schema<T: Evolve>(&self, schema: &Schema, body: &[u8]) -> Result<T> {
        let mut input = Input::new(body);
        let value = self.inner.engine.reader::<T>(schema)?.read(&mut input)?;
        self.finish(&input)?;
        Ok(value)
    }

    fn finish(&self, input: &Input<'_>) -> Result<()> {
        if self.inner.options.reject_trailing_bytes && !input.is_exhausted() {
            return Err(EvocodeError::malformed(format!(
                "{} trailing byte(s) after the value",
                input.remaining()
            )));
        }
        Ok(())
    }

    /// Schema `T` is written with.
    pub fn schema_of<T: Evolve>(&self) -> Result<Schema> {
        self.inner.engine.schemas().get::<T>()
    }

    /// Cached reader of `T` from data of `schema`.
    pub fn deserializer<T: Evolve>(&self, schema: &Schema) -> Result<Reader<T>> {
        self.inner.engine.reader::<T>(schema)
    }

    /// Cached skipper for `schema`.
    pub fn skipper(&self, schema: &Schema) -> Result<Skipper> {
        self.inner.engine.skipper(schema)
    }

    /// A fresh default value of `T`.
    pub fn default_value<T: Evolve>(&self) -> Result<T> {
        self.inner.engine.default_value::<T>()
    }

    /// Decodes only the header of a message.
    pub fn read_header(&self, bytes: &[u8]) -> Result<Header> {
        read_header(&mut Input::new(bytes), &self.inner.versioning)
    }

    /// Ingests blocks appended to schema storage since the last load.
    pub fn reload(&self) -> Result<()> {
        self.inner.versioning.reload()
    }

    /// The most recent block known to this process.
    pub fn latest_block(&self) -> Option<BlockId> {
        self.inner.versioning.latest()
    }

    /// The contents ID of a record or union type, once persisted.
    pub fn contents_id_of<T: Evolve>(&self) -> Result<Option<ContentsId>> {
        Ok(self.schema_of::<T>()?.contents_id())
    }
}
