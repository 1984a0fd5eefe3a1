//! The [`Evolve`] trait: how a Rust type maps onto schemas, the wire and converters.
//!
//! Natives live in [`native`], collections and tuples in [`collections`]. Named types
//! (structs and enums) implement the trait through `#[derive(Evolve)]` or
//! [`crate::evolve_named!`], which route every method through the [`TypeRegistry`].

pub mod collections;
pub mod native;

use std::sync::Arc;

use crate::codec::Output;
use crate::defaults::{DefaultFn, DefaultValues};
use crate::engine::{BuildCx, Reader};
use crate::error::{EvocodeError, Result};
use crate::registry::{TypeKey, TypeRegistry};
use crate::schema::Schema;
use crate::schema_by_type::{AnnotatedType, SchemaCx};

/// A type that can be written with a schema and read back from any compatible schema.
pub trait Evolve: Sized + Send + Sync + 'static {
    /// Cache key of this type's schema.
    fn annotated() -> AnnotatedType {
        AnnotatedType::new(TypeKey::of::<Self>(), false)
    }

    /// Builds the schema of this type.
    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema>;

    /// Writes a present value.
    fn write(&self, out: &mut Output<'_>) -> Result<()>;

    /// Writes a possibly-null value under the nullable form of this type's schema.
    ///
    /// The default writes a sentinel marker byte before present values.
    fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
        match value {
            None => {
                out.write_null_marker(true);
                Ok(())
            }
            Some(v) => {
                out.write_null_marker(false);
                v.write(out)
            }
        }
    }

    /// Builds a reader from data of schema `source`. Null reads as `None`.
    fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>>;

    /// Builds a reader from data of schema `source`. Null reads as the default value.
    fn reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Self>> {
        let read = cx.nullable::<Self>(source)?;
        let default = cx.default_fn::<Self>()?;
        Ok(read.map(move |value| value.unwrap_or_else(|| default())))
    }

    /// The value used when this type is absent from the data or null.
    fn default_fn(defaults: &DefaultValues) -> Result<DefaultFn<Self>>;

    /// Registers the named types this type is built from.
    fn register_types(types: &mut TypeRegistry) {
        let _ = types;
    }
}

impl<T: Evolve> Evolve for Option<T> {
    fn annotated() -> AnnotatedType {
        let inner = T::annotated();
        if inner.nullable {
            // Keyed apart from `T` so the cache never answers for a doubly nullable type.
            AnnotatedType::new(TypeKey::of::<Self>(), true)
        } else {
            AnnotatedType::new(inner.key, true)
        }
    }

    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
        let inner = cx.schema_of::<T>()?;
        if inner.is_nullable() {
            return Err(EvocodeError::schema(format!(
                "{} is not representable: nested nullability",
                TypeKey::of::<Self>()
            )));
        }
        Ok(inner.with_nullable(true))
    }

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        T::write_nullable(self.as_ref(), out)
    }

    fn write_nullable(_: Option<&Self>, _: &mut Output<'_>) -> Result<()> {
        Err(EvocodeError::schema(format!(
            "{} is not representable: nested nullability",
            TypeKey::of::<Option<Self>>()
        )))
    }

    fn nullable_reader(_: &Schema, _: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
        Err(EvocodeError::schema(format!(
            "{} is not representable: nested nullability",
            TypeKey::of::<Option<Self>>()
        )))
    }

    fn reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Self>> {
        cx.nullable::<T>(source)
    }

    fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
        Ok(Arc::new(|| None))
    }

    fn register_types(types: &mut TypeRegistry) {
        T::register_types(types);
    }
}

macro_rules! forward_evolve {
    ($($wrapper:ident),*) => {
        $(
            impl<T: Evolve> Evolve for $wrapper<T> {
                fn annotated() -> AnnotatedType {
                    T::annotated()
                }

                fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
                    cx.schema_of::<T>()
                }

                fn write(&self, out: &mut Output<'_>) -> Result<()> {
                    T::write(self, out)
                }

                fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
                    T::write_nullable(value.map(|v| &**v), out)
                }

                fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
                    Ok(cx.nullable::<T>(source)?.map(|v| v.map($wrapper::new)))
                }

                fn default_fn(defaults: &DefaultValues) -> Result<DefaultFn<Self>> {
                    let inner = defaults.get::<T>()?;
                    Ok(Arc::new(move || $wrapper::new(inner())))
                }

                fn register_types(types: &mut TypeRegistry) {
                    T::register_types(types);
                }
            }
        )*
    };
}

forward_evolve!(Box, Arc);

impl Evolve for () {
    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
        Ok(cx.unit())
    }

    fn write(&self, _: &mut Output<'_>) -> Result<()> {
        Ok(())
    }

    fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
        let skipper = cx.skipper(source)?;
        Ok(Reader::new(move |input| {
            skipper.skip(input)?;
            Ok(Some(()))
        }))
    }

    fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
        Ok(Arc::new(|| ()))
    }
}
