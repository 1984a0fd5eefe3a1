// src/rt.rs

//! Runtime utilities for generated code (Macros).
//! Do not use directly.

use crate::engine::{record, BuildCx, Reader};
use crate::error::Result;
use crate::evolve::Evolve;
use crate::schema::Schema;

/// Reader of a registered named type; see [`record::named_reader`].
pub fn named_reader<T: Evolve>(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<T>>> {
    record::named_reader::<T>(source, cx)
}

/// Implements [`Evolve`](crate::Evolve) for a named type by routing every method through
/// the type registry.
///
/// The type must also implement [`Register`](crate::registry::Register); its registrations
/// supply the schema, writer, reader factory and default value.
///
/// ```rust
/// use evocode::registry::{ReaderFactory, RecordFactory, Register, TypeRegistry};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Celsius {
///     degrees: f64,
/// }
///
/// evocode::evolve_named!(Celsius);
///
/// impl Register for Celsius {
///     fn register(types: &mut TypeRegistry) {
///         types.add_member_type::<Self, f64>(1);
///         types.add_reader_factory::<Self>(ReaderFactory::Record(
///             RecordFactory::<Self>::new().member(1, |c| &mut c.degrees),
///         ));
///         types.add_writer::<Self>(|value, out| evocode::Evolve::write(&value.degrees, out));
///         types.add_default_value_getter::<Self>(Celsius::default);
///     }
/// }
///
/// let codec = evocode::Evocode::builder().register::<Celsius>().build().unwrap();
/// let bytes = codec.serialize(&Celsius { degrees: 21.5 }).unwrap();
/// assert_eq!(codec.deserialize::<Celsius>(&bytes).unwrap(), Celsius { degrees: 21.5 });
/// ```
#[macro_export]
macro_rules! evolve_named {
    ($ty:ty) => {
        impl $crate::Evolve for $ty {
            fn schema(
                cx: &mut $crate::schema_by_type::SchemaCx<'_>,
            ) -> $crate::Result<$crate::schema::Schema> {
                cx.named::<Self>()
            }

            fn write(&self, out: &mut $crate::codec::Output<'_>) -> $crate::Result<()> {
                out.write_named(self)
            }

            fn write_nullable(
                value: ::core::option::Option<&Self>,
                out: &mut $crate::codec::Output<'_>,
            ) -> $crate::Result<()> {
                out.write_named_nullable(value)
            }

            fn nullable_reader(
                source: &$crate::schema::Schema,
                cx: &mut $crate::engine::BuildCx<'_>,
            ) -> $crate::Result<$crate::engine::Reader<::core::option::Option<Self>>> {
                $crate::rt::named_reader::<Self>(source, cx)
            }

            fn default_fn(
                defaults: &$crate::defaults::DefaultValues,
            ) -> $crate::Result<$crate::defaults::DefaultFn<Self>> {
                defaults.registered::<Self>()
            }

            fn register_types(types: &mut $crate::registry::TypeRegistry) {
                if types.begin::<Self>() {
                    <Self as $crate::registry::Register>::register(types);
                }
            }
        }
    };
}
