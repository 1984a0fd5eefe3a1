//! [`Evolve`] for collections and tuples.
//!
//! Every sequence type shares the `Array` schema and every map type the `Dictionary`
//! schema, so any sequence reads into any other, and a dictionary reads into a sequence of
//! pairs (and back).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use crate::codec::Output;
use crate::defaults::{DefaultFn, DefaultValues};
use crate::engine::{pair_reader, sequence_reader, triple_reader, BuildCx, Reader};
use crate::error::Result;
use crate::evolve::Evolve;
use crate::registry::TypeRegistry;
use crate::schema::Schema;
use crate::schema_by_type::SchemaCx;

fn write_items<'a, T: Evolve>(
    items: impl ExactSizeIterator<Item = &'a T>,
    nullable: bool,
    out: &mut Output<'_>,
) -> Result<()> {
    out.write_shifted(Some(items.len() as u64), nullable);
    for item in items {
        item.write(out)?;
    }
    Ok(())
}

fn write_pairs<'a, K: Evolve, V: Evolve>(
    pairs: impl ExactSizeIterator<Item = (&'a K, &'a V)>,
    nullable: bool,
    out: &mut Output<'_>,
) -> Result<()> {
    out.write_shifted(Some(pairs.len() as u64), nullable);
    for (key, value) in pairs {
        key.write(out)?;
        value.write(out)?;
    }
    Ok(())
}

macro_rules! sequence_evolve {
    ($($ty:ty where [$($bound:tt)*] => $empty:expr;)*) => {
        $(
            impl<T: Evolve $($bound)*> Evolve for $ty {
                fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
                    Ok(Schema::array(cx.schema_of::<T>()?))
                }

                fn write(&self, out: &mut Output<'_>) -> Result<()> {
                    write_items(self.iter(), false, out)
                }

                fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
                    match value {
                        Some(items) => write_items(items.iter(), true, out),
                        None => {
                            out.write_shifted(None, true);
                            Ok(())
                        }
                    }
                }

                fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
                    sequence_reader::<T, Self>(source, cx)
                }

                fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
                    Ok(Arc::new(|| $empty))
                }

                fn register_types(types: &mut TypeRegistry) {
                    T::register_types(types);
                }
            }
        )*
    };
}

sequence_evolve! {
    Vec<T> where [] => Vec::new();
    VecDeque<T> where [] => VecDeque::new();
    Box<[T]> where [] => Box::default();
    HashSet<T> where [+ Eq + Hash] => HashSet::new();
    BTreeSet<T> where [+ Ord] => BTreeSet::new();
}

impl<T: Evolve> Evolve for Arc<[T]> {
    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
        Ok(Schema::array(cx.schema_of::<T>()?))
    }

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        write_items(self.iter(), false, out)
    }

    fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
        match value {
            Some(items) => write_items(items.iter(), true, out),
            None => {
                out.write_shifted(None, true);
                Ok(())
            }
        }
    }

    fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
        sequence_reader::<T, Self>(source, cx)
    }

    /// Read-only views share one empty instance.
    fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
        let empty: Arc<[T]> = Arc::from(Vec::new());
        Ok(Arc::new(move || empty.clone()))
    }

    fn register_types(types: &mut TypeRegistry) {
        T::register_types(types);
    }
}

macro_rules! map_evolve {
    ($($map:ident where [$($bound:tt)*];)*) => {
        $(
            impl<K: Evolve $($bound)*, V: Evolve> Evolve for $map<K, V> {
                fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
                    Ok(Schema::dictionary(cx.schema_of::<K>()?, cx.schema_of::<V>()?))
                }

                fn write(&self, out: &mut Output<'_>) -> Result<()> {
                    write_pairs(self.iter(), false, out)
                }

                fn write_nullable(value: Option<&Self>, out: &mut Output<'_>) -> Result<()> {
                    match value {
                        Some(map) => write_pairs(map.iter(), true, out),
                        None => {
                            out.write_shifted(None, true);
                            Ok(())
                        }
                    }
                }

                fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
                    sequence_reader::<(K, V), Self>(source, cx)
                }

                fn default_fn(_: &DefaultValues) -> Result<DefaultFn<Self>> {
                    Ok(Arc::new($map::new))
                }

                fn register_types(types: &mut TypeRegistry) {
                    K::register_types(types);
                    V::register_types(types);
                }
            }
        )*
    };
}

map_evolve! {
    HashMap where [+ Eq + Hash];
    BTreeMap where [+ Ord];
}

impl<A: Evolve, B: Evolve> Evolve for (A, B) {
    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
        Ok(Schema::tuple2(cx.schema_of::<A>()?, cx.schema_of::<B>()?))
    }

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        self.0.write(out)?;
        self.1.write(out)
    }

    fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
        pair_reader::<A, B>(source, cx)
    }

    fn default_fn(defaults: &DefaultValues) -> Result<DefaultFn<Self>> {
        let (a, b) = (defaults.get::<A>()?, defaults.get::<B>()?);
        Ok(Arc::new(move || (a(), b())))
    }

    fn register_types(types: &mut TypeRegistry) {
        A::register_types(types);
        B::register_types(types);
    }
}

impl<A: Evolve, B: Evolve, C: Evolve> Evolve for (A, B, C) {
    fn schema(cx: &mut SchemaCx<'_>) -> Result<Schema> {
        Ok(Schema::tuple3(cx.schema_of::<A>()?, cx.schema_of::<B>()?, cx.schema_of::<C>()?))
    }

    fn write(&self, out: &mut Output<'_>) -> Result<()> {
        self.0.write(out)?;
        self.1.write(out)?;
        self.2.write(out)
    }

    fn nullable_reader(source: &Schema, cx: &mut BuildCx<'_>) -> Result<Reader<Option<Self>>> {
        triple_reader::<A, B, C>(source, cx)
    }

    fn default_fn(defaults: &DefaultValues) -> Result<DefaultFn<Self>> {
        let (a, b, c) = (defaults.get::<A>()?, defaults.get::<B>()?, defaults.get::<C>()?);
        Ok(Arc::new(move || (a(), b(), c())))
    }

    fn register_types(types: &mut TypeRegistry) {
        A::register_types(types);
        B::register_types(types);
        C::register_types(types);
    }
}
