//! Schema-driven skippers.
//!
//! A [`Skipper`] advances an [`Input`] past exactly one value of a schema without
//! materializing it. Skippers depend on the schema alone, so they can discard data that no
//! type of the current process describes. They are cached per schema; recursive schemas are
//! handled through slots that are filled once the enclosing skipper is complete.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::codec::{Input, NullStyle};
use crate::error::{EvocodeError, Result};
use crate::schema::{Schema, SchemaKind};

type SkipFn = dyn Fn(&mut Input<'_>) -> Result<()> + Send + Sync;

/// Advances the input past one value.
#[derive(Clone)]
pub struct Skipper(Arc<SkipFn>);

impl Skipper {
    fn new(f: impl Fn(&mut Input<'_>) -> Result<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Skips one value.
    #[inline]
    pub fn skip(&self, input: &mut Input<'_>) -> Result<()> {
        (self.0)(input)
    }
}

impl fmt::Debug for Skipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Skipper")
    }
}

/// Per-schema skipper cache.
#[derive(Default)]
pub struct SkipperStore {
    cache: DashMap<Schema, Skipper>,
}

impl fmt::Debug for SkipperStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipperStore").field("cached", &self.cache.len()).finish()
    }
}

impl SkipperStore {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skipper for `schema`.
    pub fn get(&self, schema: &Schema) -> Result<Skipper> {
        if let Some(hit) = self.cache.get(schema).map(|s| s.clone()) {
            return Ok(hit);
        }
        let mut builder = Builder {
            store: self,
            pending: HashMap::new(),
            finished: Vec::new(),
        };
        let skipper = builder.skipper(schema)?;
        for (key, built) in builder.finished {
            self.cache.entry(key).or_insert(built);
        }
        Ok(skipper)
    }
}

struct Builder<'a> {
    store: &'a SkipperStore,
    pending: HashMap<Schema, Arc<OnceLock<Skipper>>>,
    finished: Vec<(Schema, Skipper)>,
}

impl Builder<'_> {
    fn skipper(&mut self, schema: &Schema) -> Result<Skipper> {
        if let Some(hit) = self.store.cache.get(schema).map(|s| s.clone()) {
            return Ok(hit);
        }
        if let Some(slot) = self.pending.get(schema) {
            let slot = slot.clone();
            return Ok(Skipper::new(move |input| match slot.get() {
                Some(skipper) => skipper.skip(input),
                None => Err(EvocodeError::Internal("skipper used before construction".to_string())),
            }));
        }
        let slot = Arc::new(OnceLock::new());
        self.pending.insert(schema.clone(), slot.clone());
        let built = self.build(schema);
        self.pending.remove(schema);
        let skipper = built?;
        let _ = slot.set(skipper.clone());
        self.finished.push((schema.clone(), skipper.clone()));
        Ok(skipper)
    }

    fn build(&mut self, schema: &Schema) -> Result<Skipper> {
        let kind = schema.kind();
        let nullable = schema.is_nullable();

        if kind.null_style() == NullStyle::Shifted {
            return self.shifted(schema);
        }

        let body = match kind {
            SchemaKind::FractionalNumber => Skipper::new(|input| input.skip_fractional()),
            SchemaKind::Tuple2 | SchemaKind::Tuple3 | SchemaKind::Record => {
                let parts = schema
                    .children()
                    .map(|child| self.skipper(child))
                    .collect::<Result<Vec<_>>>()?;
                Skipper::new(move |input| parts.iter().try_for_each(|p| p.skip(input)))
            }
            SchemaKind::Union => {
                let mut cases = Vec::with_capacity(schema.members().len());
                for member in schema.members() {
                    cases.push((u64::from(member.id), self.skipper(&member.schema)?));
                }
                Skipper::new(move |input| {
                    let discriminator = input.read_var_u64()?;
                    match cases.binary_search_by_key(&discriminator, |(id, _)| *id) {
                        Ok(i) => cases[i].1.skip(input),
                        Err(_) => Err(EvocodeError::malformed(format!(
                            "unknown union discriminator {discriminator}"
                        ))),
                    }
                })
            }
            fixed => {
                let width = fixed.fixed_width().ok_or_else(|| {
                    EvocodeError::Internal(format!("no skipper for schema kind {fixed:?}"))
                })?;
                Skipper::new(move |input| input.skip(width))
            }
        };

        if !nullable {
            return Ok(body);
        }
        Ok(Skipper::new(move |input| {
            if input.read_null_marker()? {
                return Ok(());
            }
            body.skip(input)
        }))
    }

    fn shifted(&mut self, schema: &Schema) -> Result<Skipper> {
        let nullable = schema.is_nullable();
        Ok(match schema.kind() {
            SchemaKind::WholeNumber | SchemaKind::SignedWholeNumber => Skipper::new(|input| input.skip_varint()),
            SchemaKind::String => Skipper::new(move |input| match input.read_count(nullable)? {
                Some(len) => input.skip(len),
                None => Ok(()),
            }),
            _ => {
                let parts = schema
                    .inner()
                    .iter()
                    .map(|inner| self.skipper(inner))
                    .collect::<Result<Vec<_>>>()?;
                Skipper::new(move |input| {
                    let count = input.read_count(nullable)?.unwrap_or(0);
                    for _ in 0..count {
                        for part in &parts {
                            part.skip(input)?;
                        }
                    }
                    Ok(())
                })
            }
        })
    }
}
