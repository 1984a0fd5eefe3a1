//! Default-value factory: the value a target takes when its source is absent or null.
//!
//! Defaults are synthesized once per type and cached. Nullable types default to `None`;
//! mutable collections produce a fresh empty instance per call, while read-only views
//! (`Arc<[T]>`) share one empty singleton. Named types use their registered getter.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{EvocodeError, Result};
use crate::evolve::Evolve;
use crate::registry::{TypeKey, TypeRegistry};

/// Produces the default value of `T`.
pub type DefaultFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Per-type cache of default-value functions.
pub struct DefaultValues {
    types: Arc<TypeRegistry>,
    cache: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for DefaultValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultValues").field("cached", &self.cache.len()).finish()
    }
}

impl DefaultValues {
    /// Creates an empty cache over `types`.
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self {
            types,
            cache: DashMap::new(),
        }
    }

    /// Default-value function of `T`.
    pub fn get<T: Evolve>(&self) -> Result<DefaultFn<T>> {
        let id = TypeId::of::<T>();
        let hit = self.cache.get(&id).map(|entry| entry.clone());
        if let Some(hit) = hit {
            return downcast::<T>(hit);
        }
        let built: Arc<dyn Any + Send + Sync> = Arc::new(T::default_fn(self)?);
        let stored = self.cache.entry(id).or_insert(built).clone();
        downcast::<T>(stored)
    }

    /// The getter registered for the named type `T`.
    pub fn registered<T: Evolve>(&self) -> Result<DefaultFn<T>> {
        self.types.default_getter::<T>().ok_or_else(|| {
            EvocodeError::schema(format!("no default value getter registered for type {}", TypeKey::of::<T>()))
        })
    }
}

fn downcast<T: 'static>(erased: Arc<dyn Any + Send + Sync>) -> Result<DefaultFn<T>> {
    erased
        .downcast_ref::<DefaultFn<T>>()
        .cloned()
        .ok_or_else(|| EvocodeError::Internal("default value cache holds a foreign type".to_string()))
}
