//! Content-addressed store of record/union shapes.
//!
//! Every unique member list gets a positive [`ContentsId`] the first time it is seen;
//! structurally equal shapes reuse it. Lookups are lock-free; ID assignment is serialized by a
//! mutex so two threads never hand out the same number.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use super::{Contents, ContentsId, Schema};
use crate::error::{EvocodeError, Result};

/// Map key comparing contents nodes by shape.
#[derive(Clone)]
struct ShapeKey(Arc<Contents>);

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_shape(&other.0)
    }
}

impl Eq for ShapeKey {}

impl Hash for ShapeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.shallow_hash());
    }
}

/// Thread-safe registry of known shapes.
pub struct ContentsStore {
    by_id: DashMap<ContentsId, Arc<Contents>>,
    by_shape: DashMap<ShapeKey, ContentsId>,
    /// Highest ID handed out or loaded so far.
    last: Mutex<u32>,
}

impl std::fmt::Debug for ContentsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentsStore").field("len", &self.by_id.len()).finish()
    }
}

impl Default for ContentsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_shape: DashMap::new(),
            last: Mutex::new(0),
        }
    }

    /// Returns the ID of `contents`, assigning the next free ID if its shape is new.
    ///
    /// The boolean is true when a new ID was assigned.
    pub fn get_or_add(&self, contents: &Arc<Contents>) -> Result<(ContentsId, bool)> {
        if let Some(id) = contents.id() {
            return Ok((id, false));
        }
        let mut last = self.last.lock().map_err(|_| EvocodeError::poisoned("contents store"))?;
        let key = ShapeKey(contents.clone());
        if let Some(existing) = self.by_shape.get(&key) {
            let id = *existing;
            contents.assign_id(id);
            return Ok((id, false));
        }
        let next = last
            .checked_add(1)
            .ok_or_else(|| EvocodeError::Internal("contents ids exhausted".to_string()))?;
        *last = next;
        let id = ContentsId(next);
        contents.assign_id(id);
        self.by_id.insert(id, contents.clone());
        self.by_shape.insert(key, id);
        debug!(contents_id = next, members = contents.members().len(), "assigned new contents id");
        Ok((id, true))
    }

    /// Assigns IDs to every contents node reachable from `roots` and returns the newly
    /// assigned ones in ID order.
    pub fn resolve_all(&self, roots: &[Schema]) -> Result<Vec<Arc<Contents>>> {
        let mut fresh = Vec::new();
        for contents in Schema::reachable_contents(roots) {
            if !contents.is_complete() {
                return Err(EvocodeError::Internal(
                    "cannot resolve a contents node without members".to_string(),
                ));
            }
            let (_, is_new) = self.get_or_add(&contents)?;
            if is_new {
                fresh.push(contents);
            }
        }
        fresh.sort_by_key(|c| c.id());
        Ok(fresh)
    }

    /// Records a shape loaded from storage under its persisted ID.
    ///
    /// Returns the canonical node for `id`: the previously known one if `id` was already
    /// loaded with the same shape. Two different shapes under one ID are a schema conflict.
    pub fn insert_loaded(&self, id: ContentsId, contents: Arc<Contents>) -> Result<Arc<Contents>> {
        let mut last = self.last.lock().map_err(|_| EvocodeError::poisoned("contents store"))?;
        if let Some(existing) = self.by_id.get(&id) {
            if !existing.same_shape(&contents) {
                return Err(EvocodeError::schema(format!(
                    "schema conflict: contents id {id} observed with two different shapes"
                )));
            }
            return Ok(existing.clone());
        }
        contents.assign_id(id);
        self.by_id.insert(id, contents.clone());
        self.by_shape.entry(ShapeKey(contents.clone())).or_insert(id);
        *last = (*last).max(id.0);
        Ok(contents)
    }

    /// Looks up a shape by ID.
    pub fn try_get(&self, id: ContentsId) -> Option<Arc<Contents>> {
        self.by_id.get(&id).map(|c| c.clone())
    }

    /// Looks up a shape by ID, failing on unknown IDs.
    pub fn get(&self, id: ContentsId) -> Result<Arc<Contents>> {
        self.try_get(id)
            .ok_or_else(|| EvocodeError::malformed(format!("unknown contents id {id}")))
    }

    /// Number of known shapes.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if no shape is known.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Forgets every shape.
    pub fn clear(&self) -> Result<()> {
        let mut last = self.last.lock().map_err(|_| EvocodeError::poisoned("contents store"))?;
        self.by_shape.clear();
        self.by_id.clear();
        *last = 0;
        Ok(())
    }
}
