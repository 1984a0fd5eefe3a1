//! Process-local schema log.

use std::sync::Mutex;

use super::{AppendOutcome, EntityTag, SchemaStorage};
use crate::error::{EvocodeError, Result};

#[derive(Debug, Default)]
struct MemoryLog {
    bytes: Vec<u8>,
    generation: u64,
}

/// In-memory [`SchemaStorage`], tagged by a generation counter bumped on every append.
///
/// Share one instance between several [`crate::Evocode`] values with an `Arc` to model
/// multiple writers of one log.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    log: Mutex<MemoryLog>,
}

impl MemoryStorage {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the log in bytes.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.bytes.len())
    }

    /// True if nothing was ever appended.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryLog>> {
        self.log.lock().map_err(|_| EvocodeError::poisoned("memory storage"))
    }
}

impl SchemaStorage for MemoryStorage {
    fn load_all(&self) -> Result<(Vec<u8>, EntityTag)> {
        let log = self.lock()?;
        Ok((log.bytes.clone(), EntityTag(log.generation)))
    }

    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> Result<AppendOutcome> {
        let mut log = self.lock()?;
        if EntityTag(log.generation) != expected {
            return Ok(AppendOutcome::Conflict);
        }
        log.bytes.extend_from_slice(bytes);
        log.generation += 1;
        Ok(AppendOutcome::Appended(EntityTag(log.generation)))
    }

    fn current_tag(&self) -> Result<EntityTag> {
        Ok(EntityTag(self.lock()?.generation))
    }
}
