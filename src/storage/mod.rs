//! Persistent schema storage: an append-only log of shape blocks.
//!
//! The engine only needs three operations from a backend, captured by [`SchemaStorage`]:
//! load everything, append conditionally on an [`EntityTag`], and report the current tag.
//! Appends are compare-and-swap: a writer that loaded an older version of the log gets
//! [`AppendOutcome::Conflict`] and must reload before trying again.
//!
//! Two adapters ship with the crate:
//! * [`MemoryStorage`]: a process-local log, tagged by a generation counter.
//! * [`FileStorage`]: an append-only file, tagged by the XxHash64 of its contents.

pub mod block;
pub mod file;
pub mod memory;
pub mod versioning;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

pub use block::BlockId;
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use versioning::SchemaVersioning;

/// Opaque version stamp of a persisted log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityTag(pub u64);

impl EntityTag {
    /// Tag of a log that has never been written.
    pub const EMPTY: EntityTag = EntityTag(0);
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Result of a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The bytes were appended; the log now carries the given tag.
    Appended(EntityTag),
    /// The log changed since the expected tag was observed. Nothing was written.
    Conflict,
}

/// Backend contract for the schema block log.
///
/// Implementations must provide compare-and-swap semantics for [`SchemaStorage::try_append`]
/// at least for the processes sharing one log.
pub trait SchemaStorage: Send + Sync + fmt::Debug {
    /// Returns the whole log and its current tag.
    fn load_all(&self) -> Result<(Vec<u8>, EntityTag)>;

    /// Appends `bytes` if the log still carries `expected`.
    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> Result<AppendOutcome>;

    /// Current tag of the log.
    fn current_tag(&self) -> Result<EntityTag>;
}

impl<S: SchemaStorage + ?Sized> SchemaStorage for Arc<S> {
    fn load_all(&self) -> Result<(Vec<u8>, EntityTag)> {
        (**self).load_all()
    }

    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> Result<AppendOutcome> {
        (**self).try_append(bytes, expected)
    }

    fn current_tag(&self) -> Result<EntityTag> {
        (**self).current_tag()
    }
}
