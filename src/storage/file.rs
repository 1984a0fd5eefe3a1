//! Append-only file backend.
//!
//! The entity tag is the XxHash64 of the whole file, so any change made by another writer is
//! detected on the next append. Compare-and-swap is guarded by a per-path mutex shared by
//! every [`FileStorage`] of this process.

use std::fs::{self, OpenOptions};
use std::hash::Hasher;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use tracing::debug;
use twox_hash::XxHash64;

use super::{AppendOutcome, EntityTag, SchemaStorage};
use crate::error::{EvocodeError, Result};

/// Append gates of this process, one per log path.
static GATES: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();

/// [`SchemaStorage`] backed by a single append-only file.
///
/// Appends from one process are serialized, even across several `FileStorage` values opened
/// on the same path. Appends from different processes are not locked against each other: the
/// tag check and the write are two steps, so two processes appending at the same instant can
/// both pass the check. Give each process its own window for schema initialization, or use a
/// backend with a server-side conditional write when that cannot be arranged.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    gate: Arc<Mutex<()>>,
}

/// Same file, same key: the parent directory is canonicalized when it exists.
fn gate_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

impl FileStorage {
    /// Uses the file at `path`. The file is created on the first append.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let gate = GATES
            .get_or_init(DashMap::new)
            .entry(gate_key(&path))
            .or_default()
            .clone();
        Self { path, gate }
    }

    /// Location of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Content-hash tag of a log. The empty log has [`EntityTag::EMPTY`].
pub fn tag_of(bytes: &[u8]) -> EntityTag {
    if bytes.is_empty() {
        return EntityTag::EMPTY;
    }
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    EntityTag(hasher.finish())
}

impl SchemaStorage for FileStorage {
    fn load_all(&self) -> Result<(Vec<u8>, EntityTag)> {
        let bytes = self.read()?;
        let tag = tag_of(&bytes);
        Ok((bytes, tag))
    }

    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> Result<AppendOutcome> {
        let _guard = self.gate.lock().map_err(|_| EvocodeError::poisoned("file storage"))?;
        let mut current = self.read()?;
        if tag_of(&current) != expected {
            debug!(path = %self.path.display(), "file storage tag mismatch");
            return Ok(AppendOutcome::Conflict);
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_data()?;
        current.extend_from_slice(bytes);
        Ok(AppendOutcome::Appended(tag_of(&current)))
    }

    fn current_tag(&self) -> Result<EntityTag> {
        Ok(tag_of(&self.read()?))
    }
}
