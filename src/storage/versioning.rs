//! Versioned initialization of the schema log and on-demand reloads.
//!
//! [`SchemaVersioning`] ties the [`ContentsStore`] to a [`SchemaStorage`] backend:
//!
//! * [`SchemaVersioning::initialize`] loads the log, merges in the shapes of this process's
//!   registered types and appends the new ones as one block under optimistic concurrency.
//!   A conflicting append or an I/O failure resets all derived state and retries.
//! * [`SchemaVersioning::ensure_block`] is called when a message references a block this
//!   process has not seen. Concurrent callers serialize on the reload gate; late arrivals find
//!   the block already loaded and return without touching storage.
//!
//! The reload gate also owns the log cursor: the tag and length of the log prefix already
//! ingested, so a reload only parses bytes appended since.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashSet;
use tracing::{debug, info, warn};

use super::block::{encode_block, ingest_blocks, BlockId};
use super::{AppendOutcome, EntityTag, SchemaStorage};
use crate::error::{EvocodeError, Result};
use crate::schema::contents::ContentsStore;
use crate::schema::Schema;

/// Blocks loaded by this process.
#[derive(Debug, Default)]
pub struct BlockIndex {
    loaded: DashSet<BlockId>,
    latest: AtomicU32,
}

impl BlockIndex {
    /// True if the block has been ingested.
    pub fn contains(&self, id: BlockId) -> bool {
        self.loaded.contains(&id)
    }

    /// The most recent block of the log, written into `Full` headers.
    pub fn latest(&self) -> Option<BlockId> {
        match self.latest.load(Ordering::Acquire) {
            0 => None,
            id => Some(BlockId(id)),
        }
    }

    /// Number of known blocks.
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// True if no block is known.
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    fn record(&self, id: BlockId) {
        self.loaded.insert(id);
        self.latest.store(id.0, Ordering::Release);
    }

    fn clear(&self) {
        self.loaded.clear();
        self.latest.store(0, Ordering::Release);
    }
}

/// Portion of the log already ingested.
#[derive(Debug, Default)]
struct LogCursor {
    tag: EntityTag,
    consumed: usize,
}

enum Attempt {
    Done,
    Retry(String),
}

/// Schema storage coordinator. See the module documentation.
#[derive(Debug)]
pub struct SchemaVersioning {
    storage: Arc<dyn SchemaStorage>,
    contents: Arc<ContentsStore>,
    blocks: BlockIndex,
    gate: Mutex<LogCursor>,
}

impl SchemaVersioning {
    /// Creates a coordinator over `storage`. Nothing is loaded until [`Self::initialize`].
    pub fn new(storage: Arc<dyn SchemaStorage>) -> Self {
        Self {
            storage,
            contents: Arc::new(ContentsStore::new()),
            blocks: BlockIndex::default(),
            gate: Mutex::new(LogCursor::default()),
        }
    }

    /// The shape store fed by this coordinator.
    pub fn contents(&self) -> &Arc<ContentsStore> {
        &self.contents
    }

    /// The block index.
    pub fn blocks(&self) -> &BlockIndex {
        &self.blocks
    }

    /// Latest block ID known to this process.
    pub fn latest(&self) -> Option<BlockId> {
        self.blocks.latest()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogCursor>> {
        self.gate.lock().map_err(|_| EvocodeError::poisoned("schema reload gate"))
    }

    /// Loads the log and persists the shapes of `roots` that it does not contain yet.
    ///
    /// Runs at most `attempts` times. Conflicting appends and I/O failures are retried after
    /// a full reset of the in-memory state; every other error is returned immediately.
    pub fn initialize(&self, roots: &[Schema], attempts: u32) -> Result<()> {
        let attempts = attempts.max(1);
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            match self.try_initialize(roots) {
                Ok(Attempt::Done) => return Ok(()),
                Ok(Attempt::Retry(reason)) => {
                    warn!(attempt, attempts, %reason, "schema storage initialization will retry");
                    last_failure = reason;
                }
                Err(EvocodeError::Io(e)) => {
                    warn!(attempt, attempts, error = %e, "schema storage I/O failure");
                    last_failure = e.to_string();
                }
                Err(other) => return Err(other),
            }
        }
        Err(EvocodeError::Storage(format!(
            "schema storage initialization failed after {attempts} attempt(s): {last_failure}"
        )))
    }

    fn try_initialize(&self, roots: &[Schema]) -> Result<Attempt> {
        let mut cursor = self.lock()?;
        self.reset(roots, &mut cursor)?;

        let (bytes, tag) = self.storage.load_all()?;
        self.ingest(&bytes, &mut cursor)?;
        cursor.tag = tag;

        let fresh = self.contents.resolve_all(roots)?;
        if fresh.is_empty() {
            info!(blocks = self.blocks.len(), shapes = self.contents.len(), "schema storage is up to date");
            return Ok(Attempt::Done);
        }

        let id = BlockId::random();
        let block = encode_block(id, &fresh)?;
        match self.storage.try_append(&block, tag)? {
            AppendOutcome::Appended(new_tag) => {
                cursor.tag = new_tag;
                cursor.consumed += block.len();
                self.blocks.record(id);
                info!(block = id.0, shapes = fresh.len(), bytes = block.len(), "appended schema block");
                Ok(Attempt::Done)
            }
            AppendOutcome::Conflict => Ok(Attempt::Retry(format!(
                "schema log changed since tag {tag}"
            ))),
        }
    }

    fn reset(&self, roots: &[Schema], cursor: &mut LogCursor) -> Result<()> {
        self.contents.clear()?;
        self.blocks.clear();
        *cursor = LogCursor::default();
        for contents in Schema::reachable_contents(roots) {
            contents.reset_id();
        }
        Ok(())
    }

    fn ingest(&self, bytes: &[u8], cursor: &mut LogCursor) -> Result<()> {
        let tail = bytes.get(cursor.consumed..).ok_or_else(|| {
            EvocodeError::corrupt_log(format!(
                "schema log shrank from {} to {} bytes",
                cursor.consumed,
                bytes.len()
            ))
        })?;
        for id in ingest_blocks(tail, &self.contents)? {
            self.blocks.record(id);
        }
        cursor.consumed = bytes.len();
        Ok(())
    }

    fn reload_locked(&self, cursor: &mut LogCursor) -> Result<()> {
        let (bytes, tag) = self.storage.load_all()?;
        if tag == cursor.tag && bytes.len() == cursor.consumed {
            debug!("schema log unchanged");
            return Ok(());
        }
        let before = self.blocks.len();
        self.ingest(&bytes, cursor)?;
        cursor.tag = tag;
        info!(new_blocks = self.blocks.len() - before, "reloaded schema log");
        Ok(())
    }

    /// Makes sure block `id` is loaded, reloading the log at most once.
    ///
    /// Returns whether the block is known afterwards.
    pub fn ensure_block(&self, id: BlockId) -> Result<bool> {
        if self.blocks.contains(id) {
            return Ok(true);
        }
        let mut cursor = self.lock()?;
        if self.blocks.contains(id) {
            debug!(block = id.0, "block loaded by a concurrent reload");
            return Ok(true);
        }
        self.reload_locked(&mut cursor)?;
        Ok(self.blocks.contains(id))
    }

    /// Forces a reload of the log.
    pub fn reload(&self) -> Result<()> {
        let mut cursor = self.lock()?;
        self.reload_locked(&mut cursor)
    }
}
