#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use evocode::storage::file::tag_of;
use evocode::storage::{AppendOutcome, EntityTag, SchemaStorage};
use evocode::{Evocode, EvocodeError, Evolve, FileStorage, MemoryStorage};

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct SensorV1 {
    #[evolve(id = 1)]
    id: u32,
    #[evolve(id = 2)]
    celsius: f32,
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct SensorV2 {
    #[evolve(id = 1)]
    id: u64,
    #[evolve(id = 3)]
    location: String,
}

/// Serves one stale snapshot of the log on the first load, as if another writer appended
/// right after this process read it.
#[derive(Debug)]
struct StaleFirstLoad {
    inner: Arc<MemoryStorage>,
    snapshot: Mutex<Option<(Vec<u8>, EntityTag)>>,
    conflicts: AtomicUsize,
}

impl StaleFirstLoad {
    fn new(inner: Arc<MemoryStorage>, snapshot: (Vec<u8>, EntityTag)) -> Self {
        Self {
            inner,
            snapshot: Mutex::new(Some(snapshot)),
            conflicts: AtomicUsize::new(0),
        }
    }
}

impl SchemaStorage for StaleFirstLoad {
    fn load_all(&self) -> evocode::Result<(Vec<u8>, EntityTag)> {
        if let Some(stale) = self.snapshot.lock().unwrap().take() {
            return Ok(stale);
        }
        self.inner.load_all()
    }

    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> evocode::Result<AppendOutcome> {
        let outcome = self.inner.try_append(bytes, expected)?;
        if outcome == AppendOutcome::Conflict {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    fn current_tag(&self) -> evocode::Result<EntityTag> {
        self.inner.current_tag()
    }
}

// --- TESTS ---

#[test]
fn test_shared_log_reuses_contents_ids() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let first = Evocode::builder().register::<SensorV1>().storage(log.clone()).build()?;
    let size = log.len()?;
    assert!(size > 0);

    let second = Evocode::builder().register::<SensorV1>().storage(log.clone()).build()?;
    assert_eq!(log.len()?, size, "no new shapes, nothing appended");
    assert_eq!(second.contents_id_of::<SensorV1>()?, first.contents_id_of::<SensorV1>()?);
    assert_eq!(second.latest_block(), first.latest_block());
    Ok(())
}

/// Two writers race on an empty log. The loser retries on top of the winner's block and
/// both end up with distinct IDs for distinct shapes.
#[test]
fn test_two_writer_append_race() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let snapshot = log.load_all()?;

    let winner = Evocode::builder().register::<SensorV1>().storage(log.clone()).build()?;

    let racing = Arc::new(StaleFirstLoad::new(log.clone(), snapshot));
    let loser = Evocode::builder()
        .register::<SensorV2>()
        .storage(racing.clone())
        .build()?;
    assert_eq!(racing.conflicts.load(Ordering::SeqCst), 1);

    let v1 = winner.contents_id_of::<SensorV1>()?.unwrap();
    let v2 = loser.contents_id_of::<SensorV2>()?.unwrap();
    assert_ne!(v1, v2);

    // The winner has not seen the loser's block yet; reading loads it on demand.
    let bytes = loser.serialize(&SensorV2 {
        id: 7,
        location: "roof".to_string(),
    })?;
    let header = loser.read_header(&bytes)?;
    assert_ne!(header.block, winner.latest_block());

    let read: SensorV1 = winner.deserialize(&bytes)?;
    assert_eq!(read, SensorV1 { id: 7, celsius: 0.0 });

    let back: SensorV2 = loser.deserialize(&winner.serialize(&SensorV1 { id: 1, celsius: 20.5 })?)?;
    assert_eq!(
        back,
        SensorV2 {
            id: 1,
            location: String::new(),
        }
    );
    Ok(())
}

/// Two writers race to append the same new shapes. The loser finds them in the winner's
/// block and appends nothing.
#[test]
fn test_same_shape_append_race() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let snapshot = log.load_all()?;

    let winner = Evocode::builder().register::<SensorV1>().storage(log.clone()).build()?;
    let size = log.len()?;

    let racing = Arc::new(StaleFirstLoad::new(log.clone(), snapshot));
    let loser = Evocode::builder()
        .register::<SensorV1>()
        .storage(racing.clone())
        .build()?;
    assert_eq!(racing.conflicts.load(Ordering::SeqCst), 1);

    assert_eq!(log.len()?, size, "no duplicate block");
    assert_eq!(loser.versioning().blocks().len(), winner.versioning().blocks().len());
    assert_eq!(loser.latest_block(), winner.latest_block());
    assert_eq!(loser.contents_id_of::<SensorV1>()?, winner.contents_id_of::<SensorV1>()?);

    let bytes = loser.serialize(&SensorV1 { id: 4, celsius: 1.5 })?;
    assert_eq!(winner.deserialize::<SensorV1>(&bytes)?, SensorV1 { id: 4, celsius: 1.5 });
    Ok(())
}

#[test]
fn test_retry_budget_is_bounded() {
    let log = Arc::new(MemoryStorage::new());
    let snapshot = log.load_all().unwrap();
    let _winner = Evocode::builder().register::<SensorV1>().storage(log.clone()).build().unwrap();

    let result = Evocode::builder()
        .register::<SensorV2>()
        .storage(StaleFirstLoad::new(log, snapshot))
        .init_attempts(1)
        .build();
    assert!(matches!(result, Err(EvocodeError::Storage(_))));
}

#[test]
fn test_unknown_block_triggers_one_reload() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let reader = Evocode::builder().register::<SensorV1>().storage(log.clone()).build()?;
    let writer = Evocode::builder().register::<SensorV2>().storage(log.clone()).build()?;

    let bytes = writer.serialize(&SensorV2 {
        id: 3,
        location: "cellar".to_string(),
    })?;
    let block = writer.read_header(&bytes)?.block.unwrap();
    assert!(!reader.versioning().blocks().contains(block));

    let read: SensorV1 = reader.deserialize(&bytes)?;
    assert_eq!(read, SensorV1 { id: 3, celsius: 0.0 });
    assert!(reader.versioning().blocks().contains(block));
    Ok(())
}

#[test]
fn test_missing_block_is_reported() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<SensorV1>().build()?;
    let mut bytes = codec.serialize(&SensorV1::default())?;
    let block = codec.latest_block().unwrap();

    // Full header: [tag][u32 block id LE][schema]...
    bytes[1..5].copy_from_slice(&(block.0 ^ 1).to_le_bytes());
    let err = codec.deserialize::<SensorV1>(&bytes).unwrap_err();
    assert!(matches!(err, EvocodeError::Deserialization(ref msg) if msg.contains("cannot find schemas for block")));
    Ok(())
}

#[test]
fn test_explicit_reload() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let early = Evocode::builder().storage(log.clone()).build()?;
    let blocks = early.versioning().blocks().len();

    let _late = Evocode::builder().register::<SensorV2>().storage(log.clone()).build()?;
    early.reload()?;
    assert_eq!(early.versioning().blocks().len(), blocks + 1);

    // Nothing changed since: reloading again is a no-op.
    early.reload()?;
    assert_eq!(early.versioning().blocks().len(), blocks + 1);
    Ok(())
}

#[test]
fn test_corrupt_log_is_fatal() {
    let log = Arc::new(MemoryStorage::new());
    log.try_append(b"definitely not a block", EntityTag::EMPTY).unwrap();
    let result = Evocode::builder().register::<SensorV1>().storage(log).build();
    assert!(matches!(result, Err(EvocodeError::CorruptLog(_))));
}

// --- FILE STORAGE ---

#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_file_storage_tags() -> evocode::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::new(dir.path().join("schemas.log"));

    assert_eq!(storage.current_tag()?, EntityTag::EMPTY);
    assert_eq!(storage.load_all()?, (Vec::new(), EntityTag::EMPTY));

    let tag = match storage.try_append(b"abc", EntityTag::EMPTY)? {
        AppendOutcome::Appended(tag) => tag,
        AppendOutcome::Conflict => unreachable!("empty log must accept the first append"),
    };
    assert_eq!(tag, tag_of(b"abc"));
    assert_eq!(storage.current_tag()?, tag);

    // A stale tag is refused and leaves the file untouched.
    assert_eq!(storage.try_append(b"def", EntityTag::EMPTY)?, AppendOutcome::Conflict);
    assert_eq!(storage.load_all()?.0, b"abc".to_vec());

    assert!(matches!(storage.try_append(b"def", tag)?, AppendOutcome::Appended(_)));
    assert_eq!(storage.load_all()?, (b"abcdef".to_vec(), tag_of(b"abcdef")));
    Ok(())
}

#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_file_storage_across_processes() -> evocode::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("schemas.log");

    let bytes = {
        let codec = Evocode::builder()
            .register::<SensorV1>()
            .storage(FileStorage::new(&path))
            .build()?;
        codec.serialize(&SensorV1 { id: 9, celsius: -4.5 })?
    };
    let size = std::fs::metadata(&path)?.len();

    // A later process with the same types appends nothing and reads the old message.
    let restarted = Evocode::builder()
        .register::<SensorV1>()
        .storage(FileStorage::new(&path))
        .build()?;
    assert_eq!(std::fs::metadata(&path)?.len(), size);
    assert_eq!(restarted.deserialize::<SensorV1>(&bytes)?, SensorV1 { id: 9, celsius: -4.5 });

    // A newer version appends its shapes and still reads the old message.
    let upgraded = Evocode::builder()
        .register::<SensorV2>()
        .storage(FileStorage::new(&path))
        .build()?;
    assert!(std::fs::metadata(&path)?.len() > size);
    assert_eq!(upgraded.deserialize::<SensorV2>(&bytes)?.id, 9);
    Ok(())
}

/// Every successful append saw a distinct log version, even across two handles on one file.
#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_file_storage_handles_share_one_append_gate() -> evocode::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("schemas.log");
    let handles = [FileStorage::new(&path), FileStorage::new(&path)];
    let observed = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for writer in 0..4u8 {
            let storage = &handles[usize::from(writer % 2)];
            let observed = &observed;
            scope.spawn(move || {
                for _ in 0..8 {
                    loop {
                        let (_, tag) = storage.load_all().unwrap();
                        if storage.try_append(&[writer], tag).unwrap() != AppendOutcome::Conflict {
                            observed.lock().unwrap().push(tag);
                            break;
                        }
                    }
                }
            });
        }
    });

    let observed = observed.into_inner().unwrap();
    assert_eq!(observed.len(), 32);
    assert_eq!(observed.iter().collect::<HashSet<_>>().len(), 32, "two appends passed one tag check");
    assert_eq!(handles[0].load_all()?.0.len(), 32);
    Ok(())
}

