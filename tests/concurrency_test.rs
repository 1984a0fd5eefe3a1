#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use evocode::storage::{AppendOutcome, EntityTag, SchemaStorage};
use evocode::{Evocode, Evolve, MemoryStorage};
use rayon::prelude::*;

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Node {
    #[evolve(id = 1)]
    value: i32,
    #[evolve(id = 2)]
    children: Vec<Node>,
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct NodeV2 {
    #[evolve(id = 1)]
    value: i64,
    #[evolve(id = 2)]
    children: Vec<NodeV2>,
    #[evolve(id = 3)]
    weight: f64,
}

/// Counts full loads of the shared log.
#[derive(Debug)]
struct CountingStorage {
    inner: Arc<MemoryStorage>,
    loads: AtomicUsize,
}

impl SchemaStorage for CountingStorage {
    fn load_all(&self) -> evocode::Result<(Vec<u8>, EntityTag)> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_all()
    }

    fn try_append(&self, bytes: &[u8], expected: EntityTag) -> evocode::Result<AppendOutcome> {
        self.inner.try_append(bytes, expected)
    }

    fn current_tag(&self) -> evocode::Result<EntityTag> {
        self.inner.current_tag()
    }
}

fn tree(depth: u32) -> Node {
    Node {
        value: depth as i32,
        children: if depth == 0 {
            Vec::new()
        } else {
            vec![tree(depth - 1), tree(depth - 1)]
        },
    }
}

fn codec() -> Evocode {
    Evocode::builder()
        .register::<Node>()
        .register::<NodeV2>()
        .build()
        .unwrap()
}

/// Parallel first-time requests for one converter all observe the same cached instance.
#[test]
fn test_parallel_first_requests_share_one_reader() -> evocode::Result<()> {
    let codec = codec();
    let schema = codec.schema_of::<Node>()?;

    let readers = (0..64)
        .into_par_iter()
        .map(|_| codec.deserializer::<NodeV2>(&schema))
        .collect::<evocode::Result<Vec<_>>>()?;

    let first = &readers[0];
    assert!(readers.iter().all(|r| r.ptr_eq(first)));
    assert!(codec.deserializer::<NodeV2>(&schema)?.ptr_eq(first));
    Ok(())
}

#[test]
fn test_parallel_deserialization() -> evocode::Result<()> {
    let codec = codec();
    let messages = (0..32)
        .map(|depth| codec.serialize(&tree(depth % 6)))
        .collect::<evocode::Result<Vec<_>>>()?;

    let results = messages
        .par_iter()
        .map(|bytes| codec.deserialize::<NodeV2>(bytes))
        .collect::<evocode::Result<Vec<_>>>()?;

    for (i, node) in results.iter().enumerate() {
        assert_eq!(node.value, (i % 6) as i64);
        assert_eq!(node.children.len(), if i % 6 == 0 { 0 } else { 2 });
        assert_eq!(node.weight, 0.0);
    }
    Ok(())
}

/// Readers racing on a block none of them has seen collapse into one reload.
#[test]
fn test_parallel_missing_block_discovery() -> evocode::Result<()> {
    let log = Arc::new(MemoryStorage::new());
    let counting = Arc::new(CountingStorage {
        inner: log.clone(),
        loads: AtomicUsize::new(0),
    });
    let reader = Evocode::builder().register::<Node>().storage(counting.clone()).build()?;
    let writer = Evocode::builder().register::<NodeV2>().storage(log.clone()).build()?;
    let blocks = reader.versioning().blocks().len();
    let loads = counting.loads.load(Ordering::SeqCst);

    let bytes = writer.serialize(&NodeV2 {
        value: 1,
        children: vec![NodeV2::default()],
        weight: 2.0,
    })?;

    let results = (0..16)
        .into_par_iter()
        .map(|_| reader.deserialize::<Node>(&bytes))
        .collect::<evocode::Result<Vec<_>>>()?;
    assert!(results.iter().all(|n| n.value == 1 && n.children.len() == 1));
    assert_eq!(reader.versioning().blocks().len(), blocks + 1);
    assert_eq!(counting.loads.load(Ordering::SeqCst), loads + 1, "one reload for all readers");
    Ok(())
}
