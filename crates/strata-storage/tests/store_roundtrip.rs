use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use strata_storage::{
    BlockStateId, Chunk, ChunkLifecycle, ChunkManager, ChunkPos, ChunkStore, IoJob, IoResult,
    IoWorkerPool, RegionOptions, RetryPolicy, SAVE_DIRTY,
};

fn open_store(dir: &std::path::Path) -> ChunkStore {
    let options = RegionOptions {
        sync_writes: false,
        ..RegionOptions::default()
    };
    let retry = RetryPolicy {
        max_attempts: 2,
        backoff: Duration::from_millis(1),
    };
    ChunkStore::open(dir, options, retry).unwrap()
}

#[derive(Default)]
struct LoadCounter(AtomicUsize);

impl ChunkLifecycle for LoadCounter {
    fn on_chunk_loaded(&self, _chunk: &Chunk) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_threads_share_one_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(dir.path());
    let counter = Arc::new(LoadCounter::default());
    store.add_lifecycle(counter.clone());
    let store = Arc::new(store);

    std::thread::scope(|scope| {
        for t in 0..4i32 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..8 {
                    // Threads interleave within regions (-1, 0) and (0, 0).
                    let pos = ChunkPos::new(i * 5 - 16, t);
                    let mut chunk = Chunk::new(pos);
                    chunk
                        .set_block(0, 0, 0, BlockStateId((t * 8 + i + 1) as u32))
                        .unwrap();
                    store.save(&mut chunk).unwrap();
                    let loaded = store.load(pos).unwrap().unwrap();
                    assert_eq!(loaded, chunk);
                }
            });
        }
    });

    assert_eq!(counter.0.load(Ordering::Relaxed), 32);
    assert_eq!(store.open_regions(), 2);
    assert!(store.region_path(-1, 0).exists());
}

#[test]
fn test_manager_and_pool_persist_edits() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()));
    let pool = IoWorkerPool::new(Arc::clone(&store), 2, 32).unwrap();

    let mut manager = ChunkManager::new();
    for x in -2..2 {
        for z in -2..2 {
            manager.insert(Chunk::new(ChunkPos::new(x, z)));
        }
    }
    for x in -32..32 {
        manager.set_block(x, 64, x / 2, BlockStateId(3)).unwrap();
    }
    let dirty: Vec<ChunkPos> = manager.iter_dirty(SAVE_DIRTY).copied().collect();
    assert!(!dirty.is_empty());
    for pos in &dirty {
        let chunk = manager.remove(*pos).unwrap();
        pool.submit(IoJob::Save(chunk)).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut returned = 0;
    while returned < dirty.len() && Instant::now() < deadline {
        if let Some(IoResult::Saved { chunk, result }) = pool.recv_timeout(Duration::from_millis(50))
        {
            result.unwrap();
            manager.insert(chunk);
            returned += 1;
        }
    }
    assert_eq!(returned, dirty.len());
    assert_eq!(manager.iter_dirty(SAVE_DIRTY).count(), 0);
    drop(pool);

    let mut reloaded = ChunkManager::new();
    for pos in &dirty {
        assert!(reloaded.load_from(&store, *pos).unwrap());
    }
    for x in -32..32 {
        assert_eq!(reloaded.get_block(x, 64, x / 2), BlockStateId(3), "x = {x}");
    }
}
