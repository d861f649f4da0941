//! A directory of region files with per-chunk locking, retries and
//! lifecycle hooks.
//!
//! Region `(rx, rz)` lives in `r.<rx>.<rz>.mca`. Handles are opened on first
//! use and cached up to a limit; past it the least recently used idle handle
//! is closed. Loads never create region files; a missing file reads as an
//! absent chunk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use strata_config::{RetryConfig, StorageConfig};

use crate::chunk::{Chunk, ChunkPos, SAVE_DIRTY};
use crate::codec;
use crate::error::{FileError, FileOperation, StorageError};
use crate::region::{RegionFile, RegionOptions, SectorLocation};

/// Region handles kept open when no limit is configured.
pub const DEFAULT_MAX_OPEN_REGIONS: usize = 64;

/// Callbacks fired as chunks enter and leave memory.
pub trait ChunkLifecycle: Send + Sync {
    /// Called after a chunk has been read from disk.
    fn on_chunk_loaded(&self, _chunk: &Chunk) {}

    /// Called after an unloading chunk has been flushed, before it is dropped.
    fn on_chunk_unloading(&self, _chunk: &Chunk) {}
}

/// How often and how patiently a failed load or save is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

struct CachedRegion {
    file: Arc<RegionFile>,
    last_used: AtomicU64,
}

/// Persistent chunk storage rooted at a world directory.
pub struct ChunkStore {
    dir: PathBuf,
    options: RegionOptions,
    retry: RetryPolicy,
    max_open_regions: usize,
    clock: AtomicU64,
    regions: DashMap<(i32, i32), CachedRegion>,
    slot_locks: DashMap<ChunkPos, Arc<Mutex<()>>>,
    hooks: Vec<Arc<dyn ChunkLifecycle>>,
}

impl ChunkStore {
    /// Opens a store over `dir`, creating the directory if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        options: RegionOptions,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| FileError::new(FileOperation::Create, &dir, e))?;
        tracing::debug!(dir = %dir.display(), compression = ?options.compression, "opened chunk store");
        Ok(Self {
            dir,
            options,
            retry,
            max_open_regions: DEFAULT_MAX_OPEN_REGIONS,
            clock: AtomicU64::new(0),
            regions: DashMap::new(),
            slot_locks: DashMap::new(),
            hooks: Vec::new(),
        })
    }

    /// Opens the store described by `config`.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let options = RegionOptions {
            compression: config.compression.into(),
            level: config.compression_level,
            sync_writes: config.sync_writes,
        };
        Ok(Self::open(&config.world_dir, options, RetryPolicy::from(&config.retry))?
            .with_max_open_regions(config.max_open_regions))
    }

    /// Caps the number of cached region handles. Never below 1.
    pub fn with_max_open_regions(mut self, limit: usize) -> Self {
        self.max_open_regions = limit.max(1);
        self
    }

    /// Registers a lifecycle hook. Hooks fire in registration order.
    pub fn add_lifecycle(&mut self, hook: Arc<dyn ChunkLifecycle>) {
        self.hooks.push(hook);
    }

    /// Path of region file `(rx, rz)`.
    pub fn region_path(&self, rx: i32, rz: i32) -> PathBuf {
        self.dir.join(format!("r.{rx}.{rz}.mca"))
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Options used for every region file.
    pub fn options(&self) -> RegionOptions {
        self.options
    }

    /// Number of region files currently open.
    pub fn open_regions(&self) -> usize {
        self.regions.len()
    }

    /// Number of chunk positions with a live slot lock.
    pub fn locked_slots(&self) -> usize {
        self.slot_locks.len()
    }

    /// Returns the handle for region `(rx, rz)`, opening or creating the file.
    pub fn region(&self, rx: i32, rz: i32) -> Result<Arc<RegionFile>, StorageError> {
        if let Some(cached) = self.regions.get(&(rx, rz)) {
            return Ok(self.touch(&cached));
        }
        if self.regions.len() >= self.max_open_regions {
            self.evict_idle_regions();
        }
        match self.regions.entry((rx, rz)) {
            Entry::Occupied(entry) => Ok(self.touch(entry.get())),
            Entry::Vacant(entry) => {
                let file = Arc::new(RegionFile::open_with(self.region_path(rx, rz), self.options)?);
                entry.insert(CachedRegion {
                    file: Arc::clone(&file),
                    last_used: AtomicU64::new(self.tick()),
                });
                Ok(file)
            }
        }
    }

    /// Like [`region`](Self::region), but `None` if the file does not exist.
    fn existing_region(&self, rx: i32, rz: i32) -> Result<Option<Arc<RegionFile>>, StorageError> {
        if let Some(cached) = self.regions.get(&(rx, rz)) {
            return Ok(Some(self.touch(&cached)));
        }
        if !self.region_path(rx, rz).exists() {
            return Ok(None);
        }
        self.region(rx, rz).map(Some)
    }

    /// Loads the chunk at `pos`.
    ///
    /// Returns `Ok(None)` only when no chunk was ever saved there. Read and
    /// decode failures are retried and surface as
    /// [`StorageError::ChunkFailed`].
    pub fn load(&self, pos: ChunkPos) -> Result<Option<Chunk>, StorageError> {
        let (rx, rz) = pos.region();
        let chunk = self.with_slot(pos, || {
            self.with_retry(pos, "load", || match self.existing_region(rx, rz)? {
                Some(region) => region.load_chunk(pos.x, pos.z),
                None => Ok(None),
            })
        })?;

        if let Some(chunk) = &chunk {
            if chunk.position() != pos {
                tracing::warn!(
                    x = pos.x,
                    z = pos.z,
                    stored = %chunk.position(),
                    "chunk payload records a different position"
                );
            }
            for hook in &self.hooks {
                hook.on_chunk_loaded(chunk);
            }
        }
        Ok(chunk)
    }

    /// Writes `chunk` to its slot and clears its save flag.
    pub fn save(&self, chunk: &mut Chunk) -> Result<SectorLocation, StorageError> {
        let frame = self.encode(chunk)?;
        let location = self.write_frame(chunk.position(), &frame)?;
        chunk.clear_dirty(SAVE_DIRTY);
        Ok(location)
    }

    /// Flushes a chunk that is about to leave memory.
    ///
    /// Dirty chunks are saved first. Lifecycle hooks see the chunk after the
    /// save. Returns the encoded codec frame either way. On error the chunk
    /// is untouched and still dirty, so the caller can keep it resident.
    pub fn unload(&self, chunk: &mut Chunk) -> Result<Vec<u8>, StorageError> {
        let pos = chunk.position();
        let frame = self.encode(chunk)?;
        if chunk.is_dirty(SAVE_DIRTY) {
            self.write_frame(pos, &frame)?;
            chunk.clear_dirty(SAVE_DIRTY);
        }
        for hook in &self.hooks {
            hook.on_chunk_unloading(chunk);
        }
        tracing::debug!(x = pos.x, z = pos.z, bytes = frame.len(), "chunk unloaded");
        Ok(frame)
    }

    /// Removes the chunk at `pos` from disk. Returns `false` if it was absent.
    pub fn delete(&self, pos: ChunkPos) -> Result<bool, StorageError> {
        let (rx, rz) = pos.region();
        self.with_slot(pos, || match self.existing_region(rx, rz)? {
            Some(region) => region.delete_chunk(pos.x, pos.z),
            None => Ok(false),
        })
    }

    /// Returns `true` if a chunk is stored at `pos`.
    pub fn contains(&self, pos: ChunkPos) -> Result<bool, StorageError> {
        let (rx, rz) = pos.region();
        Ok(self
            .existing_region(rx, rz)?
            .is_some_and(|region| region.has_chunk(pos.x, pos.z)))
    }

    /// Serializes and compresses `chunk`. Encoding failures are not retried.
    fn encode(&self, chunk: &Chunk) -> Result<Vec<u8>, StorageError> {
        self.with_retry(chunk.position(), "encode", || {
            Ok(codec::compress_with_level(
                chunk,
                self.options.compression,
                self.options.level,
            )?)
        })
    }

    fn write_frame(&self, pos: ChunkPos, frame: &[u8]) -> Result<SectorLocation, StorageError> {
        let (rx, rz) = pos.region();
        self.with_slot(pos, || {
            self.with_retry(pos, "save", || {
                self.region(rx, rz)?
                    .save_raw(pos.x, pos.z, self.options.compression, frame)
            })
        })
    }

    /// Runs `f` holding the lock for `pos`. The lock entry is dropped once
    /// no other caller holds or waits on it.
    fn with_slot<T>(&self, pos: ChunkPos, f: impl FnOnce() -> T) -> T {
        let slot = Arc::clone(self.slot_locks.entry(pos).or_default().value());
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(slot);
        self.slot_locks
            .remove_if(&pos, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn touch(&self, cached: &CachedRegion) -> Arc<RegionFile> {
        cached.last_used.store(self.tick(), Ordering::Relaxed);
        Arc::clone(&cached.file)
    }

    /// Closes least recently used handles that no caller holds until the
    /// cache is below its limit. Handles in use are never closed, so two
    /// handles for one file never coexist.
    fn evict_idle_regions(&self) {
        let mut idle: Vec<((i32, i32), u64)> = self
            .regions
            .iter()
            .filter(|entry| Arc::strong_count(&entry.file) == 1)
            .map(|entry| (*entry.key(), entry.last_used.load(Ordering::Relaxed)))
            .collect();
        idle.sort_unstable_by_key(|&(_, last_used)| last_used);

        for (key, _) in idle {
            if self.regions.len() < self.max_open_regions {
                break;
            }
            if self
                .regions
                .remove_if(&key, |_, cached| Arc::strong_count(&cached.file) == 1)
                .is_some()
            {
                tracing::debug!(rx = key.0, rz = key.1, "closed idle region file");
            }
        }
    }

    fn with_retry<T>(
        &self,
        pos: ChunkPos,
        operation: &'static str,
        mut attempt_once: impl FnMut() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut delay = self.retry.backoff;
        let mut attempt = 1;
        loop {
            match attempt_once() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        x = pos.x,
                        z = pos.z,
                        attempt,
                        error = %error,
                        "chunk {operation} failed, retrying in {delay:?}"
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        x = pos.x,
                        z = pos.z,
                        attempts = attempt,
                        error = %error,
                        "chunk {operation} failed"
                    );
                    return Err(StorageError::ChunkFailed {
                        x: pos.x,
                        z: pos.z,
                        source: Box::new(error),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
