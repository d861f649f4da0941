//! Central owner for all loaded chunks, keyed by [`ChunkPos`].
//!
//! The [`ChunkManager`] provides O(1) chunk lookup, insert, and removal
//! using an [`FxHashMap`](rustc_hash::FxHashMap), and world-coordinate block
//! access over whatever is resident.

use rustc_hash::FxHashMap;

use crate::block::BlockStateId;
use crate::chunk::{Chunk, ChunkPos, SAVE_DIRTY, WORLD_HEIGHT};
use crate::error::StorageError;
use crate::section::SECTION_SIZE;
use crate::store::ChunkStore;

/// Owns all currently-loaded chunks.
#[derive(Default)]
pub struct ChunkManager {
    chunks: FxHashMap<ChunkPos, Chunk>,
}

impl ChunkManager {
    /// Creates an empty chunk manager with no loaded chunks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a chunk under its own position, returning any chunk it replaced.
    pub fn insert(&mut self, chunk: Chunk) -> Option<Chunk> {
        self.chunks.insert(chunk.position(), chunk)
    }

    /// Removes and returns the chunk at `pos`.
    pub fn remove(&mut self, pos: ChunkPos) -> Option<Chunk> {
        self.chunks.remove(&pos)
    }

    /// Immutable access to a loaded chunk.
    pub fn get(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    /// Mutable access to a loaded chunk.
    pub fn get_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        self.chunks.get_mut(&pos)
    }

    /// Returns `true` if a chunk is resident at `pos`.
    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Number of currently loaded chunks.
    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterates over all loaded `(position, chunk)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ChunkPos, &Chunk)> {
        self.chunks.iter()
    }

    /// Iterates over positions of chunks that have the given dirty flag set.
    pub fn iter_dirty(&self, flag: u8) -> impl Iterator<Item = &ChunkPos> {
        self.chunks
            .iter()
            .filter(move |(_, chunk)| chunk.is_dirty(flag))
            .map(|(pos, _)| pos)
    }

    /// Block at world coordinates. Unloaded chunks and heights outside the
    /// world read as air.
    pub fn get_block(&self, x: i32, y: usize, z: i32) -> BlockStateId {
        if y >= WORLD_HEIGHT {
            return BlockStateId::AIR;
        }
        let (pos, lx, lz) = split(x, z);
        self.chunks
            .get(&pos)
            .and_then(|chunk| chunk.get_block(lx, y, lz).ok())
            .unwrap_or(BlockStateId::AIR)
    }

    /// Sets the block at world coordinates.
    ///
    /// Fails with [`StorageError::ChunkNotLoaded`] if the chunk is not
    /// resident.
    pub fn set_block(
        &mut self,
        x: i32,
        y: usize,
        z: i32,
        id: BlockStateId,
    ) -> Result<(), StorageError> {
        let (pos, lx, lz) = split(x, z);
        let chunk = self
            .chunks
            .get_mut(&pos)
            .ok_or(StorageError::ChunkNotLoaded { x: pos.x, z: pos.z })?;
        Ok(chunk.set_block(lx, y, lz, id)?)
    }

    /// Loads `pos` from `store` into memory unless it is already resident.
    ///
    /// Returns `false` if the store has no chunk there.
    pub fn load_from(&mut self, store: &ChunkStore, pos: ChunkPos) -> Result<bool, StorageError> {
        if self.is_loaded(pos) {
            return Ok(true);
        }
        match store.load(pos)? {
            Some(chunk) => {
                self.chunks.insert(pos, chunk);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flushes `pos` through [`ChunkStore::unload`] and drops it from memory.
    ///
    /// Returns the encoded frame, or `None` if the chunk was not loaded. If
    /// the flush fails the chunk stays resident and dirty.
    pub fn unload_to(
        &mut self,
        store: &ChunkStore,
        pos: ChunkPos,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(chunk) = self.chunks.get_mut(&pos) else {
            return Ok(None);
        };
        let frame = store.unload(chunk)?;
        self.chunks.remove(&pos);
        Ok(Some(frame))
    }

    /// Saves every chunk with [`SAVE_DIRTY`] set. Returns how many were saved.
    ///
    /// Stops at the first failure; chunks saved before it stay clean.
    pub fn flush_dirty(&mut self, store: &ChunkStore) -> Result<usize, StorageError> {
        let mut saved = 0;
        for chunk in self.chunks.values_mut() {
            if chunk.is_dirty(SAVE_DIRTY) {
                store.save(chunk)?;
                saved += 1;
            }
        }
        if saved > 0 {
            tracing::debug!(saved, "flushed dirty chunks");
        }
        Ok(saved)
    }
}

/// Chunk position and in-chunk column of world block `(x, z)`.
fn split(x: i32, z: i32) -> (ChunkPos, usize, usize) {
    let size = SECTION_SIZE as i32;
    (
        ChunkPos::containing(x, z),
        ((x % size + size) % size) as usize,
        ((z % size + size) % size) as usize,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
