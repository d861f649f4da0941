//! A 16×256×16 chunk column with height maps, lighting and dirty tracking.
//!
//! [`Chunk`] owns sixteen [`ChunkSection`]s stacked bottom to top. Block
//! writes go through [`Chunk::set_block`], which bounds-checks local
//! coordinates, raises dirty flags and marks the written column stale so that
//! [`Chunk::recalculate_height_maps`] only rescans columns that changed.
//!
//! Dirty flags, the mutation counter and the stale-column set are runtime
//! state. They are not serialized and do not take part in equality.

use serde::{Deserialize, Serialize};

use crate::block::{BlockRegistry, BlockStateId};
use crate::error::ChunkError;
use crate::heightmap::{COLUMNS, HeightMapKind, HeightMaps, column_index};
use crate::light::{ChunkLighting, LightKind};
use crate::section::{ChunkSection, SECTION_SIZE};

/// Sections per chunk column.
pub const SECTION_COUNT: usize = 16;

/// Height of the world in blocks.
pub const WORLD_HEIGHT: usize = SECTION_COUNT * SECTION_SIZE;

/// Current binary layout version written by this build.
pub const CURRENT_FORMAT: u16 = 1;

/// Dirty-flag bit: chunk needs saving to disk.
pub const SAVE_DIRTY: u8 = 0b0000_0001;
/// Dirty-flag bit: lighting needs recomputation.
pub const LIGHT_DIRTY: u8 = 0b0000_0010;
/// Dirty-flag bit: some height-map columns are stale.
pub const HEIGHTMAP_DIRTY: u8 = 0b0000_0100;

const BLOCK_WRITE_DIRTY: u8 = SAVE_DIRTY | LIGHT_DIRTY | HEIGHTMAP_DIRTY;

// ---------------------------------------------------------------------------
// Coordinates and metadata
// ---------------------------------------------------------------------------

/// Chunk coordinates in chunk units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
}

impl ChunkPos {
    /// Creates a position.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk containing world block `(x, z)`.
    pub fn containing(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(SECTION_SIZE as i32),
            z: block_z.div_euclid(SECTION_SIZE as i32),
        }
    }

    /// Coordinates of the region file holding this chunk.
    pub fn region(self) -> (i32, i32) {
        (self.x >> 5, self.z >> 5)
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Data-format and game version that produced a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkVersion {
    /// Binary layout version.
    pub format: u16,
    /// Version of the game logic that last wrote the chunk.
    pub game_version: u32,
}

impl Default for ChunkVersion {
    fn default() -> Self {
        Self {
            format: CURRENT_FORMAT,
            game_version: 0,
        }
    }
}

/// World-generation progress of a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkStatus {
    /// Nothing generated yet.
    #[default]
    Empty,
    /// Structure starts placed.
    Structures,
    /// Base terrain shaped.
    Noise,
    /// Surface blocks applied.
    Surface,
    /// Caves and ravines carved.
    Carvers,
    /// Decorations placed.
    Features,
    /// Light computed.
    Light,
    /// Ready for play.
    Full,
}

impl ChunkStatus {
    /// Wire tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Empty,
            1 => Self::Structures,
            2 => Self::Noise,
            3 => Self::Surface,
            4 => Self::Carvers,
            5 => Self::Features,
            6 => Self::Light,
            7 => Self::Full,
            _ => return None,
        })
    }
}

/// Timestamps and generation status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Unix seconds when generation finished.
    pub generated_at: u64,
    /// Unix seconds of the last modification.
    pub last_modified: u64,
    /// Accumulated ticks players have spent in the chunk.
    pub inhabited_time: u64,
    /// Generation status.
    pub status: ChunkStatus,
}

/// Extra per-block state owned by game logic, such as a chest's contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntity {
    /// Type identifier, e.g. "minecraft:chest".
    pub id: String,
    /// World X.
    pub x: i32,
    /// World Y.
    pub y: i32,
    /// World Z.
    pub z: i32,
    /// Opaque payload.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A full chunk column.
#[derive(Clone, Debug)]
pub struct Chunk {
    position: ChunkPos,
    version: ChunkVersion,
    metadata: ChunkMetadata,
    sections: Vec<ChunkSection>,
    height_maps: HeightMaps,
    lighting: ChunkLighting,
    block_entities: Vec<BlockEntity>,
    dirty: u8,
    mutations: u64,
    stale: [u64; COLUMNS / 64],
}

impl Chunk {
    /// An all-air chunk at `position` with no stored light.
    pub fn new(position: ChunkPos) -> Self {
        Self {
            position,
            version: ChunkVersion::default(),
            metadata: ChunkMetadata::default(),
            sections: (0..SECTION_COUNT as u8).map(ChunkSection::new).collect(),
            height_maps: HeightMaps::new(),
            lighting: ChunkLighting::new(),
            block_entities: Vec::new(),
            dirty: 0,
            mutations: 0,
            stale: [0; COLUMNS / 64],
        }
    }

    /// Assembles a chunk from decoded parts. Runtime state starts clean.
    pub(crate) fn from_raw_parts(
        position: ChunkPos,
        version: ChunkVersion,
        metadata: ChunkMetadata,
        sections: Vec<ChunkSection>,
        height_maps: HeightMaps,
        lighting: ChunkLighting,
        block_entities: Vec<BlockEntity>,
    ) -> Self {
        debug_assert_eq!(sections.len(), SECTION_COUNT);
        Self {
            position,
            version,
            metadata,
            sections,
            height_maps,
            lighting,
            block_entities,
            dirty: 0,
            mutations: 0,
            stale: [0; COLUMNS / 64],
        }
    }

    /// Block state at local `(x, y, z)`.
    pub fn get_block(&self, x: usize, y: usize, z: usize) -> Result<BlockStateId, ChunkError> {
        check_bounds(x, y, z)?;
        Ok(self.sections[y / SECTION_SIZE].get_block(x, y % SECTION_SIZE, z)?)
    }

    /// Stores a block state at local `(x, y, z)`.
    ///
    /// Raises every dirty flag, bumps the mutation counter and marks the
    /// column's height maps stale.
    pub fn set_block(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        id: BlockStateId,
    ) -> Result<(), ChunkError> {
        check_bounds(x, y, z)?;
        self.sections[y / SECTION_SIZE].set_block(x, y % SECTION_SIZE, z, id)?;
        let column = column_index(x, z);
        self.stale[column / 64] |= 1 << (column % 64);
        self.dirty |= BLOCK_WRITE_DIRTY;
        self.mutations += 1;
        Ok(())
    }

    /// Recomputes height maps for columns written since the last call.
    ///
    /// Returns the number of columns rescanned.
    pub fn recalculate_height_maps(&mut self, registry: &BlockRegistry) -> Result<usize, ChunkError> {
        let stale = std::mem::take(&mut self.stale);
        let mut updated = 0;
        for column in 0..COLUMNS {
            if stale[column / 64] & (1 << (column % 64)) != 0 {
                self.update_column(registry, column % 16, column / 16)?;
                updated += 1;
            }
        }
        self.dirty &= !HEIGHTMAP_DIRTY;
        if updated > 0 {
            tracing::trace!(chunk = %self.position, columns = updated, "height maps updated");
        }
        Ok(updated)
    }

    /// Recomputes every column of every height map.
    pub fn recalculate_all_height_maps(&mut self, registry: &BlockRegistry) -> Result<(), ChunkError> {
        self.stale = [u64::MAX; COLUMNS / 64];
        self.recalculate_height_maps(registry)?;
        Ok(())
    }

    /// Number of columns waiting for a height-map rescan.
    pub fn stale_columns(&self) -> usize {
        self.stale.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Height stored for local column `(x, z)`.
    pub fn height(&self, kind: HeightMapKind, x: usize, z: usize) -> u16 {
        self.height_maps.get(kind, x, z)
    }

    /// Light level at local `(x, y, z)`, falling back to the kind's default.
    pub fn light(&self, kind: LightKind, x: usize, y: usize, z: usize) -> Result<u8, ChunkError> {
        check_bounds(x, y, z)?;
        let slot = ChunkLighting::slot_for_section(y / SECTION_SIZE);
        Ok(self
            .lighting
            .level(kind, slot, ChunkSection::index(x, y % SECTION_SIZE, z)))
    }

    /// Writes a light level at local `(x, y, z)`.
    pub fn set_light(
        &mut self,
        kind: LightKind,
        x: usize,
        y: usize,
        z: usize,
        level: u8,
    ) -> Result<(), ChunkError> {
        check_bounds(x, y, z)?;
        let slot = ChunkLighting::slot_for_section(y / SECTION_SIZE);
        self.lighting
            .set_level(kind, slot, ChunkSection::index(x, y % SECTION_SIZE, z), level)?;
        self.dirty |= SAVE_DIRTY;
        self.dirty &= !LIGHT_DIRTY;
        self.mutations += 1;
        Ok(())
    }

    /// Adds a block entity, replacing any existing one at the same position.
    pub fn put_block_entity(&mut self, entity: BlockEntity) {
        self.remove_block_entity(entity.x, entity.y, entity.z);
        self.block_entities.push(entity);
        self.dirty |= SAVE_DIRTY;
        self.mutations += 1;
    }

    /// Removes and returns the block entity at world `(x, y, z)`.
    pub fn remove_block_entity(&mut self, x: i32, y: i32, z: i32) -> Option<BlockEntity> {
        let position = self
            .block_entities
            .iter()
            .position(|entity| (entity.x, entity.y, entity.z) == (x, y, z))?;
        self.dirty |= SAVE_DIRTY;
        self.mutations += 1;
        Some(self.block_entities.remove(position))
    }

    /// Chunk coordinates.
    pub fn position(&self) -> ChunkPos {
        self.position
    }

    /// Format and game version.
    pub fn version(&self) -> ChunkVersion {
        self.version
    }

    /// Timestamps and status.
    pub fn metadata(&self) -> &ChunkMetadata {
        &self.metadata
    }

    /// Mutable timestamps and status. Marks the chunk for saving.
    pub fn metadata_mut(&mut self) -> &mut ChunkMetadata {
        self.dirty |= SAVE_DIRTY;
        &mut self.metadata
    }

    /// The sixteen sections, bottom first.
    pub fn sections(&self) -> &[ChunkSection] {
        &self.sections
    }

    /// Mutable access to one section for bulk edits.
    ///
    /// Callers must follow up with [`Chunk::recalculate_all_height_maps`];
    /// writes made here are not tracked per column.
    pub fn section_mut(&mut self, index: usize) -> Option<&mut ChunkSection> {
        self.dirty |= BLOCK_WRITE_DIRTY;
        self.mutations += 1;
        self.sections.get_mut(index)
    }

    /// Height maps.
    pub fn height_maps(&self) -> &HeightMaps {
        &self.height_maps
    }

    /// Sky and block light.
    pub fn lighting(&self) -> &ChunkLighting {
        &self.lighting
    }

    /// Mutable light arrays. Marks the chunk for saving.
    pub fn lighting_mut(&mut self) -> &mut ChunkLighting {
        self.dirty |= SAVE_DIRTY;
        &mut self.lighting
    }

    /// Block entities in insertion order.
    pub fn block_entities(&self) -> &[BlockEntity] {
        &self.block_entities
    }

    /// Returns the current dirty flags.
    pub fn dirty_flags(&self) -> u8 {
        self.dirty
    }

    /// Returns `true` if the specified dirty flag (or combination) is set.
    pub fn is_dirty(&self, flag: u8) -> bool {
        self.dirty & flag == flag
    }

    /// Sets the specified dirty flag bits.
    pub fn mark_dirty(&mut self, flags: u8) {
        self.dirty |= flags;
    }

    /// Clears the specified dirty flag bits.
    pub fn clear_dirty(&mut self, flags: u8) {
        self.dirty &= !flags;
    }

    /// Monotonic counter incremented by every mutation.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Returns `true` if every section is air.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(ChunkSection::is_empty)
    }

    fn update_column(
        &mut self,
        registry: &BlockRegistry,
        x: usize,
        z: usize,
    ) -> Result<(), ChunkError> {
        let sections = &self.sections;
        let top = sections
            .iter()
            .rposition(|section| !section.is_empty())
            .map_or(0, |index| (index + 1) * SECTION_SIZE);
        self.height_maps.update_column(registry, x, z, top, |y| {
            sections[y / SECTION_SIZE]
                .get_block(x, y % SECTION_SIZE, z)
                .unwrap_or(BlockStateId::AIR)
        })?;
        Ok(())
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.version == other.version
            && self.metadata == other.metadata
            && self.sections == other.sections
            && self.height_maps == other.height_maps
            && self.lighting == other.lighting
            && self.block_entities == other.block_entities
    }
}

impl Eq for Chunk {}

fn check_bounds(x: usize, y: usize, z: usize) -> Result<(), ChunkError> {
    if x >= SECTION_SIZE || y >= WORLD_HEIGHT || z >= SECTION_SIZE {
        return Err(ChunkError::OutOfBounds { x, y, z });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
