//! One 16×16×16 slice of a chunk column.

use crate::bit_storage::{BitStorage, MIN_BITS};
use crate::block::BlockStateId;
use crate::error::ChunkError;
use crate::palette::{PalettedContainer, SECTION_VOLUME};

/// Side length of a section in blocks.
pub const SECTION_SIZE: usize = 16;

/// Cells in a biome container (4×4×4 cells of 4×4×4 blocks each).
pub const BIOME_VOLUME: usize = 64;

/// Side length of the biome grid.
const BIOME_SIZE: usize = 4;

/// Block states and biomes for one section.
///
/// Cells are addressed by `(y * 16 + z) * 16 + x`. A running count of
/// non-air blocks is kept in step with every write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSection {
    y: u8,
    block_states: PalettedContainer,
    biomes: Option<PalettedContainer>,
    non_air: usize,
}

impl ChunkSection {
    /// An all-air section at vertical index `y` (0..16), without biomes.
    pub fn new(y: u8) -> Self {
        Self {
            y,
            block_states: PalettedContainer::Indexed {
                palette: vec![BlockStateId::AIR],
                storage: BitStorage::zeroed(MIN_BITS, SECTION_VOLUME),
            },
            biomes: None,
            non_air: 0,
        }
    }

    /// Reassembles a section from decoded containers, counting non-air cells.
    pub fn from_parts(
        y: u8,
        block_states: PalettedContainer,
        biomes: Option<PalettedContainer>,
    ) -> Self {
        let non_air = block_states.count_non_air();
        Self {
            y,
            block_states,
            biomes,
            non_air,
        }
    }

    /// Linear cell index for local coordinates, each in `0..16`.
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < SECTION_SIZE && y < SECTION_SIZE && z < SECTION_SIZE);
        (y * SECTION_SIZE + z) * SECTION_SIZE + x
    }

    fn checked_index(x: usize, y: usize, z: usize) -> Result<usize, ChunkError> {
        if x >= SECTION_SIZE || y >= SECTION_SIZE || z >= SECTION_SIZE {
            return Err(ChunkError::OutOfBounds { x, y, z });
        }
        Ok(Self::index(x, y, z))
    }

    fn biome_index(x: usize, y: usize, z: usize) -> Result<usize, ChunkError> {
        if x >= BIOME_SIZE || y >= BIOME_SIZE || z >= BIOME_SIZE {
            return Err(ChunkError::OutOfBounds { x, y, z });
        }
        Ok((y * BIOME_SIZE + z) * BIOME_SIZE + x)
    }

    /// Vertical index of this section within the chunk.
    pub fn y(&self) -> u8 {
        self.y
    }

    /// Block state at local `(x, y, z)`.
    pub fn get_block(
        &self,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<BlockStateId, ChunkError> {
        Ok(self.block_states.get(Self::checked_index(x, y, z)?)?)
    }

    /// Stores a block state at local `(x, y, z)`, keeping the non-air count.
    pub fn set_block(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        id: BlockStateId,
    ) -> Result<(), ChunkError> {
        let index = Self::checked_index(x, y, z)?;
        let previous = self.block_states.get(index)?;
        self.block_states.set(index, id)?;
        match (previous.is_air(), id.is_air()) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        Ok(())
    }

    /// Number of non-air blocks.
    pub fn non_air_count(&self) -> usize {
        self.non_air
    }

    /// Returns `true` when every block is air.
    pub fn is_empty(&self) -> bool {
        self.non_air == 0
    }

    /// The block-state container.
    pub fn block_states(&self) -> &PalettedContainer {
        &self.block_states
    }

    /// The biome container, if this section carries biomes.
    pub fn biomes(&self) -> Option<&PalettedContainer> {
        self.biomes.as_ref()
    }

    /// Biome id at biome cell `(x, y, z)`, each in `0..4`.
    pub fn get_biome(
        &self,
        x: usize,
        y: usize,
        z: usize,
    ) -> Result<Option<u32>, ChunkError> {
        let index = Self::biome_index(x, y, z)?;
        match &self.biomes {
            Some(biomes) => Ok(Some(biomes.get(index)?.0)),
            None => Ok(None),
        }
    }

    /// Stores a biome id, creating the biome container on first use.
    pub fn set_biome(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        biome: u32,
    ) -> Result<(), ChunkError> {
        let index = Self::biome_index(x, y, z)?;
        if self.biomes.is_none() {
            self.biomes = Some(PalettedContainer::new(BIOME_VOLUME)?);
        }
        let Some(biomes) = self.biomes.as_mut() else {
            return Ok(());
        };
        Ok(biomes.set(index, BlockStateId(biome))?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_section_is_empty_air() {
        let section = ChunkSection::new(3);
        assert!(section.is_empty());
        assert_eq!(section.y(), 3);
        assert_eq!(section.get_block(15, 15, 15).unwrap(), BlockStateId::AIR);
        assert!(section.biomes().is_none());
    }

    #[test]
    fn test_index_layout() {
        assert_eq!(ChunkSection::index(0, 0, 0), 0);
        assert_eq!(ChunkSection::index(1, 0, 0), 1);
        assert_eq!(ChunkSection::index(0, 0, 1), 16);
        assert_eq!(ChunkSection::index(0, 1, 0), 256);
        assert_eq!(ChunkSection::index(15, 15, 15), 4095);
    }

    #[test]
    fn test_empty_flag_tracks_writes() {
        let mut section = ChunkSection::new(0);
        section.set_block(1, 2, 3, BlockStateId(4)).unwrap();
        section.set_block(4, 5, 6, BlockStateId(4)).unwrap();
        assert!(!section.is_empty());

        section.set_block(1, 2, 3, BlockStateId::AIR).unwrap();
        assert!(!section.is_empty());
        section.set_block(4, 5, 6, BlockStateId::AIR).unwrap();
        assert!(section.is_empty());
    }

    #[test]
    fn test_non_air_count_follows_overwrites() {
        let mut section = ChunkSection::new(0);
        section.set_block(0, 0, 0, BlockStateId(4)).unwrap();
        section.set_block(0, 0, 0, BlockStateId(5)).unwrap();
        section.set_block(1, 0, 0, BlockStateId(5)).unwrap();
        assert_eq!(section.non_air_count(), 2);
        section.set_block(2, 0, 0, BlockStateId::AIR).unwrap();
        assert_eq!(section.non_air_count(), 2);
        section.set_block(0, 0, 0, BlockStateId::AIR).unwrap();
        assert_eq!(section.non_air_count(), 1);
        assert_eq!(
            section.non_air_count(),
            section.block_states().count_non_air()
        );
    }

    #[test]
    fn test_out_of_range_coordinates_are_rejected() {
        let mut section = ChunkSection::new(0);
        assert!(matches!(
            section.get_block(16, 0, 0),
            Err(ChunkError::OutOfBounds { x: 16, y: 0, z: 0 })
        ));
        assert!(matches!(
            section.set_block(0, 0, 16, BlockStateId(1)),
            Err(ChunkError::OutOfBounds { .. })
        ));
        assert_eq!(section.get_block(0, 0, 1).unwrap(), BlockStateId::AIR);
        assert!(section.is_empty());

        assert!(matches!(
            section.set_biome(4, 0, 0, 1),
            Err(ChunkError::OutOfBounds { .. })
        ));
        assert!(section.biomes().is_none());
        assert!(section.get_biome(0, 4, 0).is_err());
    }

    #[test]
    fn test_biomes_created_lazily() {
        let mut section = ChunkSection::new(0);
        assert_eq!(section.get_biome(0, 0, 0).unwrap(), None);
        section.set_biome(3, 3, 3, 12).unwrap();
        assert_eq!(section.get_biome(3, 3, 3).unwrap(), Some(12));
        assert_eq!(section.get_biome(0, 0, 0).unwrap(), Some(0));
        assert_eq!(section.biomes().unwrap().len(), BIOME_VOLUME);
    }

    #[test]
    fn test_from_parts_derives_empty() {
        let mut blocks = PalettedContainer::new(SECTION_VOLUME).unwrap();
        let section = ChunkSection::from_parts(1, blocks.clone(), None);
        assert!(section.is_empty());
        blocks.set(10, BlockStateId(2)).unwrap();
        blocks.set(11, BlockStateId(3)).unwrap();
        let section = ChunkSection::from_parts(1, blocks, None);
        assert!(!section.is_empty());
        assert_eq!(section.non_air_count(), 2);
    }
}
