//! Palette-compressed block-state storage.
//!
//! A [`PalettedContainer`] maps the few distinct block states of a section to
//! small indices stored in a [`BitStorage`]. The index width grows as new
//! states arrive. Once a palette would need more than 8 bits per index the
//! container switches to direct mode, where raw block-state ids are stored in
//! 14-bit entries and no palette exists. Direct mode is never left again.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::bit_storage::{BitStorage, BitStorageError, MIN_BITS};
use crate::block::BlockStateId;

/// Entry width used in direct mode.
pub const DIRECT_BITS: u8 = 14;

/// Largest block-state id any container can hold.
pub const MAX_DIRECT_ID: u32 = (1 << DIRECT_BITS) - 1;

/// Widest index before the container switches to direct mode.
pub const MAX_INDEXED_BITS: u8 = 8;

/// Number of cells in a 16×16×16 section.
pub const SECTION_VOLUME: usize = 4096;

/// Errors produced by [`PalettedContainer`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PalettedContainerError {
    /// The palette holds more entries than its index width can address.
    #[error("palette of {len} entries overflows {bits}-bit indices")]
    PaletteOverflow {
        /// Palette length.
        len: usize,
        /// Current index width.
        bits: u8,
    },
    /// A decoded palette lists the same state twice.
    #[error("palette lists block state {0} more than once")]
    DuplicateEntry(u32),
    /// The block-state id cannot be represented in direct-mode storage.
    #[error("block state {0} exceeds the direct-mode id range")]
    InvalidBlockState(u32),
    /// The underlying bit storage rejected the operation.
    #[error(transparent)]
    Storage(#[from] BitStorageError),
}

/// Block-state storage in one of two shapes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PalettedContainer {
    /// Storage values are indices into `palette`.
    Indexed {
        /// Distinct states in first-seen order; position is the encoded index.
        palette: Vec<BlockStateId>,
        /// Packed palette indices.
        storage: BitStorage,
    },
    /// Storage values are block-state ids.
    Direct {
        /// Packed 14-bit block-state ids.
        storage: BitStorage,
    },
}

impl PalettedContainer {
    /// Creates an all-air container of `size` cells with 4-bit indices.
    pub fn new(size: usize) -> Result<Self, PalettedContainerError> {
        Self::new_filled(size, BlockStateId::AIR)
    }

    /// Creates a container whose every cell holds `fill`.
    pub fn new_filled(size: usize, fill: BlockStateId) -> Result<Self, PalettedContainerError> {
        check_id(fill)?;
        Ok(Self::Indexed {
            palette: vec![fill],
            storage: BitStorage::new(MIN_BITS, size)?,
        })
    }

    /// Reassembles a container from decoded parts, checking they agree.
    ///
    /// `palette` is `None` for direct mode. An indexed palette must list each
    /// state once.
    pub fn from_raw_parts(
        palette: Option<Vec<BlockStateId>>,
        storage: BitStorage,
    ) -> Result<Self, PalettedContainerError> {
        match palette {
            Some(palette) => {
                let bits = storage.bits();
                if bits > MAX_INDEXED_BITS || palette.len() > 1usize << bits {
                    return Err(PalettedContainerError::PaletteOverflow {
                        len: palette.len(),
                        bits,
                    });
                }
                let mut seen = FxHashSet::default();
                for &id in &palette {
                    check_id(id)?;
                    if !seen.insert(id) {
                        return Err(PalettedContainerError::DuplicateEntry(id.0));
                    }
                }
                Ok(Self::Indexed { palette, storage })
            }
            None => {
                if storage.bits() != DIRECT_BITS {
                    return Err(BitStorageError::InvalidWidth(storage.bits()).into());
                }
                Ok(Self::Direct { storage })
            }
        }
    }

    /// Returns the block state at `index`.
    ///
    /// In indexed mode a stored index past the end of the palette resolves to
    /// air instead of failing, so a truncated palette degrades the section
    /// rather than aborting a world load.
    pub fn get(&self, index: usize) -> Result<BlockStateId, PalettedContainerError> {
        match self {
            Self::Indexed { palette, storage } => {
                let value = storage.get(index)?;
                Ok(palette.get(value as usize).copied().unwrap_or_else(|| {
                    tracing::warn!(
                        index,
                        palette_index = value,
                        palette_len = palette.len(),
                        "palette index out of range, resolving to air"
                    );
                    BlockStateId::AIR
                }))
            }
            Self::Direct { storage } => Ok(BlockStateId(storage.get(index)?)),
        }
    }

    /// Stores `id` at `index`, growing the palette and index width as needed.
    pub fn set(&mut self, index: usize, id: BlockStateId) -> Result<(), PalettedContainerError> {
        if index >= self.len() {
            return Err(BitStorageError::IndexOutOfBounds {
                index,
                size: self.len(),
            }
            .into());
        }
        check_id(id)?;
        let value = self.encode(id)?;
        self.storage_mut().set(index, value)?;
        Ok(())
    }

    /// Current bits per entry.
    pub fn bits(&self) -> u8 {
        self.storage().bits()
    }

    /// Returns `true` once the container stores raw ids.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    /// The palette, or `None` in direct mode.
    pub fn palette(&self) -> Option<&[BlockStateId]> {
        match self {
            Self::Indexed { palette, .. } => Some(palette),
            Self::Direct { .. } => None,
        }
    }

    /// The packed storage.
    pub fn storage(&self) -> &BitStorage {
        match self {
            Self::Indexed { storage, .. } | Self::Direct { storage } => storage,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.storage().len()
    }

    /// Always `false`; containers have at least one cell.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every cell's block state in index order.
    pub fn iter(&self) -> impl Iterator<Item = BlockStateId> + '_ {
        (0..self.len()).map(move |index| self.get(index).unwrap_or(BlockStateId::AIR))
    }

    /// Counts cells that are not air.
    pub fn count_non_air(&self) -> usize {
        self.iter().filter(|id| !id.is_air()).count()
    }

    fn storage_mut(&mut self) -> &mut BitStorage {
        match self {
            Self::Indexed { storage, .. } | Self::Direct { storage } => storage,
        }
    }

    /// Returns the storage value for `id`, appending it to the palette and
    /// widening storage first if it is new.
    fn encode(&mut self, id: BlockStateId) -> Result<u32, PalettedContainerError> {
        let overflow = match self {
            Self::Direct { .. } => return Ok(id.0),
            Self::Indexed { palette, storage } => {
                if let Some(position) = palette.iter().position(|&entry| entry == id) {
                    return Ok(position as u32);
                }
                palette.push(id);
                palette.len() > 1usize << storage.bits()
            }
        };
        if overflow {
            self.grow()?;
        }
        Ok(match self {
            Self::Indexed { palette, .. } => (palette.len() - 1) as u32,
            Self::Direct { .. } => id.0,
        })
    }

    /// Widens the index storage to fit the palette, or converts to direct mode.
    fn grow(&mut self) -> Result<(), PalettedContainerError> {
        let Self::Indexed { palette, storage } = self else {
            return Ok(());
        };
        let required = bits_for_palette_len(palette.len());
        if required > MAX_INDEXED_BITS {
            let mut direct = BitStorage::new(DIRECT_BITS, storage.len())?;
            for (index, value) in storage.iter().enumerate() {
                let id = palette
                    .get(value as usize)
                    .copied()
                    .unwrap_or(BlockStateId::AIR);
                direct.set(index, id.0)?;
            }
            tracing::debug!(
                palette_len = palette.len(),
                "palette exhausted, switching container to direct mode"
            );
            *self = Self::Direct { storage: direct };
        } else {
            tracing::trace!(from = storage.bits(), to = required, "widening palette indices");
            *storage = storage.resize(required)?;
        }
        Ok(())
    }
}

/// Index width for a palette of `len` entries, clamped to `4..=14`.
pub fn bits_for_palette_len(len: usize) -> u8 {
    let needed = if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as u8
    };
    needed.clamp(MIN_BITS, DIRECT_BITS)
}

fn check_id(id: BlockStateId) -> Result<(), PalettedContainerError> {
    if id.0 > MAX_DIRECT_ID {
        return Err(PalettedContainerError::InvalidBlockState(id.0));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_is_air_at_four_bits() {
        let container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        assert_eq!(container.bits(), 4);
        assert_eq!(container.palette(), Some(&[BlockStateId::AIR][..]));
        assert_eq!(container.get(0).unwrap(), BlockStateId::AIR);
        assert_eq!(container.get(4095).unwrap(), BlockStateId::AIR);
        assert_eq!(container.count_non_air(), 0);
    }

    #[test]
    fn test_bits_for_palette_len() {
        assert_eq!(bits_for_palette_len(1), 4);
        assert_eq!(bits_for_palette_len(16), 4);
        assert_eq!(bits_for_palette_len(17), 5);
        assert_eq!(bits_for_palette_len(32), 5);
        assert_eq!(bits_for_palette_len(33), 6);
        assert_eq!(bits_for_palette_len(256), 8);
        assert_eq!(bits_for_palette_len(257), 9);
        assert_eq!(bits_for_palette_len(100_000), 14);
    }

    #[test]
    fn test_existing_state_reuses_palette_entry() {
        let mut container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        container.set(0, BlockStateId(5)).unwrap();
        container.set(1, BlockStateId(5)).unwrap();
        assert_eq!(container.palette().unwrap().len(), 2);
        assert_eq!(container.storage().get(0).unwrap(), 1);
        assert_eq!(container.storage().get(1).unwrap(), 1);
    }

    #[test]
    fn test_seventeenth_state_widens_to_five_bits_once() {
        let mut container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        // Air plus 15 states fills the 16-entry capacity of 4-bit indices.
        for id in 1..=15u32 {
            container.set(id as usize, BlockStateId(id)).unwrap();
        }
        assert_eq!(container.palette().unwrap().len(), 16);
        assert_eq!(container.bits(), 4);

        container.set(16, BlockStateId(16)).unwrap();
        assert_eq!(container.palette().unwrap().len(), 17);
        assert_eq!(container.bits(), 5);

        for id in 0..=16u32 {
            assert_eq!(container.get(id as usize).unwrap(), BlockStateId(id));
        }
    }

    #[test]
    fn test_transition_to_direct_preserves_values() {
        let mut container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        // Ids are deliberately not equal to their palette positions.
        let id_for = |i: usize| BlockStateId(1000 + i as u32 * 3);
        for i in 0..256 {
            container.set(i, id_for(i)).unwrap();
        }
        // Palette is now air + 256 states = 257 entries: past 8 bits.
        assert!(container.is_direct());
        assert_eq!(container.bits(), DIRECT_BITS);
        assert!(container.palette().is_none());

        for i in 0..256 {
            assert_eq!(container.get(i).unwrap(), id_for(i));
        }
        for i in 256..SECTION_VOLUME {
            assert_eq!(container.get(i).unwrap(), BlockStateId::AIR);
        }
    }

    #[test]
    fn test_direct_mode_is_one_way() {
        let mut container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        for i in 0..300 {
            container.set(i, BlockStateId(i as u32 + 1)).unwrap();
        }
        assert!(container.is_direct());
        for i in 0..SECTION_VOLUME {
            container.set(i, BlockStateId::AIR).unwrap();
        }
        assert!(container.is_direct());
        assert_eq!(container.count_non_air(), 0);
    }

    #[test]
    fn test_widening_stays_indexed_up_to_eight_bits() {
        let mut container = PalettedContainer::new(SECTION_VOLUME).unwrap();
        for i in 1..256u32 {
            container.set(i as usize, BlockStateId(i)).unwrap();
        }
        assert!(!container.is_direct());
        assert_eq!(container.bits(), 8);
        assert_eq!(container.palette().unwrap().len(), 256);
    }

    #[test]
    fn test_out_of_range_palette_index_resolves_to_air() {
        let mut storage = BitStorage::new(4, 16).unwrap();
        storage.set(3, 9).unwrap();
        let container = PalettedContainer::from_raw_parts(
            Some(vec![BlockStateId::AIR, BlockStateId(7)]),
            storage,
        )
        .unwrap();
        assert_eq!(container.get(3).unwrap(), BlockStateId::AIR);
    }

    #[test]
    fn test_rejects_ids_beyond_direct_range() {
        let mut container = PalettedContainer::new(16).unwrap();
        let result = container.set(0, BlockStateId(MAX_DIRECT_ID + 1));
        assert_eq!(
            result,
            Err(PalettedContainerError::InvalidBlockState(MAX_DIRECT_ID + 1))
        );
        assert_eq!(container.palette().unwrap().len(), 1);
        container.set(0, BlockStateId(MAX_DIRECT_ID)).unwrap();
    }

    #[test]
    fn test_out_of_bounds_set_does_not_grow_palette() {
        let mut container = PalettedContainer::new(16).unwrap();
        let result = container.set(16, BlockStateId(3));
        assert!(matches!(
            result,
            Err(PalettedContainerError::Storage(
                BitStorageError::IndexOutOfBounds { .. }
            ))
        ));
        assert_eq!(container.palette().unwrap().len(), 1);
    }

    #[test]
    fn test_from_raw_parts_validates_shape() {
        let storage = BitStorage::new(4, 16).unwrap();
        let palette: Vec<_> = (0..17).map(BlockStateId).collect();
        assert!(matches!(
            PalettedContainer::from_raw_parts(Some(palette), storage.clone()),
            Err(PalettedContainerError::PaletteOverflow { len: 17, bits: 4 })
        ));
        let repeated = vec![BlockStateId::AIR, BlockStateId(3), BlockStateId(3)];
        assert!(matches!(
            PalettedContainer::from_raw_parts(Some(repeated), storage.clone()),
            Err(PalettedContainerError::DuplicateEntry(3))
        ));
        assert!(matches!(
            PalettedContainer::from_raw_parts(None, storage),
            Err(PalettedContainerError::Storage(
                BitStorageError::InvalidWidth(4)
            ))
        ));
    }
}
