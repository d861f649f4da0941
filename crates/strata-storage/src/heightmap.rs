//! Per-column height maps.
//!
//! Each map stores, for all 256 `(x, z)` columns of a chunk, one plus the Y of
//! the highest block matching the map's predicate, or 0 when nothing in the
//! column matches. Values range over `0..=256` and are packed at 9 bits.

use crate::bit_storage::{BitStorage, BitStorageError};
use crate::block::{BlockRegistry, BlockStateId};

/// Columns per chunk (16 × 16).
pub const COLUMNS: usize = 256;

/// Bits per stored height.
pub const HEIGHT_BITS: u8 = 9;

/// The four tracked height maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeightMapKind {
    /// Highest solid or fluid block.
    MotionBlocking,
    /// Highest solid non-leaf block, or fluid.
    MotionBlockingNoLeaves,
    /// Highest solid block.
    OceanFloor,
    /// Highest non-air block.
    WorldSurface,
}

impl HeightMapKind {
    /// Every kind, in serialization order.
    pub const ALL: [Self; 4] = [
        Self::MotionBlocking,
        Self::MotionBlockingNoLeaves,
        Self::OceanFloor,
        Self::WorldSurface,
    ];

    /// Whether `id` caps a column for this map.
    pub fn matches(self, registry: &BlockRegistry, id: BlockStateId) -> bool {
        match self {
            Self::MotionBlocking => registry.is_solid(id) || registry.is_fluid(id),
            Self::MotionBlockingNoLeaves => {
                (registry.is_solid(id) && !registry.is_leaves(id)) || registry.is_fluid(id)
            }
            Self::OceanFloor => registry.is_solid(id),
            Self::WorldSurface => !id.is_air(),
        }
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::MotionBlocking => "MOTION_BLOCKING",
            Self::MotionBlockingNoLeaves => "MOTION_BLOCKING_NO_LEAVES",
            Self::OceanFloor => "OCEAN_FLOOR",
            Self::WorldSurface => "WORLD_SURFACE",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::MotionBlocking => 0,
            Self::MotionBlockingNoLeaves => 1,
            Self::OceanFloor => 2,
            Self::WorldSurface => 3,
        }
    }
}

/// Column index for local `(x, z)`.
pub fn column_index(x: usize, z: usize) -> usize {
    z * 16 + x
}

/// The four height maps of a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeightMaps {
    maps: [BitStorage; 4],
}

impl HeightMaps {
    /// All columns at height 0.
    pub fn new() -> Self {
        let empty = || BitStorage::zeroed(HEIGHT_BITS, COLUMNS);
        Self {
            maps: [empty(), empty(), empty(), empty()],
        }
    }

    /// Rebuilds from decoded storages, checking each has 256 9-bit entries.
    pub fn from_storages(maps: [BitStorage; 4]) -> Result<Self, BitStorageError> {
        for map in &maps {
            if map.bits() != HEIGHT_BITS {
                return Err(BitStorageError::InvalidWidth(map.bits()));
            }
            if map.len() != COLUMNS {
                return Err(BitStorageError::InvalidData(format!(
                    "height map holds {} columns, expected {COLUMNS}",
                    map.len()
                )));
            }
        }
        Ok(Self { maps })
    }

    /// Height stored for column `(x, z)`.
    pub fn get(&self, kind: HeightMapKind, x: usize, z: usize) -> u16 {
        self.maps[kind.slot()]
            .get(column_index(x, z))
            .map_or(0, |value| value as u16)
    }

    /// The packed storage of one map.
    pub fn storage(&self, kind: HeightMapKind) -> &BitStorage {
        &self.maps[kind.slot()]
    }

    /// Recomputes every map for column `(x, z)` by scanning `block_at(y)` from
    /// `top - 1` down to 0.
    pub fn update_column(
        &mut self,
        registry: &BlockRegistry,
        x: usize,
        z: usize,
        top: usize,
        block_at: impl Fn(usize) -> BlockStateId,
    ) -> Result<(), BitStorageError> {
        let mut heights = [0u32; 4];
        let mut pending = HeightMapKind::ALL.len();
        for y in (0..top).rev() {
            let id = block_at(y);
            if id.is_air() {
                continue;
            }
            for kind in HeightMapKind::ALL {
                let slot = kind.slot();
                if heights[slot] == 0 && kind.matches(registry, id) {
                    heights[slot] = y as u32 + 1;
                    pending -= 1;
                }
            }
            if pending == 0 {
                break;
            }
        }
        let index = column_index(x, z);
        for (map, height) in self.maps.iter_mut().zip(heights) {
            map.set(index, height)?;
        }
        Ok(())
    }
}

impl Default for HeightMaps {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDef;

    struct Palette {
        registry: BlockRegistry,
        stone: BlockStateId,
        water: BlockStateId,
        leaves: BlockStateId,
        flower: BlockStateId,
    }

    fn palette() -> Palette {
        let mut registry = BlockRegistry::new();
        let stone = registry.register(BlockDef::solid("stone")).unwrap();
        let water = registry.register(BlockDef::fluid("water")).unwrap();
        let leaves = registry.register(BlockDef::leaves("leaves")).unwrap();
        let flower = registry.register(BlockDef::passable("flower")).unwrap();
        Palette {
            registry,
            stone,
            water,
            leaves,
            flower,
        }
    }

    #[test]
    fn test_empty_column_is_zero() {
        let p = palette();
        let mut maps = HeightMaps::new();
        maps.update_column(&p.registry, 3, 4, 256, |_| BlockStateId::AIR)
            .unwrap();
        for kind in HeightMapKind::ALL {
            assert_eq!(maps.get(kind, 3, 4), 0);
        }
    }

    #[test]
    fn test_predicates_over_layered_column() {
        let p = palette();
        // stone 0..=60, water 61..=63, leaves at 70, flower at 80.
        let column = |y: usize| match y {
            0..=60 => p.stone,
            61..=63 => p.water,
            70 => p.leaves,
            80 => p.flower,
            _ => BlockStateId::AIR,
        };
        let mut maps = HeightMaps::new();
        maps.update_column(&p.registry, 0, 0, 256, column).unwrap();

        let mut no_leaves = HeightMaps::new();
        no_leaves
            .update_column(&p.registry, 1, 0, 256, |y| if y == 70 { BlockStateId::AIR } else { column(y) })
            .unwrap();
        assert_eq!(no_leaves.get(HeightMapKind::OceanFloor, 1, 0), 61);

        assert_eq!(maps.get(HeightMapKind::WorldSurface, 0, 0), 81);
        assert_eq!(maps.get(HeightMapKind::MotionBlocking, 0, 0), 71);
        assert_eq!(maps.get(HeightMapKind::MotionBlockingNoLeaves, 0, 0), 64);
        // Leaves count as solid, so they still cap the ocean floor map.
        assert_eq!(maps.get(HeightMapKind::OceanFloor, 0, 0), 71);
    }

    #[test]
    fn test_top_of_world_stores_256() {
        let p = palette();
        let mut maps = HeightMaps::new();
        maps.update_column(&p.registry, 15, 15, 256, |_| p.stone)
            .unwrap();
        assert_eq!(maps.get(HeightMapKind::OceanFloor, 15, 15), 256);
        assert_eq!(maps.storage(HeightMapKind::OceanFloor).bits(), 9);
    }

    #[test]
    fn test_from_storages_rejects_wrong_shape() {
        let good = || BitStorage::new(HEIGHT_BITS, COLUMNS).unwrap();
        let bad = BitStorage::new(8, COLUMNS).unwrap();
        assert!(HeightMaps::from_storages([good(), good(), good(), bad]).is_err());
        assert!(HeightMaps::from_storages([good(), good(), good(), good()]).is_ok());
    }
}
