//! Per-chunk sky and block light.
//!
//! Each light kind keeps 18 optional nibble arrays: one boundary section
//! below the world, the 16 real sections, and one boundary section above.
//! A missing array is not stored data; reads fall back to the kind's default
//! level (sky fully lit, block unlit).

use crate::error::ChunkError;
use crate::nibble::{NIBBLE_ENTRIES, NibbleArray};

/// Light slots per kind: 16 sections plus one boundary on each side.
pub const LIGHT_SLOTS: usize = 18;

/// Highest light level.
pub const MAX_LIGHT: u8 = 15;

/// Which light channel an array belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Light from the sky.
    Sky,
    /// Light emitted by blocks.
    Block,
}

impl LightKind {
    /// Level reported for cells whose section has no stored array.
    pub fn default_level(self) -> u8 {
        match self {
            Self::Sky => MAX_LIGHT,
            Self::Block => 0,
        }
    }
}

/// Sky and block light arrays for one chunk column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkLighting {
    sky: [Option<NibbleArray>; LIGHT_SLOTS],
    block: [Option<NibbleArray>; LIGHT_SLOTS],
}

impl ChunkLighting {
    /// No stored arrays; every read returns the kind's default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for section `section_y` (0..16); slot 0 is the boundary below.
    pub fn slot_for_section(section_y: usize) -> usize {
        section_y + 1
    }

    /// The array stored at `slot`, if any.
    pub fn get(&self, kind: LightKind, slot: usize) -> Option<&NibbleArray> {
        self.slots(kind).get(slot).and_then(Option::as_ref)
    }

    /// Replaces (or clears, with `None`) the array at `slot`.
    pub fn set(
        &mut self,
        kind: LightKind,
        slot: usize,
        array: Option<NibbleArray>,
    ) -> Result<(), ChunkError> {
        *self.slot_mut(kind, slot)? = array;
        Ok(())
    }

    /// Light level at a cell, applying the kind's default for missing arrays.
    pub fn level(&self, kind: LightKind, slot: usize, index: usize) -> u8 {
        self.get(kind, slot)
            .map_or(kind.default_level(), |array| array.get(index))
    }

    /// Writes a level, materialising the slot's array from the default first.
    pub fn set_level(
        &mut self,
        kind: LightKind,
        slot: usize,
        index: usize,
        level: u8,
    ) -> Result<(), ChunkError> {
        if index >= NIBBLE_ENTRIES {
            return Err(ChunkError::InvalidCellIndex(index));
        }
        self.slot_mut(kind, slot)?
            .get_or_insert_with(|| NibbleArray::filled(kind.default_level()))
            .set(index, level);
        Ok(())
    }

    /// Number of slots holding an array, for the given kind.
    pub fn stored_count(&self, kind: LightKind) -> usize {
        self.slots(kind).iter().filter(|slot| slot.is_some()).count()
    }

    /// Drops arrays that only repeat the default level.
    pub fn prune_defaults(&mut self) {
        for kind in [LightKind::Sky, LightKind::Block] {
            let default = kind.default_level();
            for slot in self.slots_mut(kind).iter_mut() {
                if slot.as_ref().is_some_and(|array| array.is_uniform(default)) {
                    *slot = None;
                }
            }
        }
    }

    fn slot_mut(
        &mut self,
        kind: LightKind,
        slot: usize,
    ) -> Result<&mut Option<NibbleArray>, ChunkError> {
        self.slots_mut(kind)
            .get_mut(slot)
            .ok_or(ChunkError::InvalidLightSlot(slot))
    }

    fn slots(&self, kind: LightKind) -> &[Option<NibbleArray>; LIGHT_SLOTS] {
        match kind {
            LightKind::Sky => &self.sky,
            LightKind::Block => &self.block,
        }
    }

    fn slots_mut(&mut self, kind: LightKind) -> &mut [Option<NibbleArray>; LIGHT_SLOTS] {
        match kind {
            LightKind::Sky => &mut self.sky,
            LightKind::Block => &mut self.block,
        }
    }
}
