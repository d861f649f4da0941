//! Block-state identifiers and the registry of per-state properties.
//!
//! The registry is built once during startup. Air is always ID 0 so that
//! zero-initialized section storage represents empty space. Height-map
//! predicates consult the registry to classify blocks as solid, fluid or
//! leaves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Global block-state identifier stored in every section cell.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockStateId(pub u32);

impl BlockStateId {
    /// The air block state.
    pub const AIR: Self = Self(0);

    /// Returns `true` for the air block state.
    pub fn is_air(self) -> bool {
        self == Self::AIR
    }
}

impl std::fmt::Display for BlockStateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Properties of a single block state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDef {
    /// Namespaced name (e.g. "minecraft:stone").
    pub name: String,
    /// Blocks movement.
    pub solid: bool,
    /// Water, lava and waterlogged states.
    pub fluid: bool,
    /// Leaf blocks, excluded from `MOTION_BLOCKING_NO_LEAVES`.
    pub leaves: bool,
}

impl BlockDef {
    /// A solid, non-fluid, non-leaf block.
    pub fn solid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solid: true,
            fluid: false,
            leaves: false,
        }
    }

    /// A non-solid fluid block.
    pub fn fluid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solid: false,
            fluid: true,
            leaves: false,
        }
    }

    /// A solid leaf block.
    pub fn leaves(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solid: true,
            fluid: false,
            leaves: true,
        }
    }

    /// A non-solid, non-fluid block such as a flower or torch.
    pub fn passable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            solid: false,
            fluid: false,
            leaves: false,
        }
    }
}

/// Errors that can occur during block registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A block with the same name has already been registered.
    #[error("duplicate block name: {0}")]
    DuplicateName(String),
    /// The direct-mode id space is exhausted.
    #[error("block registry is full (max {max} states)")]
    RegistryFull {
        /// Number of states that fit in direct-mode storage.
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps [`BlockStateId`] to [`BlockDef`] with O(1) lookup in both directions.
pub struct BlockRegistry {
    /// Dense array where `index == BlockStateId.0`.
    defs: Vec<BlockDef>,
    name_to_id: HashMap<String, BlockStateId>,
}

impl BlockRegistry {
    /// Creates a registry with air pre-registered as ID 0.
    pub fn new() -> Self {
        let air = BlockDef::passable("minecraft:air");
        let mut name_to_id = HashMap::new();
        name_to_id.insert(air.name.clone(), BlockStateId::AIR);
        Self {
            defs: vec![air],
            name_to_id,
        }
    }

    /// Registers a block state and returns its sequential ID.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] if the name is taken, or
    /// [`RegistryError::RegistryFull`] once every id that direct-mode section
    /// storage can hold has been assigned.
    pub fn register(&mut self, def: BlockDef) -> Result<BlockStateId, RegistryError> {
        if self.name_to_id.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        let max = crate::palette::MAX_DIRECT_ID as usize + 1;
        if self.defs.len() >= max {
            return Err(RegistryError::RegistryFull { max });
        }

        let id = BlockStateId(self.defs.len() as u32);
        self.name_to_id.insert(def.name.clone(), id);
        self.defs.push(def);
        Ok(id)
    }

    /// Returns the definition for `id`, or `None` if it was never registered.
    pub fn get(&self, id: BlockStateId) -> Option<&BlockDef> {
        self.defs.get(id.0 as usize)
    }

    /// Returns the ID for a registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<BlockStateId> {
        self.name_to_id.get(name).copied()
    }

    /// Number of registered states, including air.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.len() <= 1
    }

    /// Returns `true` if the state is air.
    pub fn is_air(&self, id: BlockStateId) -> bool {
        id.is_air()
    }

    /// Solid blocks. Unknown ids count as solid so that unregistered content
    /// still caps a column.
    pub fn is_solid(&self, id: BlockStateId) -> bool {
        if id.is_air() {
            return false;
        }
        self.get(id).is_none_or(|def| def.solid)
    }

    /// Fluid blocks. Unknown ids are not fluids.
    pub fn is_fluid(&self, id: BlockStateId) -> bool {
        self.get(id).is_some_and(|def| def.fluid)
    }

    /// Leaf blocks. Unknown ids are not leaves.
    pub fn is_leaves(&self, id: BlockStateId) -> bool {
        self.get(id).is_some_and(|def| def.leaves)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_id_zero() {
        let registry = BlockRegistry::new();
        let air = registry.get(BlockStateId::AIR).unwrap();
        assert_eq!(air.name, "minecraft:air");
        assert!(!air.solid);
        assert!(!registry.is_solid(BlockStateId::AIR));
        assert!(registry.is_air(BlockStateId(0)));
    }

    #[test]
    fn test_register_returns_sequential_ids() {
        let mut registry = BlockRegistry::new();
        let stone = registry.register(BlockDef::solid("minecraft:stone")).unwrap();
        let water = registry.register(BlockDef::fluid("minecraft:water")).unwrap();
        let leaves = registry
            .register(BlockDef::leaves("minecraft:oak_leaves"))
            .unwrap();
        assert_eq!(stone, BlockStateId(1));
        assert_eq!(water, BlockStateId(2));
        assert_eq!(leaves, BlockStateId(3));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = BlockRegistry::new();
        let id = registry
            .register(BlockDef::solid("minecraft:obsidian"))
            .unwrap();
        assert_eq!(registry.lookup_by_name("minecraft:obsidian"), Some(id));
        assert_eq!(registry.lookup_by_name("minecraft:nonexistent"), None);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = BlockRegistry::new();
        registry.register(BlockDef::solid("minecraft:stone")).unwrap();
        let result = registry.register(BlockDef::solid("minecraft:stone"));
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn test_classification() {
        let mut registry = BlockRegistry::new();
        let water = registry.register(BlockDef::fluid("minecraft:water")).unwrap();
        let leaves = registry
            .register(BlockDef::leaves("minecraft:birch_leaves"))
            .unwrap();
        let flower = registry
            .register(BlockDef::passable("minecraft:poppy"))
            .unwrap();

        assert!(registry.is_fluid(water) && !registry.is_solid(water));
        assert!(registry.is_leaves(leaves) && registry.is_solid(leaves));
        assert!(!registry.is_solid(flower) && !registry.is_fluid(flower));

        let unknown = BlockStateId(999);
        assert!(registry.is_solid(unknown));
        assert!(!registry.is_fluid(unknown));
        assert!(!registry.is_leaves(unknown));
    }
}
