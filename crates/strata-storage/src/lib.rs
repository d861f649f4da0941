//! Chunk storage engine: bit-packed palettes, sections and chunks, a
//! compression codec, sector-addressed region files, and the store and
//! worker pool that persist chunks through them.

pub mod bit_storage;
pub mod block;
pub mod chunk;
pub mod chunk_manager;
pub mod chunk_serial;
pub mod codec;
pub mod error;
pub mod heightmap;
pub mod io_pool;
pub mod light;
pub mod nibble;
pub mod palette;
pub mod region;
pub mod section;
pub mod store;

pub use bit_storage::{BitStorage, BitStorageError};
pub use block::{BlockDef, BlockRegistry, BlockStateId, RegistryError};
pub use chunk::{
    BlockEntity, Chunk, ChunkMetadata, ChunkPos, ChunkStatus, ChunkVersion, HEIGHTMAP_DIRTY,
    LIGHT_DIRTY, SAVE_DIRTY,
};
pub use chunk_manager::ChunkManager;
pub use chunk_serial::ChunkSerError;
pub use codec::{Compression, CompressionError, CompressionPhase, compress, decompress};
pub use error::{ChunkError, FileError, FileOperation, RegionError, StorageError};
pub use heightmap::{HeightMapKind, HeightMaps};
pub use io_pool::{IoJob, IoJobKind, IoResult, IoWorkerPool};
pub use light::{ChunkLighting, LightKind};
pub use nibble::NibbleArray;
pub use palette::{PalettedContainer, PalettedContainerError};
pub use region::{RegionEntry, RegionFile, RegionOptions, RegionReport, SectorLocation};
pub use section::ChunkSection;
pub use store::{ChunkLifecycle, ChunkStore, RetryPolicy};
