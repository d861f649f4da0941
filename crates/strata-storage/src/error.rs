//! Error types shared across the storage layer.

use std::path::PathBuf;

use crate::bit_storage::BitStorageError;
use crate::block::RegistryError;
use crate::codec::{CompressionError, CompressionPhase};
use crate::palette::PalettedContainerError;

/// Errors raised by in-memory chunk operations.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Local coordinates outside `0..16 × 0..256 × 0..16`.
    #[error("block ({x}, {y}, {z}) is outside the chunk")]
    OutOfBounds {
        /// Local X.
        x: usize,
        /// Local Y.
        y: usize,
        /// Local Z.
        z: usize,
    },
    /// A light slot outside `0..18`.
    #[error("light slot {0} does not exist")]
    InvalidLightSlot(usize),
    /// A cell index outside a section's 4096 cells.
    #[error("cell index {0} is outside the section")]
    InvalidCellIndex(usize),
    /// A section container rejected the operation.
    #[error(transparent)]
    Container(#[from] PalettedContainerError),
    /// A height map could not be updated.
    #[error("height map update failed: {0}")]
    HeightMap(#[from] BitStorageError),
}

/// The kind of file operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOperation {
    /// Reading bytes.
    Read,
    /// Writing or flushing bytes.
    Write,
    /// Creating or opening a file or directory.
    Create,
    /// Removing a file.
    Delete,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Delete => "delete",
        })
    }
}

/// An I/O failure at a filesystem boundary.
#[derive(Debug, thiserror::Error)]
#[error("failed to {operation} {}: {source}", .path.display())]
pub struct FileError {
    /// What was being attempted.
    pub operation: FileOperation,
    /// File involved.
    pub path: PathBuf,
    /// Underlying I/O error.
    #[source]
    pub source: std::io::Error,
}

impl FileError {
    /// Wraps an I/O error with its operation and path.
    pub fn new(operation: FileOperation, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Errors specific to the region file format.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// The compressed chunk needs more sectors than a location entry can hold.
    #[error("chunk needs {sectors} sectors, limit is 255")]
    ChunkTooLarge {
        /// Sectors the payload would occupy.
        sectors: usize,
    },
    /// The sector offset no longer fits the 24-bit location field.
    #[error("region file is full: sector offset {offset} exceeds 24 bits")]
    RegionFull {
        /// First sector the allocation would have used.
        offset: usize,
    },
    /// The per-chunk length prefix disagrees with the sectors allocated.
    #[error("chunk ({x}, {z}) declares {length} payload bytes in {available} available")]
    InvalidLength {
        /// Chunk X within the region.
        x: i32,
        /// Chunk Z within the region.
        z: i32,
        /// Declared length.
        length: usize,
        /// Bytes covered by the allocated sectors.
        available: usize,
    },
    /// The compression-type byte names no known scheme.
    #[error("unknown compression type {0}")]
    UnknownCompression(u8),
}

/// Aggregate error for chunk persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error(transparent)]
    File(#[from] FileError),
    /// Region format violation.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// Codec failure.
    #[error(transparent)]
    Compression(#[from] CompressionError),
    /// In-memory chunk failure.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    /// Block registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The chunk is not resident in memory.
    #[error("chunk ({x}, {z}) is not loaded")]
    ChunkNotLoaded {
        /// Chunk X.
        x: i32,
        /// Chunk Z.
        z: i32,
    },
    /// A load or save failed after every retry.
    #[error("chunk ({x}, {z}) failed: {source}")]
    ChunkFailed {
        /// Chunk X.
        x: i32,
        /// Chunk Z.
        z: i32,
        /// Last error observed.
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Filesystem and decode failures may come from a torn or interrupted
    /// read, as may a length prefix that disagrees with its sectors. Encode
    /// failures, oversized chunks and a full region reproduce on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::File(error) => !matches!(
                error.source.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
            ),
            Self::Compression(error) => matches!(
                error.phase,
                CompressionPhase::Decompress | CompressionPhase::Deserialize
            ),
            Self::Region(RegionError::InvalidLength { .. }) => true,
            Self::ChunkFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
