//! Binary serialization and deserialization for [`Chunk`].
//!
//! The SCNK format is a compact, versioned, little-endian layout. It is the
//! payload the codec compresses before a chunk is written to a region file.
//!
//! ## Binary Layout
//!
//! | Size | Field |
//! |------|-------|
//! | 4 | Magic bytes `"SCNK"` |
//! | 1 | Format version (`u8`, currently 1) |
//! | 8 | Position `x`, `z` (`i32` each) |
//! | 6 | Chunk version: format (`u16`), game version (`u32`) |
//! | 25 | Metadata: generated, modified, inhabited (`u64` each), status (`u8`) |
//! | … | 16 sections: `y` (`u8`), flags (`u8`, bit 0 = biomes), block container, optional biome container |
//! | … | 4 height maps: bits (`u8`), word count (`u32`), words |
//! | 8 | Light presence masks: sky, block (`u32`, bit *n* = slot *n*) |
//! | … | 2048 bytes per present light slot, sky slots first |
//! | … | Block entities: count (`u32`), then id (`u16` length + UTF-8), `x`, `y`, `z` (`i32`), data (`u32` length + bytes) |
//!
//! A container is encoded as mode (`u8`: 0 indexed, 1 direct), bits (`u8`),
//! palette length (`u16`) and `u32` ids (indexed only), then word count
//! (`u32`) and `u64` words.

use crate::bit_storage::BitStorage;
use crate::block::BlockStateId;
use crate::chunk::{
    BlockEntity, Chunk, ChunkMetadata, ChunkPos, ChunkStatus, ChunkVersion, SECTION_COUNT,
};
use crate::heightmap::{COLUMNS, HeightMapKind, HeightMaps};
use crate::light::{ChunkLighting, LIGHT_SLOTS, LightKind};
use crate::nibble::{NIBBLE_BYTES, NibbleArray};
use crate::palette::{PalettedContainer, SECTION_VOLUME};
use crate::section::{BIOME_VOLUME, ChunkSection};

/// Magic bytes identifying the SCNK format.
const MAGIC: [u8; 4] = *b"SCNK";

/// Current format version.
const FORMAT_VERSION: u8 = 1;

const MODE_INDEXED: u8 = 0;
const MODE_DIRECT: u8 = 1;

const SECTION_HAS_BIOMES: u8 = 0b0000_0001;

/// Errors that can occur during chunk deserialization.
#[derive(Debug, thiserror::Error)]
pub enum ChunkSerError {
    /// The data does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The data is shorter than expected.
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// A field holds a value the format does not allow.
    #[error("invalid chunk data: {0}")]
    InvalidData(String),
    /// A variable-length field does not fit its length prefix.
    #[error("{field} of {len} bytes exceeds the format limit of {max}")]
    FieldTooLong {
        /// Field that overflowed.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Largest length the prefix can hold.
        max: u64,
    },
}

impl Chunk {
    /// Serializes this chunk to a byte vector in the SCNK binary format.
    ///
    /// Fails with [`ChunkSerError::FieldTooLong`] before writing anything if a
    /// block entity id or payload does not fit its length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>, ChunkSerError> {
        let entity_count: u32 = length_prefix("block entity list", self.block_entities().len())?;
        let entity_lengths = self
            .block_entities()
            .iter()
            .map(|entity| {
                Ok((
                    length_prefix::<u16>("block entity id", entity.id.len())?,
                    length_prefix::<u32>("block entity data", entity.data.len())?,
                ))
            })
            .collect::<Result<Vec<_>, ChunkSerError>>()?;

        let mut buf = Vec::with_capacity(8 * 1024);

        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);

        let position = self.position();
        buf.extend_from_slice(&position.x.to_le_bytes());
        buf.extend_from_slice(&position.z.to_le_bytes());

        let version = self.version();
        buf.extend_from_slice(&version.format.to_le_bytes());
        buf.extend_from_slice(&version.game_version.to_le_bytes());

        let metadata = self.metadata();
        buf.extend_from_slice(&metadata.generated_at.to_le_bytes());
        buf.extend_from_slice(&metadata.last_modified.to_le_bytes());
        buf.extend_from_slice(&metadata.inhabited_time.to_le_bytes());
        buf.push(metadata.status.as_u8());

        for section in self.sections() {
            buf.push(section.y());
            let flags = if section.biomes().is_some() {
                SECTION_HAS_BIOMES
            } else {
                0
            };
            buf.push(flags);
            write_container(&mut buf, section.block_states());
            if let Some(biomes) = section.biomes() {
                write_container(&mut buf, biomes);
            }
        }

        for kind in HeightMapKind::ALL {
            let storage = self.height_maps().storage(kind);
            buf.push(storage.bits());
            write_words(&mut buf, storage.words());
        }

        let lighting = self.lighting();
        for kind in [LightKind::Sky, LightKind::Block] {
            let mask = (0..LIGHT_SLOTS)
                .filter(|&slot| lighting.get(kind, slot).is_some())
                .fold(0u32, |mask, slot| mask | (1 << slot));
            buf.extend_from_slice(&mask.to_le_bytes());
        }
        for kind in [LightKind::Sky, LightKind::Block] {
            for slot in 0..LIGHT_SLOTS {
                if let Some(array) = lighting.get(kind, slot) {
                    buf.extend_from_slice(array.as_bytes());
                }
            }
        }

        buf.extend_from_slice(&entity_count.to_le_bytes());
        for (entity, (id_len, data_len)) in self.block_entities().iter().zip(entity_lengths) {
            buf.extend_from_slice(&id_len.to_le_bytes());
            buf.extend_from_slice(entity.id.as_bytes());
            buf.extend_from_slice(&entity.x.to_le_bytes());
            buf.extend_from_slice(&entity.y.to_le_bytes());
            buf.extend_from_slice(&entity.z.to_le_bytes());
            buf.extend_from_slice(&data_len.to_le_bytes());
            buf.extend_from_slice(&entity.data);
        }

        Ok(buf)
    }

    /// Deserializes a chunk from a byte slice in the SCNK binary format.
    ///
    /// Returns an error if the data is corrupted, has an unrecognized version,
    /// is truncated, or carries trailing bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self, ChunkSerError> {
        if data.len() < 4 || data[0..4] != MAGIC {
            return Err(ChunkSerError::InvalidMagic);
        }
        let mut reader = Reader::new(data);
        reader.take(4)?;
        let version = reader.u8()?;
        if version != FORMAT_VERSION {
            return Err(ChunkSerError::UnsupportedVersion(version));
        }

        let position = ChunkPos::new(reader.i32()?, reader.i32()?);
        let chunk_version = ChunkVersion {
            format: reader.u16()?,
            game_version: reader.u32()?,
        };
        let generated_at = reader.u64()?;
        let last_modified = reader.u64()?;
        let inhabited_time = reader.u64()?;
        let status_tag = reader.u8()?;
        let status = ChunkStatus::from_u8(status_tag)
            .ok_or_else(|| invalid(format!("unknown chunk status {status_tag}")))?;
        let metadata = ChunkMetadata {
            generated_at,
            last_modified,
            inhabited_time,
            status,
        };

        let mut sections = Vec::with_capacity(SECTION_COUNT);
        for expected_y in 0..SECTION_COUNT as u8 {
            let y = reader.u8()?;
            if y != expected_y {
                return Err(invalid(format!("section {expected_y} is tagged y={y}")));
            }
            let flags = reader.u8()?;
            let block_states = read_container(&mut reader, SECTION_VOLUME)?;
            let biomes = if flags & SECTION_HAS_BIOMES != 0 {
                Some(read_container(&mut reader, BIOME_VOLUME)?)
            } else {
                None
            };
            sections.push(ChunkSection::from_parts(y, block_states, biomes));
        }

        let mut maps = Vec::with_capacity(HeightMapKind::ALL.len());
        for _ in HeightMapKind::ALL {
            let bits = reader.u8()?;
            let words = read_words(&mut reader)?;
            maps.push(BitStorage::from_words(bits, COLUMNS, words).map_err(to_invalid)?);
        }
        let maps: [BitStorage; 4] = maps
            .try_into()
            .map_err(|_| invalid("height map count mismatch".into()))?;
        let height_maps = HeightMaps::from_storages(maps).map_err(to_invalid)?;

        let sky_mask = reader.u32()?;
        let block_mask = reader.u32()?;
        let mut lighting = ChunkLighting::new();
        for (kind, mask) in [(LightKind::Sky, sky_mask), (LightKind::Block, block_mask)] {
            if mask >> LIGHT_SLOTS != 0 {
                return Err(invalid(format!("light mask {mask:#x} names missing slots")));
            }
            for slot in 0..LIGHT_SLOTS {
                if mask & (1 << slot) != 0 {
                    let bytes = reader.take(NIBBLE_BYTES)?;
                    let array = NibbleArray::from_bytes(bytes).map_err(to_invalid)?;
                    lighting.set(kind, slot, Some(array)).map_err(to_invalid)?;
                }
            }
        }

        let entity_count = reader.u32()? as usize;
        let mut block_entities = Vec::with_capacity(entity_count.min(1024));
        for _ in 0..entity_count {
            let id_len = reader.u16()? as usize;
            let id = std::str::from_utf8(reader.take(id_len)?)
                .map_err(to_invalid)?
                .to_owned();
            let (x, y, z) = (reader.i32()?, reader.i32()?, reader.i32()?);
            let data_len = reader.u32()? as usize;
            let data = reader.take(data_len)?.to_vec();
            block_entities.push(BlockEntity { id, x, y, z, data });
        }

        if reader.remaining() != 0 {
            return Err(invalid(format!("{} trailing bytes", reader.remaining())));
        }

        Ok(Chunk::from_raw_parts(
            position,
            chunk_version,
            metadata,
            sections,
            height_maps,
            lighting,
            block_entities,
        ))
    }
}

fn write_container(buf: &mut Vec<u8>, container: &PalettedContainer) {
    match container.palette() {
        Some(palette) => {
            buf.push(MODE_INDEXED);
            buf.push(container.bits());
            buf.extend_from_slice(&(palette.len() as u16).to_le_bytes());
            for id in palette {
                buf.extend_from_slice(&id.0.to_le_bytes());
            }
        }
        None => {
            buf.push(MODE_DIRECT);
            buf.push(container.bits());
            buf.extend_from_slice(&0u16.to_le_bytes());
        }
    }
    write_words(buf, container.storage().words());
}

fn write_words(buf: &mut Vec<u8>, words: &[u64]) {
    buf.extend_from_slice(&(words.len() as u32).to_le_bytes());
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
}

fn read_container(reader: &mut Reader<'_>, size: usize) -> Result<PalettedContainer, ChunkSerError> {
    let mode = reader.u8()?;
    let bits = reader.u8()?;
    let palette_len = reader.u16()? as usize;
    let palette = match mode {
        MODE_INDEXED => {
            if palette_len == 0 {
                return Err(invalid("empty palette".into()));
            }
            let mut palette = Vec::with_capacity(palette_len);
            for _ in 0..palette_len {
                palette.push(BlockStateId(reader.u32()?));
            }
            Some(palette)
        }
        MODE_DIRECT => {
            if palette_len != 0 {
                return Err(invalid(format!("direct container carries {palette_len} palette entries")));
            }
            None
        }
        other => return Err(invalid(format!("unknown container mode {other}"))),
    };
    let words = read_words(reader)?;
    let storage = BitStorage::from_words(bits, size, words).map_err(to_invalid)?;
    PalettedContainer::from_raw_parts(palette, storage).map_err(to_invalid)
}

fn read_words(reader: &mut Reader<'_>) -> Result<Vec<u64>, ChunkSerError> {
    let count = reader.u32()? as usize;
    let bytes = reader.take(count.saturating_mul(8))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|word| u64::from_le_bytes(word.try_into().unwrap_or([0; 8])))
        .collect())
}

/// Converts `len` to the integer type of its length prefix.
fn length_prefix<T>(field: &'static str, len: usize) -> Result<T, ChunkSerError>
where
    T: TryFrom<usize> + Into<u64> + Bounded,
{
    T::try_from(len).map_err(|_| ChunkSerError::FieldTooLong {
        field,
        len,
        max: T::MAX_PREFIX.into(),
    })
}

/// Integer types used as length prefixes.
trait Bounded: Sized {
    const MAX_PREFIX: Self;
}

impl Bounded for u16 {
    const MAX_PREFIX: Self = u16::MAX;
}

impl Bounded for u32 {
    const MAX_PREFIX: Self = u32::MAX;
}

fn invalid(message: String) -> ChunkSerError {
    ChunkSerError::InvalidData(message)
}

fn to_invalid(error: impl std::fmt::Display) -> ChunkSerError {
    ChunkSerError::InvalidData(error.to_string())
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ChunkSerError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ChunkSerError::Truncated {
                expected: self.offset.saturating_add(len),
                actual: self.data.len(),
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ChunkSerError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ChunkSerError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ChunkSerError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ChunkSerError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ChunkSerError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ChunkSerError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDef, BlockRegistry};

    fn populated_chunk() -> Chunk {
        let mut registry = BlockRegistry::new();
        let stone = registry.register(BlockDef::solid("minecraft:stone")).unwrap();
        let mut chunk = Chunk::new(ChunkPos::new(-7, 12));
        for x in 0..16 {
            for z in 0..16 {
                for y in 0..60 {
                    chunk.set_block(x, y, z, stone).unwrap();
                }
            }
        }
        chunk.set_block(4, 200, 4, BlockStateId(900)).unwrap();
        chunk.recalculate_height_maps(&registry).unwrap();
        chunk.set_light(LightKind::Sky, 0, 100, 0, 9).unwrap();
        chunk.set_light(LightKind::Block, 4, 200, 4, 14).unwrap();
        chunk
            .lighting_mut()
            .set(LightKind::Sky, 0, Some(NibbleArray::filled(3)))
            .unwrap();
        chunk.section_mut(5).unwrap().set_biome(1, 2, 3, 42).unwrap();
        chunk.put_block_entity(BlockEntity {
            id: "minecraft:sign".into(),
            x: -112,
            y: 70,
            z: 195,
            data: b"hello".to_vec(),
        });
        let metadata = chunk.metadata_mut();
        metadata.generated_at = 1_700_000_000;
        metadata.last_modified = 1_700_000_123;
        metadata.inhabited_time = 4000;
        metadata.status = ChunkStatus::Full;
        chunk
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let chunk = populated_chunk();
        let bytes = chunk.serialize().unwrap();
        let restored = Chunk::deserialize(&bytes).unwrap();
        assert_eq!(restored, chunk);
        assert_eq!(restored.dirty_flags(), 0);
        assert_eq!(restored.get_block(4, 200, 4).unwrap(), BlockStateId(900));
        assert_eq!(restored.sections()[5].get_biome(1, 2, 3).unwrap(), Some(42));
    }

    #[test]
    fn test_direct_mode_section_roundtrip() {
        let mut chunk = Chunk::new(ChunkPos::default());
        for i in 0..SECTION_VOLUME {
            chunk
                .set_block(i % 16, (i / 256) % 16, (i / 16) % 16, BlockStateId(i as u32 + 1))
                .unwrap();
        }
        assert!(chunk.sections()[0].block_states().is_direct());
        let restored = Chunk::deserialize(&chunk.serialize().unwrap()).unwrap();
        assert_eq!(restored, chunk);
    }

    #[test]
    fn test_header_bytes() {
        let bytes = Chunk::new(ChunkPos::default()).serialize().unwrap();
        assert_eq!(&bytes[0..4], b"SCNK");
        assert_eq!(bytes[4], 1, "format version should be 1");
    }

    #[test]
    fn test_corrupted_data_returns_error() {
        let result = Chunk::deserialize(&[0xFF, 0xFF]);
        assert!(
            matches!(result, Err(ChunkSerError::InvalidMagic)),
            "expected InvalidMagic, got {result:?}"
        );

        let result = Chunk::deserialize(b"SCNK\x63");
        assert!(
            matches!(result, Err(ChunkSerError::UnsupportedVersion(99))),
            "expected UnsupportedVersion(99), got {result:?}"
        );

        let bytes = populated_chunk().serialize().unwrap();
        let result = Chunk::deserialize(&bytes[..bytes.len() - 3]);
        assert!(
            matches!(result, Err(ChunkSerError::Truncated { .. })),
            "expected Truncated, got {result:?}"
        );

        let mut padded = bytes.clone();
        padded.push(0);
        let result = Chunk::deserialize(&padded);
        assert!(
            matches!(result, Err(ChunkSerError::InvalidData(_))),
            "expected InvalidData, got {result:?}"
        );
    }

    #[test]
    fn test_long_block_entity_id_is_rejected() {
        let mut chunk = Chunk::new(ChunkPos::default());
        chunk.put_block_entity(BlockEntity {
            id: "x".repeat(70_000),
            x: 0,
            y: 0,
            z: 0,
            data: Vec::new(),
        });
        match chunk.serialize() {
            Err(ChunkSerError::FieldTooLong { field, len, max }) => {
                assert_eq!(field, "block entity id");
                assert_eq!(len, 70_000);
                assert_eq!(max, u64::from(u16::MAX));
            }
            other => panic!("expected FieldTooLong, got {other:?}"),
        }

        chunk.put_block_entity(BlockEntity {
            id: "x".repeat(usize::from(u16::MAX)),
            x: 0,
            y: 0,
            z: 0,
            data: Vec::new(),
        });
        let restored = Chunk::deserialize(&chunk.serialize().unwrap()).unwrap();
        assert_eq!(restored, chunk);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_prefix_limits() {
        assert_eq!(length_prefix::<u32>("block entity data", 5).unwrap(), 5u32);
        let too_long = u32::MAX as usize + 1;
        assert!(matches!(
            length_prefix::<u32>("block entity data", too_long),
            Err(ChunkSerError::FieldTooLong { field: "block entity data", len, max })
                if len == too_long && max == u64::from(u32::MAX)
        ));
        assert!(length_prefix::<u16>("block entity id", 65_536).is_err());
    }

    #[test]
    fn test_bad_status_is_invalid() {
        let mut bytes = Chunk::new(ChunkPos::default()).serialize().unwrap();
        // magic(4) + version(1) + position(8) + chunk version(6) + 3 × u64
        bytes[4 + 1 + 8 + 6 + 24] = 200;
        assert!(matches!(
            Chunk::deserialize(&bytes),
            Err(ChunkSerError::InvalidData(_))
        ));
    }
}
