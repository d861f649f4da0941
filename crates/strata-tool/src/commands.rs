//! Region inspection commands. Each returns a value whose `Display` is the
//! command's report.

use std::fmt;
use std::path::{Path, PathBuf};

use strata_config::StorageConfig;
use strata_storage::region::{SECTOR_SIZE, slot_index};
use strata_storage::{
    Chunk, FileError, FileOperation, HeightMapKind, LightKind, RegionFile, RegionOptions,
    RegionReport, SectorLocation, StorageError,
};

/// Output of `strata info`.
#[derive(Debug)]
pub struct RegionInfo {
    path: PathBuf,
    report: RegionReport,
    oldest: Option<u32>,
    newest: Option<u32>,
}

/// Output of `strata verify`.
#[derive(Debug)]
pub struct VerifyOutcome {
    path: PathBuf,
    report: RegionReport,
    decoded: usize,
    failures: Vec<ChunkFailure>,
}

#[derive(Debug)]
struct ChunkFailure {
    slot: usize,
    message: String,
}

impl VerifyOutcome {
    /// `true` if the table is consistent and every chunk decoded.
    pub fn is_ok(&self) -> bool {
        self.report.is_healthy() && self.failures.is_empty()
    }
}

/// Output of `strata dump`.
#[derive(Debug)]
pub struct ChunkDump {
    location: SectorLocation,
    timestamp: u32,
    chunk: Option<Chunk>,
}

pub fn info(config: &StorageConfig, region: &Path) -> Result<RegionInfo, StorageError> {
    let (path, file) = open_existing(config, region)?;
    let live = file.live_locations();
    Ok(RegionInfo {
        path,
        report: file.verify(),
        oldest: live.iter().map(|entry| entry.timestamp).min(),
        newest: live.iter().map(|entry| entry.timestamp).max(),
    })
}

pub fn verify(config: &StorageConfig, region: &Path) -> Result<VerifyOutcome, StorageError> {
    let (path, file) = open_existing(config, region)?;
    let report = file.verify();
    let mut decoded = 0;
    let mut failures = Vec::new();

    for entry in file.live_locations() {
        match file.load_chunk(entry.local_x(), entry.local_z()) {
            Ok(Some(chunk)) => {
                let pos = chunk.position();
                if slot_index(pos.x, pos.z) != entry.slot {
                    failures.push(ChunkFailure {
                        slot: entry.slot,
                        message: format!("payload records chunk {pos}, which belongs elsewhere"),
                    });
                } else {
                    decoded += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(slot = entry.slot, error = %e, "chunk failed to decode");
                failures.push(ChunkFailure {
                    slot: entry.slot,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(VerifyOutcome {
        path,
        report,
        decoded,
        failures,
    })
}

pub fn dump(config: &StorageConfig, region: &Path, x: i32, z: i32) -> Result<ChunkDump, StorageError> {
    let (_, file) = open_existing(config, region)?;
    Ok(ChunkDump {
        location: file.location(x, z),
        timestamp: file.timestamp(x, z),
        chunk: file.load_chunk(x, z)?,
    })
}

/// Opens a region file read-only. Relative paths that do not exist are
/// looked up in the configured world directory.
fn open_existing(
    config: &StorageConfig,
    region: &Path,
) -> Result<(PathBuf, RegionFile), StorageError> {
    let path = if region.exists() || region.is_absolute() {
        region.to_path_buf()
    } else {
        config.world_dir.join(region)
    };
    if !path.is_file() {
        return Err(FileError::new(
            FileOperation::Read,
            &path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        )
        .into());
    }
    let options = RegionOptions {
        compression: config.compression.into(),
        level: config.compression_level,
        sync_writes: config.sync_writes,
    };
    let file = RegionFile::open_read_only(&path, options)?;
    Ok((path, file))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = &self.report;
        writeln!(f, "region:  {}", self.path.display())?;
        writeln!(f, "chunks:  {}", report.chunk_count)?;
        writeln!(
            f,
            "sectors: {} used / {} total ({} bytes)",
            report.used_sectors,
            report.file_sectors,
            report.file_sectors * SECTOR_SIZE
        )?;
        match (self.oldest, self.newest) {
            (Some(oldest), Some(newest)) => writeln!(f, "saved:   {oldest} .. {newest} (unix)")?,
            _ => writeln!(f, "saved:   never")?,
        }
        if !report.dropped.is_empty() {
            writeln!(f, "dropped: {} corrupt entries", report.dropped.len())?;
        }
        Ok(())
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "region:  {}", self.path.display())?;
        for entry in &self.report.dropped {
            writeln!(
                f,
                "slot {:4}: entry {}+{} {}",
                entry.slot, entry.location.offset, entry.location.count, entry.reason
            )?;
        }
        for (a, b) in &self.report.overlaps {
            writeln!(f, "slot {a:4}: overlaps slot {b}")?;
        }
        for slot in &self.report.out_of_bounds {
            writeln!(f, "slot {slot:4}: runs past the end of the file")?;
        }
        for failure in &self.failures {
            writeln!(f, "slot {:4}: {}", failure.slot, failure.message)?;
        }
        writeln!(
            f,
            "{} of {} chunks decoded: {}",
            self.decoded,
            self.report.chunk_count,
            if self.is_ok() { "ok" } else { "FAILED" }
        )
    }
}

impl fmt::Display for ChunkDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(chunk) = &self.chunk else {
            return writeln!(f, "chunk absent");
        };
        let version = chunk.version();
        let metadata = chunk.metadata();
        writeln!(f, "chunk {}", chunk.position())?;
        writeln!(
            f,
            "  stored at sector {} ({} sectors), saved {}",
            self.location.offset, self.location.count, self.timestamp
        )?;
        writeln!(
            f,
            "  format {}, game version {}, status {:?}",
            version.format, version.game_version, metadata.status
        )?;
        writeln!(
            f,
            "  generated {}, modified {}, inhabited {} ticks",
            metadata.generated_at, metadata.last_modified, metadata.inhabited_time
        )?;
        for section in chunk.sections().iter().filter(|s| !s.is_empty()) {
            let blocks = section.block_states();
            let palette = match blocks.palette() {
                Some(palette) => format!("palette {}", palette.len()),
                None => "direct".to_string(),
            };
            writeln!(
                f,
                "  section {:2}: {:4} blocks, {} bits, {}{}",
                section.y(),
                blocks.count_non_air(),
                blocks.bits(),
                palette,
                if section.biomes().is_some() { ", biomes" } else { "" }
            )?;
        }
        for kind in HeightMapKind::ALL {
            let highest = (0..16)
                .flat_map(|x| (0..16).map(move |z| (x, z)))
                .map(|(x, z)| chunk.height(kind, x, z))
                .max()
                .unwrap_or(0);
            writeln!(f, "  {:<26} max {highest}", kind.name())?;
        }
        writeln!(
            f,
            "  light arrays: {} sky, {} block",
            chunk.lighting().stored_count(LightKind::Sky),
            chunk.lighting().stored_count(LightKind::Block)
        )?;
        writeln!(f, "  block entities: {}", chunk.block_entities().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::{BlockStateId, ChunkPos};

    fn config(dir: &Path) -> StorageConfig {
        StorageConfig {
            world_dir: dir.to_path_buf(),
            sync_writes: false,
            ..StorageConfig::default()
        }
    }

    fn region_with_chunks(dir: &Path) -> PathBuf {
        let path = dir.join("r.0.0.mca");
        let region = RegionFile::open_with(&path, RegionOptions::default()).unwrap();
        for x in 0..3 {
            let mut chunk = Chunk::new(ChunkPos::new(x, 1));
            chunk.set_block(0, 20, 0, BlockStateId(4)).unwrap();
            region.save_chunk(x, 1, &chunk).unwrap();
        }
        path
    }

    #[test]
    fn test_info_counts_chunks() {
        let dir = tempfile::tempdir().unwrap();
        region_with_chunks(dir.path());
        let info = info(&config(dir.path()), Path::new("r.0.0.mca")).unwrap();
        assert_eq!(info.report.chunk_count, 3);
        assert!(info.oldest.is_some());
        assert!(info.to_string().contains("chunks:  3"));
    }

    #[test]
    fn test_verify_healthy_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_with_chunks(dir.path());
        let outcome = verify(&config(dir.path()), &path).unwrap();
        assert!(outcome.is_ok(), "{outcome}");
        assert_eq!(outcome.decoded, 3);
    }

    #[test]
    fn test_verify_reports_undecodable_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_with_chunks(dir.path());
        let offset = {
            let region = RegionFile::open(&path).unwrap();
            region.location(1, 1).offset as usize * SECTOR_SIZE
        };
        let mut bytes = std::fs::read(&path).unwrap();
        // Corrupt the codec frame past the 5-byte payload header.
        for byte in &mut bytes[offset + 13..offset + 40] {
            *byte ^= 0xA5;
        }
        std::fs::write(&path, &bytes).unwrap();

        let outcome = verify(&config(dir.path()), &path).unwrap();
        assert!(!outcome.is_ok());
        assert_eq!(outcome.decoded, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].slot, slot_index(1, 1));
        assert!(outcome.to_string().contains("FAILED"));
    }

    #[test]
    fn test_missing_region_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let result = info(&config(dir.path()), Path::new("r.9.9.mca"));
        assert!(matches!(result, Err(StorageError::File(_))));
        assert!(!dir.path().join("r.9.9.mca").exists());
    }

    #[test]
    fn test_inspection_does_not_modify_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_with_chunks(dir.path());
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"tail");
        std::fs::write(&path, &bytes).unwrap();

        let config = config(dir.path());
        info(&config, &path).unwrap();
        verify(&config, &path).unwrap();
        dump(&config, &path, 0, 1).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_dump_present_and_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = region_with_chunks(dir.path());
        let dump_present = dump(&config(dir.path()), &path, 2, 1).unwrap();
        let text = dump_present.to_string();
        assert!(text.contains("chunk (2, 1)"), "{text}");
        assert!(text.contains("section  1"), "{text}");

        let dump_absent = dump(&config(dir.path()), &path, 9, 9).unwrap();
        assert_eq!(dump_absent.to_string(), "chunk absent\n");
    }
}
