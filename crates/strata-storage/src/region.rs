//! Sector-addressed region files holding up to 1024 chunks.
//!
//! ## Layout
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0..4096 | 1024 big-endian `u32` locations, `offset << 8 \| sector_count` |
//! | 4096..8192 | 1024 big-endian `u32` Unix timestamps |
//! | 8192.. | 4096-byte sectors holding chunk payloads |
//!
//! A payload is a big-endian `u32` length, a compression-type byte and
//! `length - 1` bytes of codec frame, zero-padded to a whole sector. The slot
//! of chunk `(x, z)` is `(x & 31) + (z & 31) * 32`; offset 0 means absent.
//!
//! Free space is tracked in a sector bitmap owned by each [`RegionFile`] and
//! rebuilt from the location table on open. Saves allocate first-fit and
//! never reuse the slot's own sectors, so the old payload stays intact until
//! the new location entry has been written.

use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunk::Chunk;
use crate::codec::{self, Compression};
use crate::error::{FileError, FileOperation, RegionError, StorageError};

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 4096;

/// Chunk slots per region (32 × 32).
pub const SLOT_COUNT: usize = 1024;

/// Sectors occupied by the location and timestamp tables.
pub const HEADER_SECTORS: usize = 2;

/// Bytes occupied by the location and timestamp tables.
pub const HEADER_SIZE: usize = HEADER_SECTORS * SECTOR_SIZE;

/// Largest sector count a location entry can describe.
pub const MAX_CHUNK_SECTORS: usize = 255;

/// Length prefix plus compression-type byte in front of every payload.
pub const PAYLOAD_HEADER_LEN: usize = 5;

const MAX_SECTOR_OFFSET: usize = 0x00FF_FFFF;

/// Slot index of chunk `(x, z)` within its region.
pub fn slot_index(x: i32, z: i32) -> usize {
    ((x & 31) + (z & 31) * 32) as usize
}

// ---------------------------------------------------------------------------
// Header types
// ---------------------------------------------------------------------------

/// A run of sectors described by one location entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SectorLocation {
    /// First sector; 0 means the slot is empty.
    pub offset: u32,
    /// Number of sectors.
    pub count: u8,
}

impl SectorLocation {
    /// The empty entry.
    pub const ABSENT: Self = Self {
        offset: 0,
        count: 0,
    };

    /// Decodes a raw `offset << 8 | count` entry.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            offset: raw >> 8,
            count: (raw & 0xFF) as u8,
        }
    }

    /// Encodes as `offset << 8 | count`.
    pub fn to_raw(self) -> u32 {
        (self.offset << 8) | u32::from(self.count)
    }

    /// Returns `true` for an empty slot.
    pub fn is_absent(self) -> bool {
        self.offset == 0
    }

    /// Sector indices covered by this entry.
    pub fn sectors(self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.count as usize
    }

    /// Returns `true` if both entries claim a common sector.
    pub fn overlaps(self, other: Self) -> bool {
        let (a, b) = (self.sectors(), other.sectors());
        !a.is_empty() && !b.is_empty() && a.start < b.end && b.start < a.end
    }
}

/// A live slot of the location table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionEntry {
    /// Slot index, `local_x + local_z * 32`.
    pub slot: usize,
    /// Sectors holding the payload.
    pub location: SectorLocation,
    /// Unix seconds of the last save.
    pub timestamp: u32,
}

impl RegionEntry {
    /// Chunk X within the region (0..32).
    pub fn local_x(&self) -> i32 {
        (self.slot % 32) as i32
    }

    /// Chunk Z within the region (0..32).
    pub fn local_z(&self) -> i32 {
        (self.slot / 32) as i32
    }
}

/// Why a location entry was ignored on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The run starts inside the header sectors.
    ReservedSectors,
    /// A non-zero offset with a zero sector count.
    ZeroLength,
    /// The run extends past the end of the file.
    BeyondEnd {
        /// Sectors in the file.
        file_sectors: usize,
    },
    /// The run shares sectors with an earlier slot.
    Overlaps {
        /// Slot that kept the sectors.
        slot: usize,
    },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedSectors => f.write_str("points into the header"),
            Self::ZeroLength => f.write_str("has zero sectors"),
            Self::BeyondEnd { file_sectors } => {
                write!(f, "runs past the end of the file ({file_sectors} sectors)")
            }
            Self::Overlaps { slot } => write!(f, "overlaps slot {slot}"),
        }
    }
}

/// A location entry dropped from the in-memory table on open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DroppedEntry {
    /// Slot index.
    pub slot: usize,
    /// The rejected entry as stored on disk.
    pub location: SectorLocation,
    /// Why it was rejected.
    pub reason: DropReason,
}

/// Consistency summary produced by [`RegionFile::verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionReport {
    /// Live chunks.
    pub chunk_count: usize,
    /// Sectors in the file, header included.
    pub file_sectors: usize,
    /// Sectors claimed by the header and live chunks.
    pub used_sectors: usize,
    /// Entries ignored when the file was opened.
    pub dropped: Vec<DroppedEntry>,
    /// Pairs of live slots that share sectors.
    pub overlaps: Vec<(usize, usize)>,
    /// Live slots whose run extends past the end of the file.
    pub out_of_bounds: Vec<usize>,
}

impl RegionReport {
    /// Returns `true` if nothing was dropped and the live table is consistent.
    pub fn is_healthy(&self) -> bool {
        self.dropped.is_empty() && self.overlaps.is_empty() && self.out_of_bounds.is_empty()
    }
}

/// How a region file encodes and persists chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionOptions {
    /// Compression for saved chunks.
    pub compression: Compression,
    /// Compression level, 0..=9.
    pub level: u32,
    /// Call `sync_data` after the payload and after the header entry.
    pub sync_writes: bool,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Zlib,
            level: codec::DEFAULT_LEVEL,
            sync_writes: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Sector bitmap
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SectorMap {
    used: Vec<bool>,
}

impl SectorMap {
    fn new(sectors: usize) -> Self {
        let mut map = Self {
            used: vec![false; sectors.max(HEADER_SECTORS)],
        };
        map.set(0..HEADER_SECTORS, true);
        map
    }

    /// Start of the first free run of `count` sectors. A run may extend past
    /// the current end of the file.
    fn first_fit(&self, count: usize) -> usize {
        let mut run_start = HEADER_SECTORS;
        let mut run_len = 0;
        for (sector, &used) in self.used.iter().enumerate().skip(HEADER_SECTORS) {
            if used {
                run_start = sector + 1;
                run_len = 0;
            } else {
                run_len += 1;
                if run_len == count {
                    return run_start;
                }
            }
        }
        run_start
    }

    fn is_free(&self, range: Range<usize>) -> bool {
        range.into_iter().all(|sector| !self.used.get(sector).copied().unwrap_or(false))
    }

    fn set(&mut self, range: Range<usize>, used: bool) {
        if range.end > self.used.len() {
            self.used.resize(range.end, false);
        }
        for sector in range {
            self.used[sector] = used;
        }
    }

    fn len(&self) -> usize {
        self.used.len()
    }

    fn used_count(&self) -> usize {
        self.used.iter().filter(|&&used| used).count()
    }
}

#[derive(Debug)]
struct Header {
    locations: Vec<SectorLocation>,
    timestamps: Vec<u32>,
    sectors: SectorMap,
}

impl Header {
    /// Parses the raw tables, dropping entries that cannot be trusted.
    fn parse(raw: &[u8], file_sectors: usize) -> (Self, Vec<DroppedEntry>) {
        let mut header = Self {
            locations: vec![SectorLocation::ABSENT; SLOT_COUNT],
            timestamps: vec![0; SLOT_COUNT],
            sectors: SectorMap::new(file_sectors),
        };
        let mut owners: Vec<Option<usize>> = vec![None; file_sectors];
        let mut dropped = Vec::new();

        for slot in 0..SLOT_COUNT {
            let location = SectorLocation::from_raw(be_u32(raw, slot * 4));
            if location.is_absent() {
                continue;
            }
            let range = location.sectors();
            let reason = if range.start < HEADER_SECTORS {
                Some(DropReason::ReservedSectors)
            } else if range.is_empty() {
                Some(DropReason::ZeroLength)
            } else if range.end > file_sectors {
                Some(DropReason::BeyondEnd { file_sectors })
            } else {
                owners[range.clone()]
                    .iter()
                    .find_map(|owner| *owner)
                    .map(|slot| DropReason::Overlaps { slot })
            };
            if let Some(reason) = reason {
                dropped.push(DroppedEntry {
                    slot,
                    location,
                    reason,
                });
                continue;
            }
            for owner in &mut owners[range.clone()] {
                *owner = Some(slot);
            }
            header.sectors.set(range, true);
            header.locations[slot] = location;
            header.timestamps[slot] = be_u32(raw, SECTOR_SIZE + slot * 4);
        }
        (header, dropped)
    }
}

fn be_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

// ---------------------------------------------------------------------------
// RegionFile
// ---------------------------------------------------------------------------

/// An open region file.
///
/// Saves and deletes are serialized by an internal write lock. Loads take a
/// shared lock on the header and read with positional I/O, so they run
/// alongside each other and alongside a save's payload write.
#[derive(Debug)]
pub struct RegionFile {
    path: PathBuf,
    options: RegionOptions,
    header: RwLock<Header>,
    write_lock: Mutex<()>,
    file: File,
    read_only: bool,
    dropped: Vec<DroppedEntry>,
}

impl RegionFile {
    /// Opens or creates a region file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(path, RegionOptions::default())
    }

    /// Opens or creates a region file.
    ///
    /// A missing file is created with an empty header. A file whose length is
    /// not a whole number of sectors is zero-padded.
    pub fn open_with(path: impl AsRef<Path>, options: RegionOptions) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| FileError::new(FileOperation::Create, &path, e))?;

        let len = file
            .metadata()
            .map_err(|e| FileError::new(FileOperation::Read, &path, e))?
            .len();
        let sector = SECTOR_SIZE as u64;
        let padded = len.max(HEADER_SIZE as u64).div_ceil(sector) * sector;
        if padded != len {
            file.set_len(padded)
                .map_err(|e| FileError::new(FileOperation::Write, &path, e))?;
            if len == 0 {
                tracing::debug!(path = %path.display(), "created region file");
            } else {
                tracing::warn!(
                    path = %path.display(),
                    from = len,
                    to = padded,
                    "padded region file to a whole number of sectors"
                );
            }
        }

        Self::from_file(path, options, file, padded, false)
    }

    /// Opens an existing region file for inspection.
    ///
    /// The file is never created, padded or written; saves and deletes on
    /// the returned handle fail with a permission error. A file shorter than
    /// the header reads as if zero-padded.
    pub fn open_read_only(
        path: impl AsRef<Path>,
        options: RegionOptions,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| FileError::new(FileOperation::Read, &path, e))?;
        let len = file
            .metadata()
            .map_err(|e| FileError::new(FileOperation::Read, &path, e))?
            .len();
        Self::from_file(path, options, file, len, true)
    }

    fn from_file(
        path: PathBuf,
        options: RegionOptions,
        file: File,
        len: u64,
        read_only: bool,
    ) -> Result<Self, StorageError> {
        let mut raw = vec![0u8; HEADER_SIZE];
        let present = len.min(HEADER_SIZE as u64) as usize;
        read_exact_at(&file, &mut raw[..present], 0)
            .map_err(|e| FileError::new(FileOperation::Read, &path, e))?;

        let file_sectors = len.div_ceil(SECTOR_SIZE as u64) as usize;
        let (header, dropped) = Header::parse(&raw, file_sectors);
        for entry in &dropped {
            tracing::warn!(
                path = %path.display(),
                slot = entry.slot,
                offset = entry.location.offset,
                count = entry.location.count,
                reason = %entry.reason,
                "ignoring corrupt region entry"
            );
        }

        Ok(Self {
            path,
            options,
            header: RwLock::new(header),
            write_lock: Mutex::new(()),
            file,
            read_only,
            dropped,
        })
    }

    /// Loads and decodes chunk `(x, z)`. Absent chunks yield `Ok(None)`.
    pub fn load_chunk(&self, x: i32, z: i32) -> Result<Option<Chunk>, StorageError> {
        let Some((compression, frame)) = self.read_raw(x, z)? else {
            return Ok(None);
        };
        Ok(Some(codec::decompress(&frame, compression)?))
    }

    /// Reads the codec frame of chunk `(x, z)` without decoding it.
    pub fn read_raw(&self, x: i32, z: i32) -> Result<Option<(Compression, Vec<u8>)>, StorageError> {
        let slot = slot_index(x, z);
        let mut buf = {
            let header = read_lock(&self.header);
            let location = header.locations[slot];
            if location.is_absent() {
                return Ok(None);
            }
            let mut buf = vec![0u8; location.count as usize * SECTOR_SIZE];
            read_exact_at(
                &self.file,
                &mut buf,
                location.offset as u64 * SECTOR_SIZE as u64,
            )
            .map_err(|e| self.file_error(FileOperation::Read, e))?;
            buf
        };

        let length = be_u32(&buf, 0) as usize;
        let available = buf.len() - 4;
        if length == 0 || length > available {
            return Err(RegionError::InvalidLength {
                x,
                z,
                length,
                available,
            }
            .into());
        }
        let tag = buf[4];
        let compression = Compression::from_tag(tag).ok_or(RegionError::UnknownCompression(tag))?;
        buf.truncate(4 + length);
        buf.drain(..PAYLOAD_HEADER_LEN);
        Ok(Some((compression, buf)))
    }

    /// Compresses and stores `chunk` in slot `(x, z)`.
    pub fn save_chunk(&self, x: i32, z: i32, chunk: &Chunk) -> Result<SectorLocation, StorageError> {
        let frame = codec::compress_with_level(chunk, self.options.compression, self.options.level)?;
        self.save_raw(x, z, self.options.compression, &frame)
    }

    /// Stores an already-encoded codec frame in slot `(x, z)`.
    ///
    /// The payload is written and flushed before the location entry and
    /// timestamp. The slot's previous sectors are released only after that.
    pub fn save_raw(
        &self,
        x: i32,
        z: i32,
        compression: Compression,
        frame: &[u8],
    ) -> Result<SectorLocation, StorageError> {
        let slot = slot_index(x, z);
        let sectors = (frame.len() + PAYLOAD_HEADER_LEN).div_ceil(SECTOR_SIZE);
        if sectors > MAX_CHUNK_SECTORS {
            return Err(RegionError::ChunkTooLarge { sectors }.into());
        }

        self.check_writable()?;
        let _guard = lock(&self.write_lock);
        let (offset, previous) = {
            let header = read_lock(&self.header);
            (header.sectors.first_fit(sectors), header.locations[slot])
        };
        if offset > MAX_SECTOR_OFFSET {
            return Err(RegionError::RegionFull { offset }.into());
        }
        let location = SectorLocation {
            offset: offset as u32,
            count: sectors as u8,
        };

        let mut payload = Vec::with_capacity(sectors * SECTOR_SIZE);
        payload.extend_from_slice(&((frame.len() + 1) as u32).to_be_bytes());
        payload.push(compression.tag());
        payload.extend_from_slice(frame);
        payload.resize(sectors * SECTOR_SIZE, 0);

        let timestamp = unix_now();
        self.write_at(offset as u64 * SECTOR_SIZE as u64, &payload)?;
        self.sync()?;
        self.write_entry(slot, location, timestamp)?;

        {
            let mut header = write_lock(&self.header);
            if !previous.is_absent() {
                header.sectors.set(previous.sectors(), false);
            }
            header.sectors.set(location.sectors(), true);
            header.locations[slot] = location;
            header.timestamps[slot] = timestamp;
        }
        tracing::debug!(
            x,
            z,
            offset,
            sectors,
            bytes = frame.len(),
            "chunk committed to region"
        );
        Ok(location)
    }

    /// Clears slot `(x, z)` and releases its sectors.
    ///
    /// Returns `false` if the slot was already empty.
    pub fn delete_chunk(&self, x: i32, z: i32) -> Result<bool, StorageError> {
        let slot = slot_index(x, z);
        self.check_writable()?;
        let _guard = lock(&self.write_lock);
        let previous = read_lock(&self.header).locations[slot];
        if previous.is_absent() {
            return Ok(false);
        }
        self.write_entry(slot, SectorLocation::ABSENT, 0)?;
        {
            let mut header = write_lock(&self.header);
            header.sectors.set(previous.sectors(), false);
            header.locations[slot] = SectorLocation::ABSENT;
            header.timestamps[slot] = 0;
        }
        tracing::debug!(x, z, "chunk deleted from region");
        Ok(true)
    }

    /// Returns `true` if slot `(x, z)` holds a chunk.
    pub fn has_chunk(&self, x: i32, z: i32) -> bool {
        !self.location(x, z).is_absent()
    }

    /// Location entry of slot `(x, z)`.
    pub fn location(&self, x: i32, z: i32) -> SectorLocation {
        read_lock(&self.header).locations[slot_index(x, z)]
    }

    /// Unix seconds of the last save to slot `(x, z)`, 0 if empty.
    pub fn timestamp(&self, x: i32, z: i32) -> u32 {
        read_lock(&self.header).timestamps[slot_index(x, z)]
    }

    /// Number of live chunks.
    pub fn chunk_count(&self) -> usize {
        read_lock(&self.header)
            .locations
            .iter()
            .filter(|location| !location.is_absent())
            .count()
    }

    /// Every live slot in slot order.
    pub fn live_locations(&self) -> Vec<RegionEntry> {
        let header = read_lock(&self.header);
        header
            .locations
            .iter()
            .zip(&header.timestamps)
            .enumerate()
            .filter(|(_, (location, _))| !location.is_absent())
            .map(|(slot, (&location, &timestamp))| RegionEntry {
                slot,
                location,
                timestamp,
            })
            .collect()
    }

    /// Checks the live table for overlaps and out-of-file runs.
    pub fn verify(&self) -> RegionReport {
        let live = self.live_locations();
        let header = read_lock(&self.header);
        let file_sectors = header.sectors.len();

        let mut overlaps = Vec::new();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                if a.location.overlaps(b.location) {
                    overlaps.push((a.slot, b.slot));
                }
            }
        }
        let out_of_bounds = live
            .iter()
            .filter(|entry| entry.location.sectors().end > file_sectors)
            .map(|entry| entry.slot)
            .collect();

        RegionReport {
            chunk_count: live.len(),
            file_sectors,
            used_sectors: header.sectors.used_count(),
            dropped: self.dropped.clone(),
            overlaps,
            out_of_bounds,
        }
    }

    /// Returns `true` if sectors `range` are unclaimed.
    pub fn is_free(&self, range: Range<usize>) -> bool {
        read_lock(&self.header).sectors.is_free(range)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options the file was opened with.
    pub fn options(&self) -> RegionOptions {
        self.options
    }

    /// Returns `true` if the handle came from [`open_read_only`](Self::open_read_only).
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(self
                .file_error(
                    FileOperation::Write,
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "region file opened read-only",
                    ),
                )
                .into());
        }
        Ok(())
    }

    fn write_entry(
        &self,
        slot: usize,
        location: SectorLocation,
        timestamp: u32,
    ) -> Result<(), StorageError> {
        self.write_at((slot * 4) as u64, &location.to_raw().to_be_bytes())?;
        self.write_at((SECTOR_SIZE + slot * 4) as u64, &timestamp.to_be_bytes())?;
        self.sync()
    }

    fn write_at(&self, position: u64, bytes: &[u8]) -> Result<(), StorageError> {
        write_all_at(&self.file, bytes, position)
            .map_err(|e| self.file_error(FileOperation::Write, e).into())
    }

    fn sync(&self) -> Result<(), StorageError> {
        if self.options.sync_writes {
            self.file
                .sync_data()
                .map_err(|e| self.file_error(FileOperation::Write, e))?;
        }
        Ok(())
    }

    fn file_error(&self, operation: FileOperation, source: std::io::Error) -> FileError {
        FileError::new(operation, &self.path, source)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as u32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
