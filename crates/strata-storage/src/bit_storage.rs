//! Fixed-width bit-packed integer array over a flat `Vec<u64>`.
//!
//! Each entry occupies exactly `bits` bits (4 to 32). Entries never straddle a
//! word boundary: a word holds `64 / bits` entries and any leftover high bits
//! stay zero. This is the layout used for block-state and height-map arrays on
//! disk, so the raw words can be dumped and reloaded without repacking.

use thiserror::Error;

/// Narrowest supported entry width.
pub const MIN_BITS: u8 = 4;

/// Widest supported entry width.
pub const MAX_BITS: u8 = 32;

const WORD_BITS: usize = 64;
const WORD_BYTES: usize = 8;

/// Errors produced by [`BitStorage`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitStorageError {
    /// The requested entry width is outside `4..=32`.
    #[error("bits per entry must be in 4..=32, got {0}")]
    InvalidWidth(u8),
    /// The requested entry count is zero.
    #[error("storage size must be greater than zero")]
    InvalidSize,
    /// An index past the end of the array was accessed.
    #[error("index {index} out of bounds for storage of {size} entries")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// Number of entries in the storage.
        size: usize,
    },
    /// A value does not fit in the entry width.
    #[error("value {value} exceeds {bits}-bit capacity")]
    ValueExceedsWidth {
        /// The offending value.
        value: u32,
        /// Entry width of the storage.
        bits: u8,
    },
    /// Raw words or bytes do not describe a storage of the given shape.
    #[error("invalid raw storage data: {0}")]
    InvalidData(String),
}

/// A compact array where every entry is stored using the same number of bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitStorage {
    data: Vec<u64>,
    bits: u8,
    mask: u64,
    entries_per_word: usize,
    size: usize,
}

impl BitStorage {
    /// Creates a zero-filled storage of `size` entries, `bits` wide each.
    pub fn new(bits: u8, size: usize) -> Result<Self, BitStorageError> {
        validate_shape(bits, size)?;
        let entries_per_word = WORD_BITS / bits as usize;
        Ok(Self {
            data: vec![0; size.div_ceil(entries_per_word)],
            bits,
            mask: mask_for(bits),
            entries_per_word,
            size,
        })
    }

    /// Zero-filled storage for shapes fixed at compile time.
    ///
    /// Callers guarantee `bits` is within `4..=32` and `size` is non-zero.
    pub(crate) fn zeroed(bits: u8, size: usize) -> Self {
        debug_assert!(validate_shape(bits, size).is_ok());
        let entries_per_word = WORD_BITS / bits as usize;
        Self {
            data: vec![0; size.div_ceil(entries_per_word)],
            bits,
            mask: mask_for(bits),
            entries_per_word,
            size,
        }
    }

    /// Wraps existing words, recomputing mask and entries-per-word from `bits`.
    pub fn from_words(bits: u8, size: usize, data: Vec<u64>) -> Result<Self, BitStorageError> {
        validate_shape(bits, size)?;
        let entries_per_word = WORD_BITS / bits as usize;
        let expected = size.div_ceil(entries_per_word);
        if data.len() != expected {
            return Err(BitStorageError::InvalidData(format!(
                "expected {expected} words for {size} entries at {bits} bits, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            bits,
            mask: mask_for(bits),
            entries_per_word,
            size,
        })
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Result<u32, BitStorageError> {
        self.check_index(index)?;
        Ok(self.read(index))
    }

    /// Stores `value` at `index`, rewriting the single word that holds it.
    pub fn set(&mut self, index: usize, value: u32) -> Result<(), BitStorageError> {
        self.check_index(index)?;
        if u64::from(value) > self.mask {
            return Err(BitStorageError::ValueExceedsWidth {
                value,
                bits: self.bits,
            });
        }
        self.write(index, value);
        Ok(())
    }

    /// Re-encodes every entry into a freshly allocated storage `new_bits` wide.
    ///
    /// Narrowing fails if any existing entry does not fit the new width.
    pub fn resize(&self, new_bits: u8) -> Result<BitStorage, BitStorageError> {
        let mut resized = BitStorage::new(new_bits, self.size)?;
        for index in 0..self.size {
            let value = self.read(index);
            if u64::from(value) > resized.mask {
                return Err(BitStorageError::ValueExceedsWidth {
                    value,
                    bits: new_bits,
                });
            }
            resized.write(index, value);
        }
        Ok(resized)
    }

    /// Dumps the words as little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * WORD_BYTES);
        for word in &self.data {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Rebuilds a storage from a little-endian word dump.
    pub fn from_bytes(bits: u8, size: usize, bytes: &[u8]) -> Result<Self, BitStorageError> {
        if bytes.len() % WORD_BYTES != 0 {
            return Err(BitStorageError::InvalidData(format!(
                "byte length {} is not a multiple of {WORD_BYTES}",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(WORD_BYTES)
            .map(|chunk| {
                let mut word = [0u8; WORD_BYTES];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Self::from_words(bits, size, words)
    }

    /// Iterates over every entry in index order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.size).map(move |index| self.read(index))
    }

    /// Bits per entry.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Largest value an entry can hold.
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Number of entries packed into each word.
    pub fn entries_per_word(&self) -> usize {
        self.entries_per_word
    }

    /// Number of logical entries.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always `false`; zero-sized storages cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Raw backing words.
    pub fn words(&self) -> &[u64] {
        &self.data
    }

    /// Size of the backing buffer in bytes.
    pub fn storage_bytes(&self) -> usize {
        self.data.len() * WORD_BYTES
    }

    fn check_index(&self, index: usize) -> Result<(), BitStorageError> {
        if index >= self.size {
            return Err(BitStorageError::IndexOutOfBounds {
                index,
                size: self.size,
            });
        }
        Ok(())
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let word = index / self.entries_per_word;
        let shift = (index % self.entries_per_word) * self.bits as usize;
        (word, shift)
    }

    fn read(&self, index: usize) -> u32 {
        let (word, shift) = self.locate(index);
        ((self.data[word] >> shift) & self.mask) as u32
    }

    fn write(&mut self, index: usize, value: u32) {
        let (word, shift) = self.locate(index);
        let cleared = self.data[word] & !(self.mask << shift);
        self.data[word] = cleared | (u64::from(value) << shift);
    }
}

fn validate_shape(bits: u8, size: usize) -> Result<(), BitStorageError> {
    if !(MIN_BITS..=MAX_BITS).contains(&bits) {
        return Err(BitStorageError::InvalidWidth(bits));
    }
    if size == 0 {
        return Err(BitStorageError::InvalidSize);
    }
    Ok(())
}

fn mask_for(bits: u8) -> u64 {
    (1u64 << bits) - 1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_bit_section_example() {
        let mut storage = BitStorage::new(4, 4096).unwrap();
        storage.set(0, 15).unwrap();
        storage.set(1, 0).unwrap();
        assert_eq!(storage.get(0).unwrap(), 15);
        assert_eq!(storage.get(1).unwrap(), 0);
        assert_eq!(storage.words().len(), 256);
    }

    #[test]
    fn test_every_width_roundtrips_through_bytes() {
        for bits in MIN_BITS..=MAX_BITS {
            let size = 300;
            let mut storage = BitStorage::new(bits, size).unwrap();
            let mask = storage.mask();
            for i in 0..size {
                let value = ((i as u64 * 2_654_435_761) & mask) as u32;
                storage.set(i, value).unwrap();
            }

            let bytes = storage.to_bytes();
            let restored = BitStorage::from_bytes(bits, size, &bytes).unwrap();
            assert_eq!(storage, restored, "roundtrip mismatch at {bits} bits");
        }
    }

    #[test]
    fn test_writes_do_not_disturb_neighbours() {
        let mut storage = BitStorage::new(5, 64).unwrap();
        for i in 0..64 {
            storage.set(i, 31).unwrap();
        }
        storage.set(11, 0).unwrap();
        storage.set(12, 7).unwrap();
        for i in 0..64 {
            let expected = match i {
                11 => 0,
                12 => 7,
                _ => 31,
            };
            assert_eq!(storage.get(i).unwrap(), expected, "index {i}");
        }
    }

    #[test]
    fn test_entries_do_not_straddle_words() {
        // 5 bits: 12 entries per word, top 4 bits unused.
        let mut storage = BitStorage::new(5, 24).unwrap();
        assert_eq!(storage.entries_per_word(), 12);
        storage.set(11, 31).unwrap();
        storage.set(12, 31).unwrap();

        let words = storage.words();
        assert_eq!((words[0] >> 55) & 0x1F, 31);
        assert_eq!(words[0] >> 60, 0);
        assert_eq!(words[1] & 0x1F, 31);
    }

    #[test]
    fn test_word_count_matches_size() {
        assert_eq!(BitStorage::new(4, 4096).unwrap().words().len(), 256);
        assert_eq!(BitStorage::new(5, 4096).unwrap().words().len(), 342);
        assert_eq!(BitStorage::new(9, 256).unwrap().words().len(), 37);
        assert_eq!(BitStorage::new(14, 4096).unwrap().words().len(), 1024);
        assert_eq!(BitStorage::new(32, 3).unwrap().words().len(), 2);
    }

    #[test]
    fn test_thirty_two_bit_entries_hold_u32_max() {
        let mut storage = BitStorage::new(32, 4).unwrap();
        storage.set(3, u32::MAX).unwrap();
        assert_eq!(storage.get(3).unwrap(), u32::MAX);
        assert_eq!(storage.get(2).unwrap(), 0);
    }

    #[test]
    fn test_invalid_construction() {
        assert_eq!(
            BitStorage::new(3, 16).unwrap_err(),
            BitStorageError::InvalidWidth(3)
        );
        assert_eq!(
            BitStorage::new(33, 16).unwrap_err(),
            BitStorageError::InvalidWidth(33)
        );
        assert_eq!(
            BitStorage::new(4, 0).unwrap_err(),
            BitStorageError::InvalidSize
        );
    }

    #[test]
    fn test_out_of_range_access() {
        let mut storage = BitStorage::new(4, 16).unwrap();
        assert!(matches!(
            storage.get(16),
            Err(BitStorageError::IndexOutOfBounds { index: 16, size: 16 })
        ));
        assert!(matches!(
            storage.set(16, 1),
            Err(BitStorageError::IndexOutOfBounds { .. })
        ));
        assert_eq!(
            storage.set(0, 16).unwrap_err(),
            BitStorageError::ValueExceedsWidth { value: 16, bits: 4 }
        );
    }

    #[test]
    fn test_resize_widens_and_preserves() {
        let mut storage = BitStorage::new(4, 100).unwrap();
        for i in 0..100 {
            storage.set(i, (i % 16) as u32).unwrap();
        }
        let wider = storage.resize(9).unwrap();
        assert_eq!(wider.bits(), 9);
        for i in 0..100 {
            assert_eq!(wider.get(i).unwrap(), (i % 16) as u32);
        }
    }

    #[test]
    fn test_resize_narrowing_rejects_truncation() {
        let mut storage = BitStorage::new(8, 10).unwrap();
        storage.set(4, 200).unwrap();
        assert_eq!(
            storage.resize(4).unwrap_err(),
            BitStorageError::ValueExceedsWidth {
                value: 200,
                bits: 4
            }
        );
    }

    #[test]
    fn test_from_bytes_validates_length() {
        let result = BitStorage::from_bytes(4, 16, &[0u8; 7]);
        assert!(matches!(result, Err(BitStorageError::InvalidData(_))));

        // 16 entries at 4 bits is one word; two words is the wrong shape.
        let result = BitStorage::from_bytes(4, 16, &[0u8; 16]);
        assert!(matches!(result, Err(BitStorageError::InvalidData(_))));
    }
}
