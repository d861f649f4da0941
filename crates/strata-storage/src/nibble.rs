//! Packed 4-bit arrays used for light levels.

use thiserror::Error;

/// Entries in a nibble array (one per section cell).
pub const NIBBLE_ENTRIES: usize = 4096;

/// Bytes backing a nibble array.
pub const NIBBLE_BYTES: usize = NIBBLE_ENTRIES / 2;

/// Errors produced by [`NibbleArray`] construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NibbleError {
    /// The raw byte slice has the wrong length.
    #[error("nibble array needs 2048 bytes, got {0}")]
    InvalidLength(usize),
}

/// 4096 four-bit values packed two per byte, low nibble first.
#[derive(Clone, PartialEq, Eq)]
pub struct NibbleArray {
    data: Box<[u8; NIBBLE_BYTES]>,
}

impl NibbleArray {
    /// All entries zero.
    pub fn new() -> Self {
        Self::filled(0)
    }

    /// All entries set to `value & 0xF`.
    pub fn filled(value: u8) -> Self {
        let nibble = value & 0x0F;
        Self {
            data: Box::new([nibble | (nibble << 4); NIBBLE_BYTES]),
        }
    }

    /// Wraps exactly [`NIBBLE_BYTES`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NibbleError> {
        let data: [u8; NIBBLE_BYTES] = bytes
            .try_into()
            .map_err(|_| NibbleError::InvalidLength(bytes.len()))?;
        Ok(Self {
            data: Box::new(data),
        })
    }

    /// Value at linear `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 4096`.
    pub fn get(&self, index: usize) -> u8 {
        let byte = self.data[index >> 1];
        if index & 1 == 0 {
            byte & 0x0F
        } else {
            byte >> 4
        }
    }

    /// Stores `value & 0xF` at linear `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 4096`.
    pub fn set(&mut self, index: usize, value: u8) {
        let nibble = value & 0x0F;
        let byte = &mut self.data[index >> 1];
        if index & 1 == 0 {
            *byte = (*byte & 0xF0) | nibble;
        } else {
            *byte = (*byte & 0x0F) | (nibble << 4);
        }
    }

    /// Raw packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns `true` if every entry equals `value`.
    pub fn is_uniform(&self, value: u8) -> bool {
        let nibble = value & 0x0F;
        let packed = nibble | (nibble << 4);
        self.data.iter().all(|&byte| byte == packed)
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NibbleArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.data.iter().filter(|&&byte| byte != 0).count();
        f.debug_struct("NibbleArray")
            .field("nonzero_bytes", &lit)
            .finish()
    }
}
