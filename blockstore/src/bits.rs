//! Fixed size bit vector storing the placement bit of each cell of a chunk.

use std::io::{self, Read, Write};

use crate::util::{ReadDataExt, WriteDataExt};
use crate::loc::CHUNK_SIZE;


/// Number of 64 bits words needed to store a bit per cell.
const WORDS: usize = CHUNK_SIZE / 64;


/// One bit per cell, bit `i` is stored in word `i / 64` at bit `i % 64`.
#[derive(Clone, PartialEq, Eq)]
pub struct PlacementBits {
    words: Box<[u64; WORDS]>,
}

impl PlacementBits {

    /// Create a new vector with no bit set.
    pub fn new() -> Self {
        Self { words: Box::new([0; WORDS]) }
    }

    /// Panics if index is not below [`CHUNK_SIZE`].
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Panics if index is not below [`CHUNK_SIZE`].
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        let word = &mut self.words[index / 64];
        if value {
            *word |= 1u64 << (index % 64);
        } else {
            *word &= !(1u64 << (index % 64));
        }
    }

    /// Return true if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Return the number of bits set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Read the raw vector, every word as a big-endian 64 bits integer.
    pub fn read_from(mut reader: impl Read) -> io::Result<Self> {
        let mut bits = Self::new();
        for word in bits.words.iter_mut() {
            *word = reader.read_data_long()? as u64;
        }
        Ok(bits)
    }

    /// Write the raw vector, every word as a big-endian 64 bits integer.
    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        for &word in self.words.iter() {
            writer.write_data_long(word as i64)?;
        }
        Ok(())
    }

}

impl Default for PlacementBits {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlacementBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementBits")
            .field("count", &self.count())
            .finish()
    }
}
