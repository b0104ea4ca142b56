//! Chunk and block locations, resolved to flat cell indices within a chunk store.

use std::fmt;

use glam::IVec3;


/// Chunk size in both X and Z coordinates.
pub const CHUNK_WIDTH: usize = 16;
/// Chunk height.
pub const CHUNK_HEIGHT: usize = 64;
/// Number of cells in a chunk.
pub const CHUNK_SIZE: usize = CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_WIDTH;


/// Calculate the flat cell index for the given chunk-local position. The layout is
/// `xxxx yyyy yyzz zz`, X being the outer axis and Z the inner one.
#[inline]
pub fn calc_index(x: usize, y: usize, z: usize) -> usize {
    debug_assert!(x < CHUNK_WIDTH && y < CHUNK_HEIGHT && z < CHUNK_WIDTH);
    (x << 10) | (y << 4) | z
}

/// Inverse of [`calc_index`], return the chunk-local position of a flat index.
#[inline]
pub fn calc_local(index: usize) -> (usize, usize, usize) {
    debug_assert!(index < CHUNK_SIZE);
    ((index >> 10) & 0b1111, (index >> 4) & 0b111111, index & 0b1111)
}


/// Coordinates of a chunk within a world, a chunk spans 16x64x16 blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChunkLoc {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkLoc {

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Return the chunk containing the given global block position.
    #[inline]
    pub fn from_block_pos(pos: IVec3) -> Self {
        Self {
            x: pos.x >> 4,
            y: pos.y >> 6,
            z: pos.z >> 4,
        }
    }

    /// Return the global position of the chunk's cell at local (0, 0, 0). Chunks 
    /// beyond the block coordinate range wrap around.
    #[inline]
    pub fn origin(self) -> IVec3 {
        IVec3::new(
            self.x.wrapping_mul(CHUNK_WIDTH as i32),
            self.y.wrapping_mul(CHUNK_HEIGHT as i32),
            self.z.wrapping_mul(CHUNK_WIDTH as i32),
        )
    }

}

impl fmt::Display for ChunkLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.x, self.y, self.z)
    }
}


/// A block location resolved against its chunk, the flat index is always in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockLoc {
    chunk: ChunkLoc,
    index: u16,
}

impl BlockLoc {

    /// Resolve a global block position.
    pub fn new(pos: IVec3) -> Self {
        let x = pos.x & (CHUNK_WIDTH as i32 - 1);
        let y = pos.y & (CHUNK_HEIGHT as i32 - 1);
        let z = pos.z & (CHUNK_WIDTH as i32 - 1);
        Self {
            chunk: ChunkLoc::from_block_pos(pos),
            index: calc_index(x as usize, y as usize, z as usize) as u16,
        }
    }

    /// Create a location from chunk-local coordinates, returning none if the position
    /// is outside of the chunk volume.
    pub fn from_local(chunk: ChunkLoc, x: i32, y: i32, z: i32) -> Option<Self> {
        if x < 0 || x >= CHUNK_WIDTH as i32 || y < 0 || y >= CHUNK_HEIGHT as i32 || z < 0 || z >= CHUNK_WIDTH as i32 {
            None
        } else {
            Some(Self { 
                chunk, 
                index: calc_index(x as usize, y as usize, z as usize) as u16,
            })
        }
    }

    /// Create a location from a flat index, returning none if the index is not in
    /// `0..CHUNK_SIZE`.
    pub fn from_index(chunk: ChunkLoc, index: usize) -> Option<Self> {
        (index < CHUNK_SIZE).then(|| Self { chunk, index: index as u16 })
    }

    #[inline]
    pub fn chunk(self) -> ChunkLoc {
        self.chunk
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Chunk-local coordinates.
    #[inline]
    pub fn local(self) -> (usize, usize, usize) {
        calc_local(self.index as usize)
    }

    /// Global block position.
    pub fn pos(self) -> IVec3 {
        let (x, y, z) = self.local();
        let origin = self.chunk.origin();
        IVec3::new(
            origin.x.wrapping_add(x as i32),
            origin.y.wrapping_add(y as i32),
            origin.z.wrapping_add(z as i32),
        )
    }

}

impl fmt::Display for BlockLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pos = self.pos();
        write!(f, "{}/{}/{}", pos.x, pos.y, pos.z)
    }
}
