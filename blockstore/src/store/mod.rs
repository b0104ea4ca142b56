//! Chunk stores, recording placed blocks and their metadata for a single chunk.
//! 
//! Two implementations of [`ChunkStore`] exist: [`LoadedChunkStore`] holds the actual
//! data in memory, [`LoadingChunkStore`] is a handle given immediately while the
//! loaded store is being read in background, queuing mutations and blocking reads
//! until the loaded store is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::io::{self, Write};

use arcstr::ArcStr;

use crate::meta::{BlockMeta, BlockValues, MetaValue, PluginValues};
use crate::loc::{BlockLoc, ChunkLoc};

mod loaded;
mod legacy;
mod loading;

pub use loaded::{LoadedChunkStore, FORMAT_VERSION, LEGACY_FORMAT_VERSION};
pub use loading::LoadingChunkStore;


/// Common interface of chunk stores. All methods panics if the given location is not
/// in the store's chunk.
/// 
/// Methods returning a result may have to wait for the store to be loaded, they
/// return [`StoreError::LoadTimeout`] if the store did not load in time.
pub trait ChunkStore: Send + Sync {

    /// Name of the world this store belongs to.
    fn world(&self) -> &ArcStr;

    /// Coordinates of the chunk this store belongs to.
    fn chunk(&self) -> ChunkLoc;

    /// Time elapsed since this store was last used.
    fn time_since_use(&self) -> Duration;

    /// Return true if the store has been modified and should be written.
    fn is_dirty(&self) -> bool;

    fn is_placed(&self, loc: BlockLoc) -> Result<bool, StoreError>;

    /// Set the placement bit of a block, removing its metadata when cleared.
    fn set_placed(&self, loc: BlockLoc, placed: bool);

    fn meta_value(&self, loc: BlockLoc, plugin: i32, key: i32) -> Result<Option<MetaValue>, StoreError>;

    fn plugin_meta_values(&self, loc: BlockLoc, plugin: i32) -> Result<PluginValues, StoreError>;

    fn meta_values(&self, loc: BlockLoc) -> Result<BlockValues, StoreError>;

    fn set_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32, value: MetaValue);

    fn remove_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32);

    /// Get a snapshot of the metadata of the block, only if placed.
    fn block_state(&self, loc: BlockLoc) -> Result<Option<BlockMeta>, StoreError>;

    /// Place the block and replace its metadata at once.
    fn set_block_state(&self, loc: BlockLoc, meta: BlockMeta);

    /// Return true if no block is placed in the chunk.
    fn is_empty(&self) -> Result<bool, StoreError>;

    /// Serialize the store with the current format version, [`FORMAT_VERSION`].
    fn write(&self, writer: &mut dyn Write) -> Result<(), StoreError>;

}


/// State shared by both store implementations.
#[derive(Debug)]
pub struct StoreBase {
    world: ArcStr,
    chunk: ChunkLoc,
    /// Reference instant for the last use.
    created: Instant,
    /// Last use, in nanoseconds since `created`.
    last_use: AtomicU64,
}

impl StoreBase {

    pub fn new(world: ArcStr, chunk: ChunkLoc) -> Self {
        Self {
            world,
            chunk,
            created: Instant::now(),
            last_use: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn world(&self) -> &ArcStr {
        &self.world
    }

    #[inline]
    pub fn chunk(&self) -> ChunkLoc {
        self.chunk
    }

    /// Return true if the location is within this store's chunk.
    #[inline]
    pub fn contains(&self, loc: BlockLoc) -> bool {
        loc.chunk() == self.chunk
    }

    /// Panics if the location is not within this store's chunk.
    #[inline]
    #[track_caller]
    pub fn check(&self, loc: BlockLoc) {
        assert!(self.contains(loc), "location is not in this chunk: {loc} not in {}", self.chunk);
    }

    /// Update the last use to now.
    pub fn touch(&self) {
        let nanos = self.created.elapsed().as_nanos() as u64;
        self.last_use.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn time_since_use(&self) -> Duration {
        let last_use = Duration::from_nanos(self.last_use.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last_use)
    }

}


/// Error type returned by chunk store reads and writes.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported chunk store format version: {0}")]
    UnsupportedVersion(i32),
    #[error("chunk store {chunk} did not load within {timeout:?}")]
    LoadTimeout {
        chunk: ChunkLoc,
        timeout: Duration,
    },
    #[error("chunk store {chunk} failed to load")]
    LoadFailed {
        chunk: ChunkLoc,
    },
    #[error("incoherent chunk coordinates, expected {expected} but got {found}")]
    IncoherentChunk {
        expected: ChunkLoc,
        found: ChunkLoc,
    },
}
