//! The in-memory chunk store and its binary format.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::io::{self, Read, Write};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use arcstr::ArcStr;
use tracing::{debug, instrument};

use crate::util::{ReadDataExt, WriteDataExt, new_invalid_data_err};
use crate::meta::{BlockMeta, BlockValues, MetaValue, PluginValues};
use crate::loc::{BlockLoc, ChunkLoc, CHUNK_SIZE};
use crate::bits::PlacementBits;

use super::{ChunkStore, StoreBase, StoreError, legacy};


/// Format version written by [`ChunkStore::write`].
pub const FORMAT_VERSION: i32 = 2;
/// Legacy format version, only supported for reading.
pub const LEGACY_FORMAT_VERSION: i32 = 1;


/// A chunk store holding its data in memory. The placement bits and the dirty flag
/// are guarded by a read/write lock, the metadata mapping has its own lock. When both
/// are needed, the placement lock is always acquired first.
#[derive(Debug)]
pub struct LoadedChunkStore {
    base: StoreBase,
    state: RwLock<PlacementState>,
    /// Metadata of blocks, keyed by flat index. Records are lazily created by any
    /// access, even reads.
    metadata: Mutex<IndexMap<u16, BlockMeta>>,
}

#[derive(Debug)]
struct PlacementState {
    placed: PlacementBits,
    dirty: bool,
}

impl LoadedChunkStore {

    /// Create a new empty store, for a chunk that has never been stored.
    pub fn new(world: ArcStr, chunk: ChunkLoc) -> Self {
        Self::from_parts(world, chunk, PlacementBits::new(), IndexMap::new())
    }

    pub(super) fn from_parts(
        world: ArcStr, 
        chunk: ChunkLoc, 
        placed: PlacementBits, 
        metadata: IndexMap<u16, BlockMeta>,
    ) -> Self {
        Self {
            base: StoreBase::new(world, chunk),
            state: RwLock::new(PlacementState { placed, dirty: false }),
            metadata: Mutex::new(metadata),
        }
    }

    /// Read a store with the given file format version. The world name stored in the
    /// file is ignored, the store belongs to the given world, but the chunk 
    /// coordinates are the stored ones.
    #[instrument(level = "debug", skip(reader))]
    pub fn read(reader: impl Read, version: i32, world: ArcStr) -> Result<Self, StoreError> {
        let store = match version {
            LEGACY_FORMAT_VERSION => legacy::read(reader, world)?,
            FORMAT_VERSION => Self::read_current(reader, world)?,
            _ => return Err(StoreError::UnsupportedVersion(version)),
        };
        debug!("read chunk store {}, {} metadata records", store.chunk(), store.meta_count());
        Ok(store)
    }

    fn read_current(mut reader: impl Read, world: ArcStr) -> io::Result<Self> {

        // The stored world name is not authoritative.
        let _ = reader.read_data_string()?;
        let chunk = read_chunk_loc(&mut reader)?;
        let placed = PlacementBits::read_from(&mut reader)?;

        let metadata = read_metadata(&mut reader, |reader| {
            let index = reader.read_data_int()?;
            usize::try_from(index).ok()
                .filter(|&index| index < CHUNK_SIZE)
                .ok_or_else(|| new_invalid_data_err("block index out of chunk"))
        })?;

        Ok(Self::from_parts(world, chunk, placed, metadata))

    }

    /// Number of blocks placed in this store.
    pub fn placed_count(&self) -> usize {
        self.read_state().placed.count()
    }

    /// Number of metadata records currently allocated, including empty ones.
    pub fn meta_count(&self) -> usize {
        self.lock_metadata().len()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, PlacementState> {
        self.state.read().expect("chunk store lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PlacementState> {
        self.state.write().expect("chunk store lock poisoned")
    }

    fn lock_metadata(&self) -> MutexGuard<'_, IndexMap<u16, BlockMeta>> {
        self.metadata.lock().expect("chunk store metadata lock poisoned")
    }

    /// Run the function on the metadata record of the block, creating it if absent.
    fn with_meta<T>(&self, loc: BlockLoc, func: impl FnOnce(&mut BlockMeta) -> T) -> T {
        self.base.touch();
        let mut metadata = self.lock_metadata();
        func(metadata.entry(loc.index() as u16).or_default())
    }

    fn write_to(&self, mut writer: impl Write) -> io::Result<()> {

        let state = self.read_state();
        let metadata = self.lock_metadata();
        let chunk = self.chunk();

        writer.write_data_string(self.world())?;
        writer.write_data_int(chunk.x)?;
        writer.write_data_int(chunk.z)?;
        writer.write_data_int(chunk.y)?;
        state.placed.write_to(&mut writer)?;

        let plugins = metadata.values()
            .flat_map(|meta| meta.plugins())
            .collect::<IndexSet<i32>>();

        writer.write_data_int(plugins.len() as i32)?;

        for plugin in plugins {

            writer.write_data_int(plugin)?;

            let block_count = metadata.values()
                .filter(|meta| meta.contains_plugin(plugin))
                .count();

            writer.write_data_int(block_count as i32)?;

            for (&index, meta) in metadata.iter() {
                if meta.contains_plugin(plugin) {
                    writer.write_data_int(index as i32)?;
                    meta.write_plugin(&mut writer, plugin)?;
                }
            }

        }

        Ok(())

    }

}

impl ChunkStore for LoadedChunkStore {

    fn world(&self) -> &ArcStr {
        self.base.world()
    }

    fn chunk(&self) -> ChunkLoc {
        self.base.chunk()
    }

    fn time_since_use(&self) -> Duration {
        self.base.time_since_use()
    }

    fn is_dirty(&self) -> bool {
        self.read_state().dirty
    }

    fn is_placed(&self, loc: BlockLoc) -> Result<bool, StoreError> {
        self.base.check(loc);
        self.base.touch();
        Ok(self.read_state().placed.get(loc.index()))
    }

    fn set_placed(&self, loc: BlockLoc, placed: bool) {

        self.base.check(loc);
        self.base.touch();

        let mut state = self.write_state();
        state.placed.set(loc.index(), placed);

        if !placed {
            self.lock_metadata().shift_remove(&(loc.index() as u16));
        }

        state.dirty = true;

    }

    fn meta_value(&self, loc: BlockLoc, plugin: i32, key: i32) -> Result<Option<MetaValue>, StoreError> {
        self.base.check(loc);
        Ok(self.with_meta(loc, |meta| meta.value(plugin, key).cloned()))
    }

    fn plugin_meta_values(&self, loc: BlockLoc, plugin: i32) -> Result<PluginValues, StoreError> {
        self.base.check(loc);
        Ok(self.with_meta(loc, |meta| meta.plugin_values(plugin)))
    }

    fn meta_values(&self, loc: BlockLoc) -> Result<BlockValues, StoreError> {
        self.base.check(loc);
        Ok(self.with_meta(loc, |meta| meta.values()))
    }

    fn set_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32, value: MetaValue) {
        self.base.check(loc);
        let mut state = self.write_state();
        self.with_meta(loc, |meta| meta.set_value(plugin, key, value));
        state.dirty = true;
    }

    fn remove_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32) {
        self.base.check(loc);
        let mut state = self.write_state();
        self.with_meta(loc, |meta| meta.remove_value(plugin, key));
        state.dirty = true;
    }

    fn block_state(&self, loc: BlockLoc) -> Result<Option<BlockMeta>, StoreError> {

        self.base.check(loc);
        self.base.touch();

        // The placement guard is held while cloning the record, so an unplacing write
        // cannot land between the bit check and the metadata read.
        let state = self.read_state();
        if !state.placed.get(loc.index()) {
            return Ok(None);
        }

        let mut metadata = self.lock_metadata();
        Ok(Some(metadata.entry(loc.index() as u16).or_default().clone()))

    }

    fn set_block_state(&self, loc: BlockLoc, meta: BlockMeta) {

        self.base.check(loc);
        self.base.touch();

        let mut state = self.write_state();
        state.placed.set(loc.index(), true);
        self.lock_metadata().insert(loc.index() as u16, meta);
        state.dirty = true;

    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read_state().placed.is_empty())
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), StoreError> {
        Ok(self.write_to(writer)?)
    }

}


/// Read chunk coordinates, stored in X, Z, Y order.
pub(super) fn read_chunk_loc(reader: &mut impl Read) -> io::Result<ChunkLoc> {
    let x = reader.read_data_int()?;
    let z = reader.read_data_int()?;
    let y = reader.read_data_int()?;
    Ok(ChunkLoc::new(x, y, z))
}

/// Read the per-plugin metadata sections, the given function reads the location of
/// each record and resolves it to a flat index.
pub(super) fn read_metadata<R: Read>(
    reader: &mut R, 
    mut read_index: impl FnMut(&mut R) -> io::Result<usize>,
) -> io::Result<IndexMap<u16, BlockMeta>> {

    let mut metadata = IndexMap::<u16, BlockMeta>::new();

    let plugin_count = reader.read_data_int()?;
    for _ in 0..plugin_count {

        let plugin = reader.read_data_int()?;
        let block_count = reader.read_data_int()?;

        for _ in 0..block_count {
            let index = read_index(&mut *reader)?;
            metadata.entry(index as u16).or_default().read_plugin(&mut *reader, plugin)?;
        }

    }

    Ok(metadata)

}


#[cfg(test)]
mod tests {

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const CHUNK: ChunkLoc = ChunkLoc::new(3, 1, -7);

    fn new_store() -> LoadedChunkStore {
        LoadedChunkStore::new(ArcStr::from("world"), CHUNK)
    }

    fn loc(index: usize) -> BlockLoc {
        BlockLoc::from_index(CHUNK, index).unwrap()
    }

    /// Assert that both stores have the same placement bits and metadata values.
    fn assert_same_content(a: &LoadedChunkStore, b: &LoadedChunkStore) {
        assert_eq!(a.read_state().placed, b.read_state().placed);
        let indices = a.lock_metadata().keys().chain(b.lock_metadata().keys()).copied().collect::<Vec<_>>();
        for index in indices {
            let loc = BlockLoc::from_index(a.chunk(), index as usize).unwrap();
            assert_eq!(a.meta_values(loc).unwrap(), b.meta_values(loc).unwrap(), "metadata at {index}");
        }
    }

    #[test]
    fn empty() {
        let store = new_store();
        assert!(store.is_empty().unwrap());
        assert!(!store.is_dirty());
        assert!(!store.is_placed(loc(0)).unwrap());
    }

    #[test]
    fn set_placed() {

        let store = new_store();
        store.set_placed(loc(12), true);
        assert!(store.is_placed(loc(12)).unwrap());
        assert!(!store.is_empty().unwrap());
        assert!(store.is_dirty());

        store.set_placed(loc(12), true);
        assert_eq!(store.placed_count(), 1);

        store.set_placed(loc(12), false);
        assert!(!store.is_placed(loc(12)).unwrap());
        assert!(store.is_empty().unwrap());

    }

    #[test]
    fn boundary_indices() {

        let store = new_store();
        store.set_placed(loc(0), true);
        store.set_placed(loc(CHUNK_SIZE - 1), true);
        assert!(store.is_placed(loc(0)).unwrap());
        assert!(store.is_placed(loc(CHUNK_SIZE - 1)).unwrap());
        assert_eq!(store.placed_count(), 2);

    }

    #[test]
    #[should_panic(expected = "location is not in this chunk")]
    fn other_chunk_read() {
        let store = new_store();
        let _ = store.is_placed(BlockLoc::from_index(ChunkLoc::new(3, 0, -7), 0).unwrap());
    }

    #[test]
    #[should_panic(expected = "location is not in this chunk")]
    fn other_chunk_write() {
        let store = new_store();
        store.set_meta_value(BlockLoc::from_index(ChunkLoc::new(0, 0, 0), 5).unwrap(), 1, 1, MetaValue::Int(1));
    }

    #[test]
    fn meta_values() {

        let store = new_store();
        store.set_meta_value(loc(5), 1, 10, MetaValue::Int(100));
        store.set_meta_value(loc(5), 1, 11, MetaValue::from("name"));
        store.set_meta_value(loc(5), 2, 10, MetaValue::Bool(true));
        assert!(store.is_dirty());

        assert_eq!(store.meta_value(loc(5), 1, 10).unwrap(), Some(MetaValue::Int(100)));
        assert_eq!(store.meta_value(loc(5), 3, 10).unwrap(), None);
        assert_eq!(store.plugin_meta_values(loc(5), 1).unwrap().len(), 2);
        assert_eq!(store.meta_values(loc(5)).unwrap().len(), 2);

        store.remove_meta_value(loc(5), 2, 10);
        assert_eq!(store.meta_value(loc(5), 2, 10).unwrap(), None);
        assert_eq!(store.meta_values(loc(5)).unwrap().len(), 1);

    }

    #[test]
    fn unplace_clears_metadata() {

        let store = new_store();
        store.set_placed(loc(9), true);
        store.set_meta_value(loc(9), 1, 1, MetaValue::Long(7));
        store.set_meta_value(loc(9), 2, 1, MetaValue::Long(8));

        store.set_placed(loc(9), false);
        assert!(store.meta_values(loc(9)).unwrap().is_empty());

        // Clearing a block without metadata is fine too.
        store.set_placed(loc(10), false);
        assert!(store.meta_values(loc(10)).unwrap().is_empty());

    }

    #[test]
    fn lazy_metadata_allocation() {

        let store = new_store();
        assert_eq!(store.meta_count(), 0);

        // Reading the metadata of a block that is not placed allocates a record.
        assert_eq!(store.meta_value(loc(40), 1, 1).unwrap(), None);
        assert_eq!(store.meta_count(), 1);
        assert!(store.plugin_meta_values(loc(41), 1).unwrap().is_empty());
        assert!(store.meta_values(loc(42)).unwrap().is_empty());
        assert_eq!(store.meta_count(), 3);

        // Reads don't mark the store dirty.
        assert!(!store.is_dirty());

        // Empty records don't contain plugins and are therefore not written.
        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();
        let read = LoadedChunkStore::read(&buf[..], FORMAT_VERSION, ArcStr::from("world")).unwrap();
        assert_eq!(read.meta_count(), 0);

    }

    #[test]
    fn block_state() {

        let store = new_store();
        store.set_meta_value(loc(3), 1, 1, MetaValue::Int(1));
        assert_eq!(store.block_state(loc(3)).unwrap(), None);

        store.set_placed(loc(3), true);
        store.set_meta_value(loc(3), 1, 1, MetaValue::Int(2));
        let state = store.block_state(loc(3)).unwrap().unwrap();
        assert_eq!(state.value(1, 1), Some(&MetaValue::Int(2)));

        let mut replacement = BlockMeta::new();
        replacement.set_value(4, 4, MetaValue::Short(4));
        store.set_block_state(loc(100), replacement.clone());
        assert!(store.is_placed(loc(100)).unwrap());
        assert_eq!(store.block_state(loc(100)).unwrap(), Some(replacement.clone()));

        // Replacing is wholesale.
        store.set_block_state(loc(3), replacement);
        assert_eq!(store.meta_value(loc(3), 1, 1).unwrap(), None);
        assert_eq!(store.meta_value(loc(3), 4, 4).unwrap(), Some(MetaValue::Short(4)));

    }

    #[test]
    fn block_state_while_unplacing() {

        let store = new_store();
        let done = AtomicBool::new(false);

        let mut meta = BlockMeta::new();
        meta.set_value(1, 1, MetaValue::Int(1));

        thread::scope(|s| {

            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    store.set_block_state(loc(8), meta.clone());
                    store.set_placed(loc(8), false);
                }
            });

            for _ in 0..200_000 {
                if let Some(state) = store.block_state(loc(8)).unwrap() {
                    assert_eq!(state, meta);
                }
            }

            done.store(true, Ordering::Relaxed);

        });

        // A read of an unplaced cell never allocates a record.
        assert_eq!(store.block_state(loc(8)).unwrap(), None);
        assert_eq!(store.meta_count(), 0);

    }

    #[test]
    fn last_use() {

        let store = new_store();
        let pause = Duration::from_millis(30);

        thread::sleep(pause);
        assert!(store.time_since_use() >= pause);
        store.set_placed(loc(1), true);
        assert!(store.time_since_use() < pause);

        thread::sleep(pause);
        assert!(store.time_since_use() >= pause);
        store.block_state(loc(1)).unwrap();
        assert!(store.time_since_use() < pause);

    }

    #[test]
    fn write_header() {

        let store = new_store();
        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        let mut reader = &buf[..];
        assert_eq!(reader.read_data_string().unwrap(), "world");
        assert_eq!(reader.read_data_int().unwrap(), 3);
        assert_eq!(reader.read_data_int().unwrap(), -7);
        assert_eq!(reader.read_data_int().unwrap(), 1);
        assert!(PlacementBits::read_from(&mut reader).unwrap().is_empty());
        assert_eq!(reader.read_data_int().unwrap(), 0);
        assert!(reader.is_empty());

    }

    #[test]
    fn round_trip() {

        let store = new_store();
        for index in (0..CHUNK_SIZE).step_by(97) {
            store.set_placed(loc(index), true);
        }
        store.set_placed(loc(CHUNK_SIZE - 1), true);
        store.set_meta_value(loc(0), 1, 1, MetaValue::Int(-1));
        store.set_meta_value(loc(0), 2, 1, MetaValue::from("two"));
        store.set_meta_value(loc(97), 2, 5, MetaValue::ByteArray(vec![9, 8]));
        store.set_meta_value(loc(CHUNK_SIZE - 1), 3, -4, MetaValue::Double(1.25));
        // Metadata may exist without placement.
        store.set_meta_value(loc(1), 1, 2, MetaValue::Bool(false));

        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        let read = LoadedChunkStore::read(&buf[..], FORMAT_VERSION, ArcStr::from("renamed")).unwrap();
        assert_eq!(read.world().as_str(), "renamed");
        assert_eq!(read.chunk(), CHUNK);
        assert!(!read.is_dirty());
        assert_same_content(&store, &read);

    }

    #[test]
    fn unsupported_version() {
        let buf = Vec::new();
        let err = LoadedChunkStore::read(&buf[..], 3, ArcStr::from("world")).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(3)));
    }

    #[test]
    fn truncated() {

        let store = new_store();
        store.set_meta_value(loc(1), 1, 1, MetaValue::Int(1));
        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let err = LoadedChunkStore::read(&buf[..], FORMAT_VERSION, ArcStr::from("world")).unwrap_err();
        assert!(matches!(err, StoreError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof));

    }

    #[test]
    fn index_out_of_chunk() {

        let mut buf = Vec::new();
        new_store().write(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        buf.write_data_int(1).unwrap();
        buf.write_data_int(1).unwrap();
        buf.write_data_int(1).unwrap();
        buf.write_data_int(CHUNK_SIZE as i32).unwrap();

        let err = LoadedChunkStore::read(&buf[..], FORMAT_VERSION, ArcStr::from("world")).unwrap_err();
        assert!(matches!(err, StoreError::Io(err) if err.kind() == io::ErrorKind::InvalidData));

    }

    #[test]
    fn concurrent_readers() {

        let store = Arc::new(new_store());
        let done = Arc::new(AtomicBool::new(false));

        let readers = (0..4).map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Relaxed) {
                    // The writer only sets bits, a reader never see less bits than before.
                    let count = store.placed_count();
                    assert!(count >= last);
                    last = count;
                    let _ = store.is_placed(loc(count % CHUNK_SIZE)).unwrap();
                }
            })
        }).collect::<Vec<_>>();

        for index in 0..CHUNK_SIZE {
            store.set_placed(loc(index), true);
        }

        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(store.placed_count(), CHUNK_SIZE);

    }

}
