//! The chunk store handle given while a chunk store is being loaded.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use std::io::Write;
use std::{fmt, mem};

use arcstr::ArcStr;
use tracing::{debug, error, trace, warn};

use crate::meta::{BlockMeta, BlockValues, MetaValue, PluginValues};
use crate::loc::{BlockLoc, ChunkLoc};
use crate::config;

use super::{ChunkStore, LoadedChunkStore, StoreBase, StoreError};


/// A callback to run once the store has been loaded.
type LoadCallback = Box<dyn FnOnce(&Arc<LoadedChunkStore>) + Send>;


/// A chunk store that delegates to a [`LoadedChunkStore`] loaded in background.
/// 
/// Until the loaded store is installed with [`Self::set_delegate`], mutations are 
/// queued and returns immediately while reads block until the store is loaded or the 
/// timeout of this store elapsed. Once installed, queued mutations are applied in 
/// their order and every later call is forwarded to the loaded store.
/// 
/// If loading fails, [`Self::set_failed`] discards the queue. Reads then fail with
/// [`StoreError::LoadFailed`] and later mutations are dropped.
pub struct LoadingChunkStore {
    base: StoreBase,
    /// Bound on the time reads wait for the store to be loaded, none to wait forever.
    timeout: Option<Duration>,
    state: Mutex<LoadState>,
    /// Notified once when the state becomes resolved.
    loaded: Condvar,
}

enum LoadState {
    Unresolved {
        actions: Vec<Action>,
        callbacks: Vec<LoadCallback>,
    },
    Resolved(Arc<LoadedChunkStore>),
    Failed,
}

impl LoadState {

    #[inline]
    fn is_pending(&self) -> bool {
        matches!(self, Self::Unresolved { .. })
    }

    #[inline]
    fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

}

/// A mutation queued while the store is loading.
#[derive(Debug)]
enum Action {
    SetPlaced { loc: BlockLoc, placed: bool },
    SetMetaValue { loc: BlockLoc, plugin: i32, key: i32, value: MetaValue },
    RemoveMetaValue { loc: BlockLoc, plugin: i32, key: i32 },
    SetBlockState { loc: BlockLoc, meta: BlockMeta },
}

impl Action {

    fn apply(self, store: &LoadedChunkStore) {
        match self {
            Action::SetPlaced { loc, placed } => 
                store.set_placed(loc, placed),
            Action::SetMetaValue { loc, plugin, key, value } => 
                store.set_meta_value(loc, plugin, key, value),
            Action::RemoveMetaValue { loc, plugin, key } => 
                store.remove_meta_value(loc, plugin, key),
            Action::SetBlockState { loc, meta } => 
                store.set_block_state(loc, meta),
        }
    }

}

impl LoadingChunkStore {

    /// Create a new loading store, reads wait at most for the configured 
    /// [`config::load_timeout`].
    pub fn new(world: ArcStr, chunk: ChunkLoc) -> Self {
        Self::with_timeout(world, chunk, config::load_timeout())
    }

    /// Create a new loading store where reads wait at most for the given timeout, or 
    /// forever if none.
    pub fn with_timeout(world: ArcStr, chunk: ChunkLoc, timeout: Option<Duration>) -> Self {
        Self {
            base: StoreBase::new(world, chunk),
            timeout,
            state: Mutex::new(LoadState::Unresolved { 
                actions: Vec::new(), 
                callbacks: Vec::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn lock_state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().expect("loading chunk store lock poisoned")
    }

    /// Return true if the loaded store has been installed.
    pub fn has_loaded(&self) -> bool {
        self.lock_state().is_resolved()
    }

    /// Return true if loading failed, see [`Self::set_failed`].
    pub fn has_failed(&self) -> bool {
        matches!(*self.lock_state(), LoadState::Failed)
    }

    /// Return the loaded store if already installed, without waiting.
    pub fn delegate(&self) -> Option<Arc<LoadedChunkStore>> {
        match &*self.lock_state() {
            LoadState::Resolved(delegate) => Some(Arc::clone(delegate)),
            _ => None,
        }
    }

    /// Wait for the loaded store to be installed and return it. An error is returned 
    /// if this store's timeout elapsed before or if loading failed.
    pub fn wait_loaded(&self) -> Result<Arc<LoadedChunkStore>, StoreError> {

        let state = self.lock_state();
        let state = match self.timeout {
            Some(timeout) => {
                self.loaded.wait_timeout_while(state, timeout, |state| state.is_pending())
                    .expect("loading chunk store lock poisoned").0
            }
            None => {
                self.loaded.wait_while(state, |state| state.is_pending())
                    .expect("loading chunk store lock poisoned")
            }
        };

        match &*state {
            LoadState::Resolved(delegate) => Ok(Arc::clone(delegate)),
            LoadState::Failed => Err(StoreError::LoadFailed { chunk: self.chunk() }),
            LoadState::Unresolved { .. } => {
                let timeout = self.timeout.unwrap_or_default();
                warn!("chunk store {} still loading after {timeout:?}", self.chunk());
                Err(StoreError::LoadTimeout { chunk: self.chunk(), timeout })
            }
        }

    }

    /// Register a callback to run with the loaded store once installed. If it is 
    /// already installed, the callback is run immediately. The callback is dropped 
    /// without running if loading failed.
    pub fn on_load(&self, callback: impl FnOnce(&Arc<LoadedChunkStore>) + Send + 'static) {

        let mut state = self.lock_state();
        let delegate = match &mut *state {
            LoadState::Unresolved { callbacks, .. } => {
                callbacks.push(Box::new(callback));
                return;
            }
            LoadState::Resolved(delegate) => Arc::clone(delegate),
            LoadState::Failed => {
                debug!("load callback dropped, chunk store {} failed to load", self.chunk());
                return;
            }
        };

        drop(state);
        callback(&delegate);

    }

    /// Install the loaded store, apply all queued mutations to it, wake up waiting 
    /// reads and finally run load callbacks. Panics if a store has already been 
    /// installed, if loading already failed or if the given store is not for the 
    /// same world and chunk.
    pub fn set_delegate(&self, delegate: Arc<LoadedChunkStore>) {

        assert_eq!(self.world(), delegate.world(), "must be in the same world");
        assert_eq!(self.chunk(), delegate.chunk(), "must be the same chunk");

        let mut state = self.lock_state();
        match *state {
            LoadState::Unresolved { .. } => {}
            LoadState::Resolved(_) => {
                drop(state);
                panic!("chunk store {} already has a delegate", self.chunk());
            }
            LoadState::Failed => {
                drop(state);
                panic!("chunk store {} already failed to load", self.chunk());
            }
        }

        let LoadState::Unresolved { actions, callbacks } = mem::replace(&mut *state, LoadState::Resolved(Arc::clone(&delegate))) else {
            unreachable!()
        };

        // Replay while holding the lock, concurrent mutations wait for the replay and
        // are then forwarded directly.
        let action_count = actions.len();
        for action in actions {
            action.apply(&delegate);
        }

        self.loaded.notify_all();
        drop(state);

        debug!("chunk store {} loaded, replayed {action_count} actions", self.chunk());

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&delegate))).is_err() {
                error!("load callback of chunk store {} panicked", self.chunk());
            }
        }

    }

    /// Mark loading as failed: queued mutations and load callbacks are discarded and 
    /// waiting reads are woken up with [`StoreError::LoadFailed`]. Nothing is done if 
    /// already failed, and panics if a store has already been installed.
    pub fn set_failed(&self) {

        let mut state = self.lock_state();
        let (actions, callbacks) = match mem::replace(&mut *state, LoadState::Failed) {
            LoadState::Unresolved { actions, callbacks } => (actions, callbacks),
            LoadState::Failed => return,
            resolved @ LoadState::Resolved(_) => {
                *state = resolved;
                drop(state);
                panic!("chunk store {} already has a delegate", self.chunk());
            }
        };

        self.loaded.notify_all();
        drop(state);

        warn!("chunk store {} failed to load, discarded {} actions and {} callbacks", 
            self.chunk(), actions.len(), callbacks.len());

    }

    /// Queue the mutation if not yet loaded, or apply it directly.
    fn queue(&self, action: Action) {

        let mut state = self.lock_state();
        let delegate = match &mut *state {
            LoadState::Unresolved { actions, .. } => {
                self.base.touch();
                trace!("queued on chunk store {}: {action:?}", self.chunk());
                actions.push(action);
                return;
            }
            LoadState::Resolved(delegate) => Arc::clone(delegate),
            LoadState::Failed => {
                self.base.touch();
                warn!("dropped on failed chunk store {}: {action:?}", self.chunk());
                return;
            }
        };

        drop(state);
        action.apply(&delegate);

    }

}

impl ChunkStore for LoadingChunkStore {

    fn world(&self) -> &ArcStr {
        self.base.world()
    }

    fn chunk(&self) -> ChunkLoc {
        self.base.chunk()
    }

    fn time_since_use(&self) -> Duration {
        match self.delegate() {
            Some(delegate) => delegate.time_since_use(),
            None => self.base.time_since_use(),
        }
    }

    fn is_dirty(&self) -> bool {
        match &*self.lock_state() {
            LoadState::Unresolved { actions, .. } => !actions.is_empty(),
            LoadState::Resolved(delegate) => delegate.is_dirty(),
            LoadState::Failed => false,
        }
    }

    fn is_placed(&self, loc: BlockLoc) -> Result<bool, StoreError> {
        self.base.check(loc);
        self.wait_loaded()?.is_placed(loc)
    }

    fn set_placed(&self, loc: BlockLoc, placed: bool) {
        self.base.check(loc);
        self.queue(Action::SetPlaced { loc, placed });
    }

    fn meta_value(&self, loc: BlockLoc, plugin: i32, key: i32) -> Result<Option<MetaValue>, StoreError> {
        self.base.check(loc);
        self.wait_loaded()?.meta_value(loc, plugin, key)
    }

    fn plugin_meta_values(&self, loc: BlockLoc, plugin: i32) -> Result<PluginValues, StoreError> {
        self.base.check(loc);
        self.wait_loaded()?.plugin_meta_values(loc, plugin)
    }

    fn meta_values(&self, loc: BlockLoc) -> Result<BlockValues, StoreError> {
        self.base.check(loc);
        self.wait_loaded()?.meta_values(loc)
    }

    fn set_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32, value: MetaValue) {
        self.base.check(loc);
        self.queue(Action::SetMetaValue { loc, plugin, key, value });
    }

    fn remove_meta_value(&self, loc: BlockLoc, plugin: i32, key: i32) {
        self.base.check(loc);
        self.queue(Action::RemoveMetaValue { loc, plugin, key });
    }

    fn block_state(&self, loc: BlockLoc) -> Result<Option<BlockMeta>, StoreError> {
        self.base.check(loc);
        self.wait_loaded()?.block_state(loc)
    }

    fn set_block_state(&self, loc: BlockLoc, meta: BlockMeta) {
        self.base.check(loc);
        self.queue(Action::SetBlockState { loc, meta });
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        self.wait_loaded()?.is_empty()
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), StoreError> {
        self.wait_loaded()?.write(writer)
    }

}

impl fmt::Debug for LoadingChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingChunkStore")
            .field("world", self.world())
            .field("chunk", &self.chunk())
            .field("timeout", &self.timeout)
            .field("loaded", &self.has_loaded())
            .field("failed", &self.has_failed())
            .finish()
    }
}
