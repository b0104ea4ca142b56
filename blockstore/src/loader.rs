//! A thread-based chunk store loader. Loading stores are returned immediately while
//! worker threads decode the stored data and install the loaded stores.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use arcstr::ArcStr;
use tracing::{debug, instrument};

use crate::store::{ChunkStore, LoadedChunkStore, LoadingChunkStore, StoreError};
use crate::loc::ChunkLoc;
use crate::config;


/// Serialized data of a previously written chunk store.
#[derive(Debug, Clone)]
pub struct StoreSource {
    /// The format version the data was written with.
    pub version: i32,
    pub data: Vec<u8>,
}

/// This structure is a handle around the loader worker threads.
pub struct StoreLoader {
    /// Request sender to loader workers.
    request_sender: Sender<LoadRequest>,
    /// Reply receiver from loader workers.
    reply_receiver: Receiver<LoadReply>,
}

/// A loader worker, many workers share the same request channel.
struct LoadWorker {
    request_receiver: Receiver<LoadRequest>,
    reply_sender: Sender<LoadReply>,
}

struct LoadRequest {
    store: Arc<LoadingChunkStore>,
    source: Option<StoreSource>,
}

/// A reply from the loader for a previously requested load.
#[derive(Debug)]
pub enum LoadReply {
    /// The loaded store has been installed in the loading store.
    Loaded(Arc<LoadingChunkStore>),
    /// The store could not be loaded. The loading store has been marked failed, its 
    /// queued mutations are discarded and its reads return [`StoreError::LoadFailed`].
    Failed(Arc<LoadingChunkStore>, StoreError),
}

impl StoreLoader {

    /// Create a new loader with the given number of worker threads.
    pub fn new(workers: usize) -> Self {

        let (
            request_sender,
            request_receiver,
        ) = bounded(100 * workers.max(1));

        // Replies are unbounded so that a consumer not polling never blocks workers.
        let (
            reply_sender,
            reply_receiver,
        ) = unbounded();

        for i in 0..workers.max(1) {

            let worker = LoadWorker {
                request_receiver: request_receiver.clone(),
                reply_sender: reply_sender.clone(),
            };

            thread::Builder::new()
                .name(format!("Chunk Store Loader #{i}"))
                .spawn(move || worker.run())
                .expect("failed to spawn chunk store loader thread");

        }

        Self {
            request_sender,
            reply_receiver,
        }

    }

    /// Create a new loader with the configured number of workers, see 
    /// [`config::loader_workers`].
    pub fn with_default_workers() -> Self {
        Self::new(config::loader_workers())
    }

    /// Request loading of a chunk store, a new empty store is loaded if no source is
    /// given. The returned store can be used immediately.
    pub fn load(&self, world: ArcStr, chunk: ChunkLoc, source: Option<StoreSource>) -> Arc<LoadingChunkStore> {
        let store = Arc::new(LoadingChunkStore::new(world, chunk));
        self.request_load(Arc::clone(&store), source);
        store
    }

    /// Request loading of the given loading store.
    pub fn request_load(&self, store: Arc<LoadingChunkStore>, source: Option<StoreSource>) {
        self.request_sender.send(LoadRequest { store, source })
            .expect("worker should not disconnect while this handle exists");
    }

    /// Poll without blocking this loader for new reply to requested loads. This 
    /// function returns none if there is not new reply to poll.
    pub fn poll(&self) -> Option<LoadReply> {
        match self.reply_receiver.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!("worker should not disconnect while this handle exists"),
        }
    }

    /// Wait for the next reply to requested loads.
    pub fn recv(&self) -> LoadReply {
        self.reply_receiver.recv()
            .expect("worker should not disconnect while this handle exists")
    }

}

impl LoadWorker {

    fn run(self) {
        // Run while the channel is existing, so while the associated handle exists.
        while let Ok(request) = self.request_receiver.recv() {
            let reply = match Self::load(&request.store, request.source) {
                Ok(()) => LoadReply::Loaded(request.store),
                Err(err) => {
                    request.store.set_failed();
                    LoadReply::Failed(request.store, err)
                }
            };
            if self.reply_sender.send(reply).is_err() {
                break;
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(chunk = %store.chunk()))]
    fn load(store: &LoadingChunkStore, source: Option<StoreSource>) -> Result<(), StoreError> {

        let world = store.world().clone();
        let loaded = match source {
            Some(source) => LoadedChunkStore::read(&source.data[..], source.version, world)?,
            None => LoadedChunkStore::new(world, store.chunk()),
        };

        if loaded.chunk() != store.chunk() {
            return Err(StoreError::IncoherentChunk { 
                expected: store.chunk(), 
                found: loaded.chunk(),
            });
        }

        store.set_delegate(Arc::new(loaded));
        debug!("installed loaded chunk store");
        Ok(())

    }

}
