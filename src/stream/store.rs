use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::ChunkError;
use crate::models::Chunk;

pub type LoadResult = Result<Chunk, ChunkError>;

/// Receiver side of an in-flight load; resolves to `Some` exactly once
pub type LoadWatch = watch::Receiver<Option<LoadResult>>;

/// Outcome of asking the store for a chunk
pub enum Claim {
    /// Already decoded and resident
    Resident(Chunk),
    /// Another caller is loading it; wait on the receiver
    Pending(LoadWatch),
    /// Caller now owns the load and must publish through `complete`
    Owner {
        epoch: u64,
        sender: watch::Sender<Option<LoadResult>>,
        receiver: LoadWatch,
    },
}

#[derive(Default)]
struct StoreInner {
    epoch: u64,
    chunks: BTreeMap<usize, Chunk>,
    in_flight: HashMap<usize, LoadWatch>,
}

/// Resident chunks of one track plus the loads currently in flight.
///
/// `clear` bumps the epoch; loads that started before it are discarded when
/// they complete.
#[derive(Default)]
pub struct ChunkStore {
    inner: Mutex<StoreInner>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn has(&self, index: usize) -> bool {
        self.lock().chunks.contains_key(&index)
    }

    pub fn get(&self, index: usize) -> Option<Chunk> {
        self.lock().chunks.get(&index).cloned()
    }

    pub fn put(&self, chunk: Chunk) {
        self.lock().chunks.insert(chunk.index, chunk);
    }

    pub fn evict(&self, index: usize) -> Option<Chunk> {
        self.lock().chunks.remove(&index)
    }

    /// Evict every chunk outside `first..=last`; returns how many went
    pub fn evict_outside(&self, first: usize, last: usize) -> usize {
        let mut inner = self.lock();
        let before = inner.chunks.len();
        inner.chunks.retain(|&index, _| index >= first && index <= last);
        before - inner.chunks.len()
    }

    /// Drop all chunks and forget in-flight loads
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.chunks.clear();
        inner.in_flight.clear();
    }

    pub fn is_loading(&self, index: usize) -> bool {
        self.lock().in_flight.contains_key(&index)
    }

    pub fn loading_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    /// Sorted indices of resident chunks
    pub fn resident_indices(&self) -> Vec<usize> {
        self.lock().chunks.keys().copied().collect()
    }

    /// Decoded bytes held by resident chunks
    pub fn memory_bytes(&self) -> u64 {
        self.lock().chunks.values().map(|c| c.buffer.byte_len() as u64).sum()
    }

    /// Raw payload bytes of resident chunks
    pub fn payload_bytes(&self) -> u64 {
        self.lock().chunks.values().map(|c| c.size_bytes as u64).sum()
    }

    /// Resident chunk, shared in-flight load, or ownership of a new load
    pub fn claim(&self, index: usize) -> Claim {
        let mut inner = self.lock();
        if let Some(chunk) = inner.chunks.get(&index) {
            return Claim::Resident(chunk.clone());
        }
        if let Some(receiver) = inner.in_flight.get(&index) {
            return Claim::Pending(receiver.clone());
        }
        let (sender, receiver) = watch::channel(None);
        inner.in_flight.insert(index, receiver.clone());
        Claim::Owner {
            epoch: inner.epoch,
            sender,
            receiver,
        }
    }

    /// Finish a load started under `epoch`. The chunk is stored only if no
    /// `clear` happened since; returns whether it was stored.
    pub fn complete(&self, epoch: u64, index: usize, result: &LoadResult) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.in_flight.remove(&index);
        match result {
            Ok(chunk) => {
                inner.chunks.insert(index, chunk.clone());
                true
            }
            Err(_) => false,
        }
    }
}

/// Wait for an in-flight load to publish its result
pub async fn wait_for_load(mut receiver: LoadWatch, index: usize) -> LoadResult {
    match receiver.wait_for(|result| result.is_some()).await {
        Ok(result) => result.clone().unwrap_or(Err(ChunkError::Superseded { index })),
        Err(_) => Err(ChunkError::Superseded { index }),
    }
}
