//! Remote-memory collaborator: where resolved block bytes live.
//!
//! The engine never owns block bytes. A resolved slot holds a [`ChunkRef`]
//! that locates bytes held by a [`RemoteMemory`] implementation, which
//! reference-counts them and releases storage when the last reference goes.
//!
//! * [`RemoteMemory::fetch_local`] copies a chunk's bytes to the caller (a
//!   remote fetch when the owner is another machine).
//! * [`RemoteMemory::retain`] / [`RemoteMemory::release`] adjust the
//!   collaborator's reference count.
//! * [`ChunkLease`] wraps both in RAII form: cloning retains, dropping
//!   releases. Every reference the engine holds is a lease.
//!
//! [`InMemoryStore`] is the in-process implementation used by the local
//! cluster. It keeps fetch diagnostics and lets tests mark processors
//! unreachable to exercise fetch failures.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::error::FetchError;
use crate::engine::types::{ChunkID, ProcessorID, Scope};

/// Handle locating the bytes of one materialized block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    /// Chunk identifier within the store.
    pub id: ChunkID,
    /// Processor holding the bytes.
    pub owner: ProcessorID,
    /// Where the chunk may be accessed.
    pub scope: Scope,
    /// Size of the chunk in bytes.
    pub byte_len: usize,
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}@{} ({} bytes, {})", self.id, self.owner, self.byte_len, self.scope)
    }
}

/// Interface the engine consumes from the remote-memory collaborator.
pub trait RemoteMemory: Send + Sync {
    /// Copies the chunk's bytes to the calling process.
    fn fetch_local(&self, chunk: &ChunkRef) -> Result<Bytes, FetchError>;

    /// Adds one reference to the chunk.
    fn retain(&self, chunk: &ChunkRef);

    /// Drops one reference; storage is reclaimed at zero.
    fn release(&self, chunk: &ChunkRef);
}

/// Counted reference to a chunk. Retains on clone, releases on drop.
pub struct ChunkLease {
    chunk: ChunkRef,
    memory: Arc<dyn RemoteMemory>,
}

impl ChunkLease {
    /// Takes over a reference the caller already holds (for example the
    /// initial reference returned by a store's `put`).
    pub fn adopt(chunk: ChunkRef, memory: Arc<dyn RemoteMemory>) -> Self {
        Self { chunk, memory }
    }

    /// Acquires a new reference to `chunk`.
    pub fn retain(chunk: ChunkRef, memory: Arc<dyn RemoteMemory>) -> Self {
        memory.retain(&chunk);
        Self { chunk, memory }
    }

    /// The leased chunk.
    pub fn chunk(&self) -> &ChunkRef {
        &self.chunk
    }

    /// Fetches the chunk's bytes.
    pub fn fetch(&self) -> Result<Bytes, FetchError> {
        self.memory.fetch_local(&self.chunk)
    }
}

impl Clone for ChunkLease {
    fn clone(&self) -> Self {
        Self::retain(self.chunk, Arc::clone(&self.memory))
    }
}

impl Drop for ChunkLease {
    fn drop(&mut self) {
        self.memory.release(&self.chunk);
    }
}

impl fmt::Debug for ChunkLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChunkLease").field(&self.chunk).finish()
    }
}

struct StoredChunk {
    bytes: Bytes,
    refs: usize,
}

/// Fetch statistics kept by [`InMemoryStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreDiagnostics {
    /// Chunks currently held.
    pub live_chunks: usize,
    /// Bytes currently held.
    pub live_bytes: usize,
    /// Number of successful fetches.
    pub fetch_count: u64,
    /// Total bytes returned by fetches.
    pub fetched_bytes: u64,
}

/// In-process reference-counted chunk store.
pub struct InMemoryStore {
    chunks: Mutex<HashMap<ChunkID, StoredChunk>>,
    unreachable: Mutex<HashSet<ProcessorID>>,
    next_id: AtomicU64,
    fetch_count: AtomicU64,
    fetched_bytes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            fetch_count: AtomicU64::new(0),
            fetched_bytes: AtomicU64::new(0),
        }
    }

    /// Stores `bytes` on `owner` with one reference held by the caller.
    pub fn put(&self, owner: ProcessorID, scope: Scope, bytes: Bytes) -> ChunkRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let chunk = ChunkRef { id, owner, scope, byte_len: bytes.len() };
        self.chunks.lock().insert(id, StoredChunk { bytes, refs: 1 });
        chunk
    }

    /// Number of chunks currently held.
    pub fn live_chunks(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Current reference count of a chunk, or `None` once released.
    pub fn ref_count(&self, chunk: ChunkID) -> Option<usize> {
        self.chunks.lock().get(&chunk).map(|stored| stored.refs)
    }

    /// Makes fetches of chunks owned by `processor` fail.
    pub fn mark_unreachable(&self, processor: ProcessorID) {
        self.unreachable.lock().insert(processor);
    }

    /// Undoes [`InMemoryStore::mark_unreachable`].
    pub fn mark_reachable(&self, processor: ProcessorID) {
        self.unreachable.lock().remove(&processor);
    }

    /// Snapshot of the store's statistics.
    pub fn diagnostics(&self) -> StoreDiagnostics {
        let chunks = self.chunks.lock();
        StoreDiagnostics {
            live_chunks: chunks.len(),
            live_bytes: chunks.values().map(|stored| stored.bytes.len()).sum(),
            fetch_count: self.fetch_count.load(Ordering::Relaxed),
            fetched_bytes: self.fetched_bytes.load(Ordering::Relaxed),
        }
    }
}

impl RemoteMemory for InMemoryStore {
    fn fetch_local(&self, chunk: &ChunkRef) -> Result<Bytes, FetchError> {
        if self.unreachable.lock().contains(&chunk.owner) {
            return Err(FetchError::Unreachable(chunk.owner));
        }
        let bytes = self
            .chunks
            .lock()
            .get(&chunk.id)
            .map(|stored| stored.bytes.clone())
            .ok_or(FetchError::Released(chunk.id))?;
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.fetched_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }

    fn retain(&self, chunk: &ChunkRef) {
        if let Some(stored) = self.chunks.lock().get_mut(&chunk.id) {
            stored.refs += 1;
        }
    }

    fn release(&self, chunk: &ChunkRef) {
        let mut chunks = self.chunks.lock();
        if let Some(stored) = chunks.get_mut(&chunk.id) {
            stored.refs -= 1;
            if stored.refs == 0 {
                chunks.remove(&chunk.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_clone_and_drop_track_references() {
        let store = Arc::new(InMemoryStore::new());
        let chunk = store.put(1, Scope::Processor(1), Bytes::from_static(&[1, 2, 3]));
        let memory: Arc<dyn RemoteMemory> = store.clone();

        let lease = ChunkLease::adopt(chunk, Arc::clone(&memory));
        let second = lease.clone();
        assert_eq!(store.ref_count(chunk.id), Some(2));

        drop(lease);
        assert_eq!(store.ref_count(chunk.id), Some(1));
        assert_eq!(second.fetch().unwrap().as_ref(), &[1, 2, 3]);

        drop(second);
        assert_eq!(store.live_chunks(), 0);
    }

    #[test]
    fn unreachable_owner_fails_fetch() {
        let store = InMemoryStore::new();
        let chunk = store.put(3, Scope::Any, Bytes::from_static(&[0]));
        store.mark_unreachable(3);
        assert_eq!(store.fetch_local(&chunk), Err(FetchError::Unreachable(3)));
        store.mark_reachable(3);
        assert!(store.fetch_local(&chunk).is_ok());
    }
}
