//! Object heap with explicit reference counts.
//!
//! Objects cross the call boundary as opaque handles into this table.
//! Counts are atomic; the entry is destroyed when the count hits zero.
//! Destruction order matters: the entry is pulled out of the map first
//! and dropped after every lock is released, so cascading releases of
//! nested references never re-enter a held shard.

use super::image::{self, ImageData};
use crate::lifetime;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use tracing::trace;

/// Opaque handle to a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

struct HeapEntry {
    refcount: AtomicU32,
    data: ImageData,
}

static HEAP: Lazy<DashMap<ObjectId, HeapEntry>> = Lazy::new(DashMap::new);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new object with a reference count of one.
pub fn alloc(data: ImageData) -> ObjectId {
    let id = ObjectId(NEXT_ID.fetch_add(1, Ordering::SeqCst));
    trace!(event = "object_new", id = id.0, width = data.width, height = data.height);
    HEAP.insert(
        id,
        HeapEntry {
            refcount: AtomicU32::new(1),
            data,
        },
    );
    id
}

/// Increment the reference count. Returns false if the object is dead.
pub fn retain(id: ObjectId) -> bool {
    match HEAP.get(&id) {
        Some(entry) => {
            let old = entry.refcount.fetch_add(1, Ordering::Relaxed);
            debug_assert!(old < u32::MAX, "refcount overflow");
            true
        }
        None => false,
    }
}

/// Decrement the reference count, destroying the object at zero.
pub fn release(id: ObjectId) {
    let destroy = match HEAP.get(&id) {
        Some(entry) => {
            let old = entry.refcount.fetch_sub(1, Ordering::Release);
            debug_assert!(old > 0, "refcount underflow");
            old == 1
        }
        None => false,
    };

    if destroy {
        // synchronize with all previous decrements
        fence(Ordering::Acquire);
        image::clear_eval(id);
        lifetime::forget(id);
        let removed = HEAP.remove(&id);
        trace!(event = "object_destroy", id = id.0);
        // entry dropped here, outside the map locks
        drop(removed);
    }
}

/// Current reference count, for tests and diagnostics.
pub fn refcount(id: ObjectId) -> u32 {
    HEAP.get(&id)
        .map(|entry| entry.refcount.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Number of live objects, for leak checks.
pub fn alive() -> usize {
    HEAP.len()
}

/// Run a closure against the object's data.
pub fn with_image<R>(id: ObjectId, f: impl FnOnce(&ImageData) -> R) -> Option<R> {
    HEAP.get(&id).map(|entry| f(&entry.data))
}

/// Run a closure against the object's data, mutably.
///
/// Anything the closure evicts (replaced metadata, say) should be returned
/// out of it and dropped by the caller, after the lock is gone.
pub fn with_image_mut<R>(id: ObjectId, f: impl FnOnce(&mut ImageData) -> R) -> Option<R> {
    HEAP.get_mut(&id).map(|mut entry| f(&mut entry.data))
}

/// Cheap copy of the object's data: pixel storage is shared, metadata is
/// duplicated. Kernels work from snapshots so no map lock is held while
/// they run.
pub fn snapshot(id: ObjectId) -> Option<ImageData> {
    HEAP.get(&id).map(|entry| entry.data.snapshot())
}

/// Deep, memory-resident copy as a fresh object with count one.
pub fn duplicate(id: ObjectId) -> Option<ObjectId> {
    let data = HEAP.get(&id).map(|entry| entry.data.duplicate())?;
    Some(alloc(data))
}
