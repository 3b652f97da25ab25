//! Lifetime tracking for borrowed host memory.
//!
//! Objects built over host-owned buffers do not copy them; instead the
//! buffer is recorded here against the object, and every object derived
//! from it inherits the record. The tracker holds strong references, so
//! the host memory stays alive exactly as long as some object that may
//! still read it. Membership is by buffer identity, never by content;
//! two equal buffers have independent lifetimes.

use crate::engine::heap::ObjectId;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// A host-owned buffer held alive on behalf of some object.
#[derive(Clone)]
pub struct TrackedBuffer(Arc<[u8]>);

impl TrackedBuffer {
    pub fn new(data: Arc<[u8]>) -> TrackedBuffer {
        TrackedBuffer(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identity key: the buffer's address, not its contents.
    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }

    /// Same underlying allocation?
    pub fn same(&self, other: &TrackedBuffer) -> bool {
        self.key() == other.key()
    }
}

impl PartialEq for TrackedBuffer {
    fn eq(&self, other: &TrackedBuffer) -> bool {
        self.same(other)
    }
}

impl Eq for TrackedBuffer {}

impl fmt::Debug for TrackedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackedBuffer({:#x}, {} bytes)", self.key(), self.0.len())
    }
}

type BufferSet = SmallVec<[TrackedBuffer; 2]>;

static TRACKED: Lazy<DashMap<ObjectId, BufferSet>> = Lazy::new(DashMap::new);

/// Record that `id` depends on `buffer`.
pub fn track(id: ObjectId, buffer: TrackedBuffer) {
    let mut set = TRACKED.entry(id).or_default();
    if !set.iter().any(|held| held.same(&buffer)) {
        set.push(buffer);
    }
}

/// Union a set of buffers into the object's record.
pub fn track_all(id: ObjectId, buffers: &[TrackedBuffer]) {
    if buffers.is_empty() {
        return;
    }
    let mut set = TRACKED.entry(id).or_default();
    for buffer in buffers {
        if !set.iter().any(|held| held.same(buffer)) {
            set.push(buffer.clone());
        }
    }
}

/// The buffers an object currently depends on.
pub fn tracked(id: ObjectId) -> Vec<TrackedBuffer> {
    TRACKED
        .get(&id)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

/// Transitive propagation: everything the sources depend on, the
/// destination depends on too.
pub fn propagate(sources: &[ObjectId], destination: ObjectId) {
    let mut union: Vec<TrackedBuffer> = Vec::new();
    for source in sources {
        for buffer in tracked(*source) {
            if !union.iter().any(|held| held.same(&buffer)) {
                union.push(buffer);
            }
        }
    }
    track_all(destination, &union);
}

/// Drop an object's record; called when the object is destroyed.
pub(crate) fn forget(id: ObjectId) {
    TRACKED.remove(&id);
}
