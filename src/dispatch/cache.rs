//! Operation memo cache.
//!
//! At most one live result set per equivalent bound-argument set:
//! repeated identical calls reuse the prior outputs instead of
//! re-executing. Keys fingerprint every bound value (objects by handle
//! identity, blobs by content hash) and the cache owns references to
//! the outputs it holds, released on eviction.

use crate::engine::instance::Instance;
use crate::engine::payload::Payload;
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::debug;

const DEFAULT_MAX: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Fingerprint {
    Bool(bool),
    Int(i64),
    /// f64 bit pattern, for exact-identity hashing.
    Double(u64),
    Str(String),
    Enum(i32),
    Flags(u32),
    /// Objects compare by handle identity, never by content.
    Object(u64),
    ArrayInt(Vec<i64>),
    ArrayDouble(Vec<u64>),
    ArrayObject(Vec<u64>),
    /// Content hash; equal bytes memoize together.
    Blob([u8; 32]),
}

fn fingerprint(payload: &Payload) -> Fingerprint {
    match payload {
        Payload::Bool(v) => Fingerprint::Bool(*v),
        Payload::Int(v) => Fingerprint::Int(*v),
        Payload::Double(v) => Fingerprint::Double(v.to_bits()),
        Payload::Str(v) => Fingerprint::Str(v.clone()),
        Payload::Enum(v) => Fingerprint::Enum(*v),
        Payload::Flags(v) => Fingerprint::Flags(*v),
        Payload::Object(r) => Fingerprint::Object(r.id().0),
        Payload::ArrayInt(v) => Fingerprint::ArrayInt(v.clone()),
        Payload::ArrayDouble(v) => {
            Fingerprint::ArrayDouble(v.iter().map(|x| x.to_bits()).collect())
        }
        Payload::ArrayObject(refs) => {
            Fingerprint::ArrayObject(refs.iter().map(|r| r.id().0).collect())
        }
        Payload::Blob(b) => Fingerprint::Blob(*blake3::hash(b.bytes()).as_bytes()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    operation: String,
    arguments: Vec<(String, Fingerprint)>,
}

/// Fingerprint an instance's bound arguments, sorted for stability.
pub(crate) fn key_for(operation: &str, instance: &Instance) -> CacheKey {
    let mut arguments: Vec<(String, Fingerprint)> = instance
        .bound()
        .map(|(name, payload)| (name.to_string(), fingerprint(payload)))
        .collect();
    arguments.sort_by(|a, b| a.0.cmp(&b.0));
    CacheKey {
        operation: operation.to_string(),
        arguments,
    }
}

pub(crate) type CachedOutputs = Vec<(String, Payload)>;

/// `None` means the cache is disabled.
static CACHE: Lazy<Mutex<Option<LruCache<CacheKey, CachedOutputs>>>> = Lazy::new(|| {
    Mutex::new(NonZeroUsize::new(DEFAULT_MAX).map(LruCache::new))
});

/// Resize the cache; zero disables it and drops everything held.
pub fn set_max(max: usize) {
    let mut cache = CACHE.lock();
    match NonZeroUsize::new(max) {
        Some(capacity) => match cache.as_mut() {
            Some(existing) => existing.resize(capacity),
            None => *cache = Some(LruCache::new(capacity)),
        },
        None => *cache = None,
    }
}

/// Drop every held result set, releasing the references they own.
pub fn drop_all() {
    let mut cache = CACHE.lock();
    if let Some(cache) = cache.as_mut() {
        debug!(entries = cache.len(), "dropping memoized operations");
        cache.clear();
    }
}

pub(crate) fn lookup(key: &CacheKey) -> Option<CachedOutputs> {
    let mut cache = CACHE.lock();
    let outputs = cache.as_mut()?.get(key)?;
    Some(
        outputs
            .iter()
            .map(|(name, payload)| (name.clone(), payload.duplicate()))
            .collect(),
    )
}

pub(crate) fn insert(key: CacheKey, outputs: &CachedOutputs) {
    let mut cache = CACHE.lock();
    if let Some(cache) = cache.as_mut() {
        let held = outputs
            .iter()
            .map(|(name, payload)| (name.clone(), payload.duplicate()))
            .collect();
        cache.put(key, held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::payload::Payload;

    #[test]
    fn test_blob_fingerprints_by_content() {
        use crate::engine::payload::BlobBuf;
        let a = fingerprint(&Payload::Blob(BlobBuf::copied(b"same", None)));
        let b = fingerprint(&Payload::Blob(BlobBuf::copied(b"same", None)));
        let c = fingerprint(&Payload::Blob(BlobBuf::copied(b"other", None)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_double_fingerprint_is_exact() {
        assert_ne!(
            fingerprint(&Payload::Double(0.1)),
            fingerprint(&Payload::Double(0.2))
        );
    }
}
