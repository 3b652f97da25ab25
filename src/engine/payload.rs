//! Runtime value payloads.
//!
//! A `Payload` is the runtime-side representation of one tagged value:
//! scalars are stored inline, strings and arrays are runtime-owned, object
//! references carry an explicit ownership marker, and blobs live in
//! shared, runtime-owned buffers with an optional deallocation callback.
//! Ownership is always explicit: duplicating a payload retains every
//! object reference it holds, and dropping it releases them again.

use super::heap::{self, ObjectId};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A reference to a heap object, owned or borrowed.
///
/// An owned reference holds one count on the object and gives it back on
/// drop. A borrowed reference holds nothing; the borrower must not outlive
/// whoever owns the count it leans on.
pub struct ObjectRef {
    id: ObjectId,
    owned: bool,
}

impl ObjectRef {
    /// Borrow an object without touching its reference count.
    pub fn borrowed(id: ObjectId) -> ObjectRef {
        ObjectRef { id, owned: false }
    }

    /// Adopt an existing reference count.
    pub fn owned(id: ObjectId) -> ObjectRef {
        ObjectRef { id, owned: true }
    }

    /// Take a new reference count on the object.
    pub fn retained(id: ObjectId) -> ObjectRef {
        heap::retain(id);
        ObjectRef { id, owned: true }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// An owned duplicate; the object gains one count.
    pub fn retain_clone(&self) -> ObjectRef {
        ObjectRef::retained(self.id)
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if self.owned {
            heap::release(self.id);
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}{})", self.id.0, if self.owned { "" } else { ", borrowed" })
    }
}

/// Deallocation hook invoked when the last reference to a blob drops.
pub type FreeFn = Box<dyn FnOnce() + Send + Sync>;

struct BlobInner {
    bytes: Vec<u8>,
    free: Option<FreeFn>,
}

impl Drop for BlobInner {
    fn drop(&mut self) {
        if let Some(free) = self.free.take() {
            free();
        }
    }
}

/// A runtime-owned byte buffer, shared by reference count.
///
/// The buffer survives independently of any tagged value that points at
/// it, so the runtime can keep reading it after the value is released.
#[derive(Clone)]
pub struct BlobBuf {
    inner: Arc<BlobInner>,
}

impl BlobBuf {
    /// Copy host bytes into a fresh runtime-owned buffer. The optional
    /// callback runs exactly once, when the final reference drops.
    pub fn copied(bytes: &[u8], free: Option<FreeFn>) -> BlobBuf {
        BlobBuf {
            inner: Arc::new(BlobInner { bytes: bytes.to_vec(), free }),
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }
}

impl fmt::Debug for BlobBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobBuf({} bytes)", self.inner.bytes.len())
    }
}

/// The tagged union behind every runtime value.
#[derive(Debug)]
pub enum Payload {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Enum(i32),
    Flags(u32),
    Object(ObjectRef),
    ArrayInt(Vec<i64>),
    ArrayDouble(Vec<f64>),
    ArrayObject(Vec<ObjectRef>),
    Blob(BlobBuf),
}

impl Payload {
    /// Deep-enough copy: plain data is cloned, object references are
    /// retained, blob buffers are shared.
    pub fn duplicate(&self) -> Payload {
        match self {
            Payload::Bool(v) => Payload::Bool(*v),
            Payload::Int(v) => Payload::Int(*v),
            Payload::Double(v) => Payload::Double(*v),
            Payload::Str(v) => Payload::Str(v.clone()),
            Payload::Enum(v) => Payload::Enum(*v),
            Payload::Flags(v) => Payload::Flags(*v),
            Payload::Object(r) => Payload::Object(r.retain_clone()),
            Payload::ArrayInt(v) => Payload::ArrayInt(v.clone()),
            Payload::ArrayDouble(v) => Payload::ArrayDouble(v.clone()),
            Payload::ArrayObject(v) => {
                Payload::ArrayObject(v.iter().map(ObjectRef::retain_clone).collect())
            }
            Payload::Blob(b) => {
                trace!(bytes = b.len(), "sharing blob buffer");
                Payload::Blob(b.clone())
            }
        }
    }

    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Double(_) => "double",
            Payload::Str(_) => "string",
            Payload::Enum(_) => "enum",
            Payload::Flags(_) => "flags",
            Payload::Object(_) => "object",
            Payload::ArrayInt(_) => "array-int",
            Payload::ArrayDouble(_) => "array-double",
            Payload::ArrayObject(_) => "array-image",
            Payload::Blob(_) => "blob",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_blob_free_callback_runs_once_at_last_reference() {
        static FREED: AtomicBool = AtomicBool::new(false);
        FREED.store(false, Ordering::SeqCst);

        let blob = BlobBuf::copied(b"abc", Some(Box::new(|| FREED.store(true, Ordering::SeqCst))));
        let shared = blob.clone();
        drop(blob);
        assert!(!FREED.load(Ordering::SeqCst));
        drop(shared);
        assert!(FREED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_blob_copies_host_bytes() {
        let mut host = vec![1u8, 2, 3];
        let blob = BlobBuf::copied(&host, None);
        host[0] = 99;
        assert_eq!(blob.bytes(), &[1, 2, 3]);
    }
}
