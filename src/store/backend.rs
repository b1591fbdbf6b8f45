//! Opens a concrete backend from a [`StoreSpec`], and a small wrapper
//! gluing a layered blob stack to a base backend for sub-namespace lookup.
//!
//! Grounded on the teacher's own `cas-server` binary, which matches a
//! `--backend` flag against the handful of concrete types it actually
//! compiles in rather than routing through a trait-object factory spread
//! across many files.

use std::sync::Arc;

use super::file::FileStore;
use super::memory::MemoryStore;
use super::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};
use crate::config::{StoreKind, StoreSpec};

/// Either of the two backends this core ships, collapsed into one concrete
/// type so the rest of the stack can be built generically regardless of
/// which one a [`StoreSpec`] names.
pub enum BaseStore {
    File(FileStore),
    Memory(MemoryStore),
}

impl BaseStore {
    pub fn open(spec: &StoreSpec) -> StoreResult<Self> {
        match spec.kind {
            StoreKind::File => Ok(BaseStore::File(FileStore::new(&spec.address)?)),
            StoreKind::Memory => Ok(BaseStore::Memory(MemoryStore::new())),
            other => Err(StoreError::Backend(format!(
                "{other:?} is recognized but not implemented by this core"
            ))),
        }
    }
}

impl Store for BaseStore {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        match self {
            BaseStore::File(s) => s.get(key),
            BaseStore::Memory(s) => s.get(key),
        }
    }

    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        match self {
            BaseStore::File(s) => s.put(opts),
            BaseStore::Memory(s) => s.put(opts),
        }
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        match self {
            BaseStore::File(s) => s.delete(key),
            BaseStore::Memory(s) => s.delete(key),
        }
    }

    fn len(&self) -> StoreResult<u64> {
        match self {
            BaseStore::File(s) => s.len(),
            BaseStore::Memory(s) => s.len(),
        }
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        match self {
            BaseStore::File(s) => s.list(start, cancel, f),
            BaseStore::Memory(s) => s.list(start, cancel, f),
        }
    }

    fn close(&self) -> StoreResult<()> {
        match self {
            BaseStore::File(s) => s.close(),
            BaseStore::Memory(s) => s.close(),
        }
    }
}

impl CasStore for BaseStore {
    fn cas_key(&self, data: &[u8]) -> Vec<u8> {
        match self {
            BaseStore::File(s) => s.cas_key(data),
            BaseStore::Memory(s) => s.cas_key(data),
        }
    }

    fn cas_put(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        match self {
            BaseStore::File(s) => s.cas_put(data),
            BaseStore::Memory(s) => s.cas_put(data),
        }
    }
}

impl Namespaced for BaseStore {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        match self {
            BaseStore::File(s) => s.sub(name),
            BaseStore::Memory(s) => s.sub(name),
        }
    }
}

/// Glues a fully layered blob stack (codec, cache, write-behind, CAS
/// overlay, read-only gate — whichever are configured) to the base backend
/// it was built from.
///
/// Sub-namespaces opened through this type (`roots`, `files`) come straight
/// off the base backend rather than through the blob stack's layering:
/// those namespaces hold small structured metadata records, not bulk blob
/// content, so they have no use for compression, encryption, caching, or
/// write-behind buffering.
pub struct ServiceStack {
    blobs: Arc<dyn CasStore>,
    base: Arc<BaseStore>,
}

impl ServiceStack {
    pub fn new(blobs: Arc<dyn CasStore>, base: Arc<BaseStore>) -> Self {
        Self { blobs, base }
    }
}

impl Store for ServiceStack {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.blobs.get(key)
    }

    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        self.blobs.put(opts)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.blobs.delete(key)
    }

    fn len(&self) -> StoreResult<u64> {
        self.blobs.len()
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.blobs.list(start, cancel, f)
    }

    fn close(&self) -> StoreResult<()> {
        self.blobs.close()?;
        self.base.close()
    }
}

impl CasStore for ServiceStack {
    fn cas_key(&self, data: &[u8]) -> Vec<u8> {
        self.blobs.cas_key(data)
    }

    fn cas_put(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        self.blobs.cas_put(data)
    }
}

impl Namespaced for ServiceStack {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        self.base.sub(name)
    }
}
