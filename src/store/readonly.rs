//! Read-only gate: wraps any store and rejects mutations.
//!
//! The teacher's own error enum already carries a `StorageError::ReadOnly`
//! variant (unused by any wrapper), and `nbd::server` checks a read-only
//! flag before honoring NBD writes. This lifts that concept out of the wire
//! protocol and into a proper store wrapper, the way `storage::file` and
//! `storage::cas` each get their own file.

use std::sync::Arc;

use super::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};

/// Wraps a store, making every mutating operation fail with `ReadOnly`
/// while reads pass through unchanged.
pub struct ReadOnlyStore<S> {
    inner: S,
}

impl<S> ReadOnlyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Store> Store for ReadOnlyStore<S> {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&self, _opts: PutOptions) -> StoreResult<()> {
        Err(StoreError::ReadOnly)
    }

    fn delete(&self, _key: &[u8]) -> StoreResult<()> {
        Err(StoreError::ReadOnly)
    }

    fn len(&self) -> StoreResult<u64> {
        self.inner.len()
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.inner.list(start, cancel, f)
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }
}

impl<S: CasStore> CasStore for ReadOnlyStore<S> {
    fn cas_key(&self, data: &[u8]) -> Vec<u8> {
        self.inner.cas_key(data)
    }

    fn cas_put(&self, _data: &[u8]) -> StoreResult<Vec<u8>> {
        Err(StoreError::ReadOnly)
    }
}

// A sub-namespace opened through a read-only gate must itself stay
// read-only, or mutations could sneak in one level down.
impl<S: Namespaced> Namespaced for ReadOnlyStore<S> {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        let inner_sub = self.inner.sub(name)?;
        Ok(Arc::new(ReadOnlyStore::new(inner_sub)) as Arc<dyn Store>)
    }
}

/// Convenience constructor building a trait object over an `Arc<dyn Store>`.
pub fn wrap(inner: Arc<dyn Store>) -> ReadOnlyStore<Arc<dyn Store>> {
    ReadOnlyStore::new(inner)
}

impl Store for Arc<dyn Store> {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.as_ref().get(key)
    }
    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        self.as_ref().put(opts)
    }
    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.as_ref().delete(key)
    }
    fn len(&self) -> StoreResult<u64> {
        self.as_ref().len()
    }
    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.as_ref().list(start, cancel, f)
    }
    fn close(&self) -> StoreResult<()> {
        self.as_ref().close()
    }
}

impl Store for Arc<dyn CasStore> {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.as_ref().get(key)
    }
    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        self.as_ref().put(opts)
    }
    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.as_ref().delete(key)
    }
    fn len(&self) -> StoreResult<u64> {
        self.as_ref().len()
    }
    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.as_ref().list(start, cancel, f)
    }
    fn close(&self) -> StoreResult<()> {
        self.as_ref().close()
    }
}

impl CasStore for Arc<dyn CasStore> {
    fn cas_key(&self, data: &[u8]) -> Vec<u8> {
        self.as_ref().cas_key(data)
    }
    fn cas_put(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        self.as_ref().cas_put(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn mutations_fail_reads_pass() {
        let inner = MemoryStore::new();
        inner
            .put(PutOptions::new(b"k".to_vec(), b"v".to_vec()))
            .unwrap();
        let ro = ReadOnlyStore::new(inner);

        assert_eq!(ro.get(b"k").unwrap(), b"v");
        assert_eq!(
            ro.put(PutOptions::new(b"k2".to_vec(), b"v2".to_vec()))
                .unwrap_err()
                .kind(),
            crate::error::ErrorKind::ReadOnly
        );
        assert_eq!(ro.delete(b"k").unwrap_err().kind(), crate::error::ErrorKind::ReadOnly);
    }
}
