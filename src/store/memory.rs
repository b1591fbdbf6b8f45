//! In-memory store backend.
//!
//! Used for the `memory:` store spec and for tests. No teacher file matches
//! this directly (the teacher's backends are always disk- or network-backed);
//! it follows the same per-instance locking idiom as `CasBackend`'s
//! `Mutex<CasBackendState>`, just over a `BTreeMap` so `list` can walk keys
//! in order without a separate sort.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

/// An in-memory, thread-safe key/value store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    subs: RwLock<BTreeMap<String, Arc<MemoryStore>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            subs: RwLock::new(BTreeMap::new()),
        }
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.inner.read().unwrap().closed {
            Err(StoreError::Backend("store is closed".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.check_open()?;
        self.inner
            .read()
            .unwrap()
            .data
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        self.check_open()?;
        let mut inner = self.inner.write().unwrap();
        if !opts.replace && inner.data.contains_key(&opts.key) {
            return Err(StoreError::Exists);
        }
        inner.data.insert(opts.key, opts.data);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.check_open()?;
        let mut inner = self.inner.write().unwrap();
        if inner.data.remove(key).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        self.check_open()?;
        Ok(self.inner.read().unwrap().data.len() as u64)
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.check_open()?;
        // Snapshot the keys so the callback can't deadlock re-entering the store.
        let keys: Vec<Vec<u8>> = self
            .inner
            .read()
            .unwrap()
            .data
            .range(start.to_vec()..)
            .map(|(k, _)| k.clone())
            .collect();

        for key in keys {
            cancel.check()?;
            if f(&key) == ListControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.write().unwrap().closed = true;
        Ok(())
    }
}

impl CasStore for MemoryStore {
    fn cas_key(&self, data: &[u8]) -> Vec<u8> {
        crate::cas::sha3_256(data)
    }

    fn cas_put(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        let key = self.cas_key(data);
        match self.put(PutOptions::new(key.clone(), data.to_vec()).no_replace()) {
            Ok(()) | Err(StoreError::Exists) => Ok(key),
            Err(e) => Err(e),
        }
    }
}

impl Namespaced for MemoryStore {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        let mut subs = self.subs.write().unwrap();
        let sub = subs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(sub as Arc<dyn Store>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_list_order, exercise_put_get_delete};

    #[test]
    fn put_get_delete() {
        exercise_put_get_delete(&MemoryStore::new());
    }

    #[test]
    fn list_order() {
        exercise_list_order(&MemoryStore::new());
    }

    #[test]
    fn cas_put_is_idempotent() {
        let store = MemoryStore::new();
        let k1 = store.cas_put(b"hello\n").unwrap();
        let k2 = store.cas_put(b"hello\n").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(store.get(&k1).unwrap(), b"hello\n");
    }

    #[test]
    fn sub_namespaces_are_isolated() {
        let store = MemoryStore::new();
        let a = store.sub("a").unwrap();
        let b = store.sub("b").unwrap();
        a.put(PutOptions::new(b"k".to_vec(), b"in-a".to_vec())).unwrap();
        assert!(b.get(b"k").is_err());
    }
}
