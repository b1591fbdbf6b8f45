//! Store interface: a uniform key/value namespace with an optional
//! content-addressed overlay and nested sub-namespaces.
//!
//! Layered transformations (encoding, caching, the write-behind buffer, the
//! read-only gate) all implement [`Store`] over an inner `Store`, so a stack
//! is built by composition rather than inheritance: each wrapper owns its
//! inner store by value.

pub mod backend;
pub mod buffer;
pub mod cache;
pub mod file;
pub mod memory;
pub mod readonly;

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorKind;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("key exists")]
    Exists,

    #[error("store is read-only")]
    ReadOnly,

    #[error("data corruption: {0}")]
    Corrupt(String),

    #[error("operation canceled")]
    Canceled,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such sub-namespace: {0}")]
    NoSuchNamespace(String),
}

impl StoreError {
    /// Classify this error for callers that branch on behavior rather than
    /// on a concrete type.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound => ErrorKind::KeyNotFound,
            StoreError::Exists => ErrorKind::KeyExists,
            StoreError::ReadOnly => ErrorKind::ReadOnly,
            StoreError::Corrupt(_) => ErrorKind::Corrupt,
            StoreError::Canceled => ErrorKind::Canceled,
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::Backend(_) => ErrorKind::Fatal,
            StoreError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::KeyNotFound,
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    ErrorKind::Transient
                }
                _ => ErrorKind::Fatal,
            },
            StoreError::NoSuchNamespace(_) => ErrorKind::Fatal,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Arguments to [`Store::put`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    /// If false and the key already exists, `put` fails with `StoreError::Exists`.
    pub replace: bool,
}

impl PutOptions {
    pub fn new(key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            replace: true,
        }
    }

    pub fn no_replace(mut self) -> Self {
        self.replace = false;
        self
    }
}

/// Returned by a [`Store::list`] callback to terminate enumeration early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListControl {
    Continue,
    Stop,
}

/// Cooperative cancellation for suspension points (I/O, drainer waits,
/// lock acquisition behind I/O). Checked explicitly rather than threaded
/// through an async runtime, matching the synchronous style of the rest of
/// the stack.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Return `Err(StoreError::Canceled)` if cancellation has been requested.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_canceled() {
            Err(StoreError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// A plain keyspace: put replaces by key, delete removes by key, list walks
/// keys in byte-lexicographic order.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>>;

    fn put(&self, opts: PutOptions) -> StoreResult<()>;

    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Returns the subset of `keys` that are present.
    fn has(&self, keys: &[Vec<u8>]) -> StoreResult<HashSet<Vec<u8>>> {
        let mut present = HashSet::new();
        for key in keys {
            match self.get(key) {
                Ok(_) => {
                    present.insert(key.clone());
                }
                Err(e) if e.kind() == ErrorKind::KeyNotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(present)
    }

    /// Exact key count for the snapshot at call time; approximations are not
    /// permitted.
    fn len(&self) -> StoreResult<u64>;

    /// Invoke `f` with each key `>= start` in byte-lexicographic order.
    /// Stops cleanly when `f` returns `ListControl::Stop`.
    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()>;

    /// Release resources; subsequent operations must fail.
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// A content-addressed overlay keyspace: the key is a pure function of the
/// value.
pub trait CasStore: Store {
    /// Compute the key for `data` without storing it.
    fn cas_key(&self, data: &[u8]) -> Vec<u8>;

    /// Store `data` under `cas_key(data)`, returning that key. Re-putting
    /// identical content is idempotent and never fails with `KeyExists`.
    fn cas_put(&self, data: &[u8]) -> StoreResult<Vec<u8>>;
}

/// A store that can open isolated nested namespaces.
pub trait Namespaced: Store {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Universal properties every `Store` implementation must satisfy
    /// (spec.md section 8). Call from each backend's own test module.
    pub fn exercise_put_get_delete(store: &dyn Store) {
        let cancel = CancelToken::new();

        store
            .put(PutOptions::new(b"k1".to_vec(), b"v1".to_vec()))
            .unwrap();
        assert_eq!(store.get(b"k1").unwrap(), b"v1");

        store
            .put(PutOptions::new(b"k1".to_vec(), b"v2".to_vec()))
            .unwrap();
        assert_eq!(store.get(b"k1").unwrap(), b"v2");

        let err = store
            .put(PutOptions::new(b"k1".to_vec(), b"v3".to_vec()).no_replace())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyExists);
        assert_eq!(store.get(b"k1").unwrap(), b"v2");

        store.delete(b"k1").unwrap();
        let err = store.get(b"k1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);

        let err = store.delete(b"k1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);

        let _ = cancel;
    }

    pub fn exercise_list_order(store: &dyn Store) {
        let cancel = CancelToken::new();
        for k in [b"a".as_slice(), b"aa", b"ab", b"b", b"ba"] {
            store
                .put(PutOptions::new(k.to_vec(), b"x".to_vec()))
                .unwrap();
        }

        let mut seen = Vec::new();
        store
            .list(b"a", &cancel, &mut |k| {
                seen.push(k.to_vec());
                ListControl::Continue
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                b"a".to_vec(),
                b"aa".to_vec(),
                b"ab".to_vec(),
                b"b".to_vec(),
                b"ba".to_vec(),
            ]
        );
    }
}
