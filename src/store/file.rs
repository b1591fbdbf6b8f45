//! File-based store backend: one file per key, sharded into two-hex-prefix
//! directories.
//!
//! Grounded directly on `CasStorage::hash_to_path` (`base/XX/YYYY...`) from
//! the teacher's standalone CAS service, generalized from a fixed-length
//! hash key to an arbitrary byte key (hex-encoded, which preserves
//! byte-lexicographic order since each byte maps to exactly two ordered hex
//! digits) and from a write-once CAS file to a full KV store with
//! `replace=false` semantics and ordered `list`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};

/// A store backed by one file per key under `base_path`.
pub struct FileStore {
    base_path: PathBuf,
    closed: RwLock<bool>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            closed: RwLock::new(false),
        })
    }

    fn check_open(&self) -> StoreResult<()> {
        if *self.closed.read().unwrap() {
            Err(StoreError::Backend("store is closed".into()))
        } else {
            Ok(())
        }
    }

    fn key_to_path(&self, key: &[u8]) -> PathBuf {
        let hex = hex::encode(key);
        if hex.len() <= 2 {
            self.base_path.join(format!("_{hex}"))
        } else {
            let (prefix, suffix) = hex.split_at(2);
            self.base_path.join(prefix).join(suffix)
        }
    }

    /// Atomically write `data` to `path`: write to a sibling temp file, then
    /// rename over the destination so a reader never observes a torn write.
    fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.check_open()?;
        let path = self.key_to_path(key);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(e)
            }
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        self.check_open()?;
        let path = self.key_to_path(&opts.key);
        if !opts.replace && path.exists() {
            return Err(StoreError::Exists);
        }
        Self::write_atomic(&path, &opts.data)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.check_open()?;
        let path = self.key_to_path(key);
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(e)
            }
        })
    }

    fn len(&self) -> StoreResult<u64> {
        self.check_open()?;
        let mut count = 0u64;
        self.list(&[], &CancelToken::new(), &mut |_| {
            count += 1;
            ListControl::Continue
        })?;
        Ok(count)
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        self.check_open()?;

        let mut keys = Vec::new();
        if self.base_path.is_dir() {
            for shard in sorted_dir_entries(&self.base_path)? {
                cancel.check()?;
                let name = shard.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                if shard.path().is_dir() {
                    for entry in sorted_dir_entries(&shard.path())? {
                        let suffix = entry.file_name().to_string_lossy().into_owned();
                        if suffix.ends_with(".tmp") {
                            continue;
                        }
                        if let Ok(key) = hex::decode(format!("{name}{suffix}")) {
                            keys.push(key);
                        }
                    }
                } else if let Some(stripped) = name.strip_prefix('_') {
                    if let Ok(key) = hex::decode(stripped) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();

        for key in keys {
            if key.as_slice() < start {
                continue;
            }
            cancel.check()?;
            if f(&key) == ListControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        *self.closed.write().unwrap() = true;
        Ok(())
    }
}

fn sorted_dir_entries(dir: &Path) -> StoreResult<Vec<fs::DirEntry>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

impl CasStore for FileStore {
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

impl Namespaced for FileStore {
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        let path = self.base_path.join(".sub").join(name);
        Ok(Arc::new(FileStore::new(path)?) as Arc<dyn Store>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{exercise_list_order, exercise_put_get_delete};
    use tempfile::TempDir;

    #[test]
    fn put_get_delete() {
        let dir = TempDir::new().unwrap();
        exercise_put_get_delete(&FileStore::new(dir.path()).unwrap());
    }

    #[test]
    fn list_order() {
        let dir = TempDir::new().unwrap();
        exercise_list_order(&FileStore::new(dir.path()).unwrap());
    }

    #[test]
    fn short_keys_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store
            .put(PutOptions::new(b"k".to_vec(), b"v".to_vec()))
            .unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn sub_namespaces_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let a = store.sub("a").unwrap();
        let b = store.sub("b").unwrap();
        a.put(PutOptions::new(b"k".to_vec(), b"in-a".to_vec())).unwrap();
        assert!(b.get(b"k").is_err());
    }
}
