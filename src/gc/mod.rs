//! Garbage collector: mark reachable keys from every root, then sweep the
//! content-addressed blob store for anything no mark-phase index reports.
//!
//! Grounded on `cas::storage::CasStorage::hash_to_path`'s existing
//! two-hex-prefix sharding (`base/XX/...`), which already partitions the
//! keyspace by leading byte; the sweep phase reuses that same partition as
//! its natural unit of parallel work instead of inventing a new one. Worker
//! pull-based scheduling over a shared `Mutex<VecDeque<u8>>` mirrors the
//! write-behind drainer's queue (`store::buffer`), and the sweep time limit
//! uses the same timer-thread-flips-a-`CancelToken` idiom as the RPC
//! service's shutdown path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::index::BloomIndex;
use crate::store::{CancelToken, ListControl, Store};
use crate::tree::{scan, Record, RootPointer, TreeError};

#[derive(thiserror::Error, Debug)]
pub enum GcError {
    #[error("refusing to run: zero root pointers (pass force=true to override)")]
    NoRoots,

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
}

#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Number of parallel sweep workers; clamped to at most 256 (one per shard).
    pub sweep_workers: usize,
    /// Wall-clock budget for the sweep phase. `None` means unbounded.
    pub sweep_time_limit: Option<Duration>,
    /// Override the zero-root safety check.
    pub force: bool,
    /// Target false-positive rate for freshly-built mark indices.
    pub target_fpr: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_workers: 64,
            sweep_time_limit: None,
            force: false,
            target_fpr: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub deleted: u64,
    pub transient_failures: u64,
    pub sweep_limit_reached: bool,
}

/// Run a full mark-and-sweep pass. `roots` holds named [`Record::Root`]
/// pointers; `blobs` is the content-addressed store holding both
/// [`Record::Node`] and raw data blobs, and is what gets swept.
pub fn run(roots: &dyn Store, blobs: &dyn Store, cfg: &GcConfig) -> Result<GcReport, GcError> {
    let indices = mark(roots, blobs, cfg)?;
    if indices.is_empty() && !cfg.force {
        return Err(GcError::NoRoots);
    }
    Ok(sweep(blobs, &indices, cfg))
}

fn mark(roots: &dyn Store, blobs: &dyn Store, cfg: &GcConfig) -> Result<Vec<BloomIndex>, GcError> {
    let cancel = CancelToken::new();
    let mut root_names = Vec::new();
    roots.list(&[], &cancel, &mut |k| {
        root_names.push(k.to_vec());
        ListControl::Continue
    })?;

    let mut indices = Vec::with_capacity(root_names.len());
    for name in root_names {
        let bytes = roots.get(&name)?;
        let root = match Record::from_bytes(&bytes)? {
            Record::Root(root) => root,
            _ => return Err(TreeError::WrongRecordType { expected: "Root" }.into()),
        };
        indices.push(mark_one_root(blobs, &root, &cancel, cfg)?);
    }
    Ok(indices)
}

fn mark_one_root(
    blobs: &dyn Store,
    root: &RootPointer,
    cancel: &CancelToken,
    cfg: &GcConfig,
) -> Result<BloomIndex, GcError> {
    if let Some(index_key) = &root.cached_index_key {
        if let Ok(bytes) = blobs.get(index_key) {
            if let Ok(Record::Index(index)) = Record::from_bytes(&bytes) {
                return Ok(index);
            }
        }
    }

    let scanned = scan::reachable_keys(blobs, &root.file_key, cancel)?;
    let expected = blobs.len()?.max(1);
    let mut index = BloomIndex::with_capacity(expected, cfg.target_fpr);
    for key in scanned.all_keys() {
        index.add(key);
    }
    index.add(&root.file_key);
    Ok(index)
}

fn sweep(blobs: &dyn Store, indices: &[BloomIndex], cfg: &GcConfig) -> GcReport {
    let cancel = CancelToken::new();
    let deleted = AtomicU64::new(0);
    let transient_failures = AtomicU64::new(0);

    if let Some(limit) = cfg.sweep_time_limit {
        let timer_cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(limit);
            timer_cancel.cancel();
        });
    }

    let shards: Mutex<VecDeque<u8>> = Mutex::new((0u8..=255).collect());
    let worker_count = cfg.sweep_workers.clamp(1, 256);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| {
                loop {
                    let shard = {
                        let mut shards = shards.lock().unwrap();
                        match shards.pop_front() {
                            Some(s) => s,
                            None => return,
                        }
                    };
                    if cancel.is_canceled() {
                        return;
                    }
                    sweep_shard(blobs, shard, indices, &cancel, &deleted, &transient_failures);
                }
            });
        }
    });

    GcReport {
        deleted: deleted.load(Ordering::SeqCst),
        transient_failures: transient_failures.load(Ordering::SeqCst),
        sweep_limit_reached: cancel.is_canceled(),
    }
}

fn sweep_shard(
    blobs: &dyn Store,
    shard: u8,
    indices: &[BloomIndex],
    cancel: &CancelToken,
    deleted: &AtomicU64,
    transient_failures: &AtomicU64,
) {
    let mut victims = Vec::new();
    let _ = blobs.list(&[shard], cancel, &mut |key| {
        if cancel.is_canceled() {
            return ListControl::Stop;
        }
        if key.first() != Some(&shard) {
            return ListControl::Stop;
        }
        if !indices.iter().any(|idx| idx.has(key)) {
            victims.push(key.to_vec());
        }
        ListControl::Continue
    });

    for key in victims {
        if cancel.is_canceled() {
            break;
        }
        match blobs.delete(&key) {
            Ok(()) => {
                deleted.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) if e.kind() == crate::error::ErrorKind::KeyNotFound => {}
            Err(e) if e.kind().is_retryable() => {
                log::warn!("gc sweep: transient delete failure for a key: {e}");
                transient_failures.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("gc sweep: delete failed, key retained: {e}");
                transient_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::PutOptions;
    use crate::tree::{FileNode, Stat};
    use std::collections::BTreeMap;

    fn put_record(store: &MemoryStore, key: &[u8], record: Record) {
        store
            .put(PutOptions::new(key.to_vec(), record.to_bytes().unwrap()))
            .unwrap();
    }

    #[test]
    fn deletes_orphans_and_keeps_reachable_and_root_entries() {
        let roots = MemoryStore::new();
        let blobs = MemoryStore::new();

        let chunk_keys = vec![vec![0x10, 1], vec![0x10, 2], vec![0x10, 3]];
        for (i, k) in chunk_keys.iter().enumerate() {
            blobs.put(PutOptions::new(k.clone(), format!("chunk{i}").into_bytes())).unwrap();
        }

        let file_node = FileNode {
            name: "f".into(),
            stat: Stat { size: 3, mode: 0o644, mtime_unix: 0 },
            xattrs: BTreeMap::new(),
            data: Some(chunk_keys.clone()),
            children: BTreeMap::new(),
        };
        let file_key = vec![0x20, 1];
        put_record(&blobs, &file_key, Record::Node(file_node));

        // Orphan blob with a leading byte distinct from the reachable set.
        let orphan_key = vec![0x99, 1];
        blobs.put(PutOptions::new(orphan_key.clone(), b"orphan".to_vec())).unwrap();

        put_record(
            &roots,
            b"R",
            Record::Root(RootPointer {
                file_key: file_key.clone(),
                cached_index_key: None,
            }),
        );

        let report = run(&roots, &blobs, &GcConfig::default()).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(blobs.get(&orphan_key).is_err());
        assert!(blobs.get(&file_key).is_ok());
        for k in &chunk_keys {
            assert!(blobs.get(k).is_ok());
        }
    }

    #[test]
    fn refuses_to_run_with_zero_roots_unless_forced() {
        let roots = MemoryStore::new();
        let blobs = MemoryStore::new();
        blobs.put(PutOptions::new(vec![1], b"x".to_vec())).unwrap();

        let err = run(&roots, &blobs, &GcConfig::default()).unwrap_err();
        assert!(matches!(err, GcError::NoRoots));

        let forced = GcConfig {
            force: true,
            ..GcConfig::default()
        };
        let report = run(&roots, &blobs, &forced).unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn sweep_time_limit_reports_partial_progress_without_panicking() {
        let roots = MemoryStore::new();
        let blobs = MemoryStore::new();
        for i in 0..2000u32 {
            blobs
                .put(PutOptions::new(i.to_be_bytes().to_vec(), b"x".to_vec()))
                .unwrap();
        }

        let cfg = GcConfig {
            force: true,
            sweep_time_limit: Some(Duration::from_millis(1)),
            ..GcConfig::default()
        };
        let report = run(&roots, &blobs, &cfg).unwrap();
        assert!(report.deleted as usize <= 2000);
    }
}
