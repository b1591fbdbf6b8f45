//! Reachability scan over a file tree.
//!
//! A worklist with a visited set, directly mirroring `MerkleTree::lookup`'s
//! node-fetch-by-hash loop but fanning out over a `BTreeMap` of named
//! children instead of a fixed left/right pair. Cycles are structurally
//! impossible (a node's key is a function of its serialized children's
//! keys), but re-descent into an already-visited key is still explicitly
//! refused, since two different parents can share a child.

use std::collections::{HashSet, VecDeque};

use super::{Key, Record, TreeError};
use crate::store::{CancelToken, Store};

/// Keys reachable from one root, split by the record type they name —
/// spec.md section 8's `File`/`Data` categorization of scan output (`Root`
/// is the caller-supplied starting point, `Index` is built separately by
/// the caller from this result).
#[derive(Debug, Default, Clone)]
pub struct ScanResult {
    /// Keys of `Node` records (interior and leaf file nodes alike).
    pub file_keys: HashSet<Key>,
    /// Keys of raw data-chunk blobs referenced by leaf nodes.
    pub data_keys: HashSet<Key>,
}

impl ScanResult {
    /// All reachable keys, for feeding a [`crate::index::BloomIndex`].
    pub fn all_keys(&self) -> impl Iterator<Item = &Key> {
        self.file_keys.iter().chain(self.data_keys.iter())
    }

    pub fn len(&self) -> usize {
        self.file_keys.len() + self.data_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Visit every node reachable from `root_file_key` in the `files` store,
/// without re-descending into a key already seen. `files` is expected to
/// contain tagged [`Record::Node`] blobs; anything else at a reached key is
/// a structural error (a root pointing at a non-node, or a child key that
/// resolves to raw data instead of a node).
pub fn reachable_keys(
    files: &dyn Store,
    root_file_key: &Key,
    cancel: &CancelToken,
) -> Result<ScanResult, TreeError> {
    let mut visited = HashSet::new();
    let mut data_keys = HashSet::new();
    let mut worklist = VecDeque::new();
    worklist.push_back(root_file_key.clone());

    while let Some(key) = worklist.pop_front() {
        cancel.check()?;
        if !visited.insert(key.clone()) {
            continue;
        }

        let bytes = files.get(&key)?;
        let node = match Record::from_bytes(&bytes)? {
            Record::Node(node) => node,
            _ => return Err(TreeError::WrongRecordType { expected: "Node" }),
        };

        if let Some(chunks) = &node.data {
            for chunk in chunks {
                data_keys.insert(chunk.clone());
            }
        }

        for child in node.reachable_children() {
            if !visited.contains(child) {
                worklist.push_back(child.clone());
            }
        }
    }

    Ok(ScanResult {
        file_keys: visited,
        data_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::PutOptions;
    use crate::tree::{FileNode, Stat};
    use std::collections::BTreeMap;

    fn put_node(store: &MemoryStore, key: &[u8], node: FileNode) {
        let bytes = Record::Node(node).to_bytes().unwrap();
        store.put(PutOptions::new(key.to_vec(), bytes)).unwrap();
    }

    fn leaf(name: &str, data: Vec<Key>) -> FileNode {
        FileNode {
            name: name.to_string(),
            stat: Stat {
                size: 0,
                mode: 0o644,
                mtime_unix: 0,
            },
            xattrs: BTreeMap::new(),
            data: Some(data),
            children: BTreeMap::new(),
        }
    }

    #[test]
    fn visits_every_reachable_node_exactly_once_through_a_shared_subdag() {
        let files = MemoryStore::new();

        put_node(&files, b"leaf", leaf("leaf.txt", vec![b"chunk1".to_vec()]));

        let mut mid_children = BTreeMap::new();
        mid_children.insert("leaf".to_string(), b"leaf".to_vec());
        put_node(
            &files,
            b"mid",
            FileNode {
                name: "mid".into(),
                stat: Stat { size: 0, mode: 0o755, mtime_unix: 0 },
                xattrs: BTreeMap::new(),
                data: None,
                children: mid_children,
            },
        );

        // Two parents both reference "mid" -- a shared sub-DAG.
        let mut root_children = BTreeMap::new();
        root_children.insert("a".to_string(), b"mid".to_vec());
        root_children.insert("b".to_string(), b"mid".to_vec());
        put_node(
            &files,
            b"root-node",
            FileNode {
                name: "root".into(),
                stat: Stat { size: 0, mode: 0o755, mtime_unix: 0 },
                xattrs: BTreeMap::new(),
                data: None,
                children: root_children,
            },
        );

        let cancel = CancelToken::new();
        let result = reachable_keys(&files, &b"root-node".to_vec(), &cancel).unwrap();

        assert_eq!(result.file_keys.len(), 3);
        assert!(result.file_keys.contains(&b"root-node".to_vec()));
        assert!(result.file_keys.contains(&b"mid".to_vec()));
        assert!(result.file_keys.contains(&b"leaf".to_vec()));
        assert_eq!(result.data_keys.len(), 1);
        assert!(result.data_keys.contains(&b"chunk1".to_vec()));
    }

    #[test]
    fn cancellation_stops_the_scan() {
        let files = MemoryStore::new();
        put_node(&files, b"leaf", leaf("leaf.txt", vec![]));

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = reachable_keys(&files, &b"leaf".to_vec(), &cancel).unwrap_err();
        assert!(matches!(err, TreeError::Store(crate::store::StoreError::Canceled)));
    }
}
