//! Root pointers and the file tree they point into.
//!
//! No teacher file does tree-of-files scanning directly (AoE/iSCSI serve flat
//! block devices), so this is grounded on `storage::cas::tree::MerkleTree`'s
//! content-addressed node shape — children referenced by hash, fetched
//! through the blob store — generalized from a fixed binary fanout to named
//! children, and on `config::BlobStoreConfig`'s internally-tagged enum
//! (`#[serde(tag = "type", rename_all = "lowercase")]`) for the shared
//! `Root | Node | Index` envelope from spec.md section 9's design note.
//!
//! `config::BlobStoreConfig` gets away with internal tagging because it's
//! parsed from TOML, a self-describing format. `bincode` isn't: its derived
//! deserializer can't implement `deserialize_any`, which internally tagged
//! enums require. `Record` is persisted through `serde_json` instead, which
//! is self-describing and supports the tag.

pub mod scan;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::index::BloomIndex;

/// A content key: the key a blob is stored under in a `Store`.
pub type Key = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub size: u64,
    pub mode: u32,
    pub mtime_unix: i64,
}

/// One node of the file tree: either a leaf with data chunks, an interior
/// node with named children, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub stat: Stat,
    pub xattrs: BTreeMap<String, Vec<u8>>,
    pub data: Option<Vec<Key>>,
    pub children: BTreeMap<String, Key>,
}

impl FileNode {
    pub fn reachable_children(&self) -> impl Iterator<Item = &Key> {
        self.children.values()
    }
}

/// A named pointer to a file key, with an optional cached reachability
/// index key so GC's mark phase can skip rescanning when still valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootPointer {
    pub file_key: Key,
    pub cached_index_key: Option<Key>,
}

/// The shared tagged envelope for everything persisted under the `roots`
/// and `files` namespaces: `Root | Node | Index`, matching spec.md's design
/// note that implementers must not rely on field ordering beyond the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum Record {
    Root(RootPointer),
    Node(FileNode),
    Index(BloomIndex),
}

#[derive(thiserror::Error, Debug)]
pub enum TreeError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("record at key is not a {expected}")]
    WrongRecordType { expected: &'static str },

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Record {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
