//! Textual path specs: `<root-name>[/subpath]` or `@<file-key>[/subpath]`.
//!
//! No direct teacher precedent (AoE/iSCSI addresses are shelf/slot pairs,
//! not path specs); grounded on `config::BackendType`'s small hand-rolled
//! parser-by-prefix style and on `blob::Hash::from_hex`/`to_hex` for the
//! literal/hex key encodings.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use thiserror::Error;

use crate::store::Store;
use crate::tree::{FileNode, Record, TreeError};

#[derive(Error, Debug)]
pub enum PathError {
    #[error("empty path spec")]
    Empty,

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record at root name is not a Root record")]
    NotARoot,

    #[error("record at key is not a Node record")]
    NotANode,

    #[error("no child named {0:?}")]
    NoSuchChild(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    Root { name: String, subpath: Vec<String> },
    Key { key: Vec<u8>, subpath: Vec<String> },
}

/// Split `rest` (the input after a recognized key terminator) into the key
/// string and the subpath component list.
fn split_subpath(rest: &str) -> Vec<String> {
    if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('/').map(|s| s.to_string()).collect()
    }
}

fn decode_key(key_str: &str) -> Result<Vec<u8>, PathError> {
    let is_hex = !key_str.is_empty() && key_str.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex {
        return hex::decode(key_str).map_err(|e| PathError::InvalidKeyEncoding(e.to_string()));
    }
    if key_str.ends_with('=') {
        return STANDARD
            .decode(key_str)
            .map_err(|e| PathError::InvalidKeyEncoding(e.to_string()));
    }
    STANDARD_NO_PAD
        .decode(key_str)
        .map_err(|e| PathError::InvalidKeyEncoding(e.to_string()))
}

/// Parse a path spec string into its resolved form (form selection and key
/// decoding only; does not touch any store).
pub fn parse(path: &str) -> Result<PathSpec, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    if let Some(rest) = path.strip_prefix('@') {
        // A trailing "=/" disambiguates a base64 key that itself contains
        // '/': the key runs up to and including the '=', not to the first
        // plain '/', which would otherwise wrongly split the key in two.
        let (key_str, subpath_str) = match rest.find("=/") {
            Some(idx) => (&rest[..=idx], &rest[idx + 2..]),
            None => match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            },
        };
        let key = decode_key(key_str)?;
        Ok(PathSpec::Key {
            key,
            subpath: split_subpath(subpath_str),
        })
    } else {
        let (name, subpath_str) = match path.find('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => (path, ""),
        };
        Ok(PathSpec::Root {
            name: name.to_string(),
            subpath: split_subpath(subpath_str),
        })
    }
}

fn load_node(blobs: &dyn Store, key: &[u8]) -> Result<FileNode, PathError> {
    let bytes = blobs.get(key)?;
    match Record::from_bytes(&bytes)? {
        Record::Node(node) => Ok(node),
        _ => Err(PathError::NotANode),
    }
}

/// Resolve a path spec against `roots` (named root pointers) and `blobs`
/// (content-addressed file nodes), walking the subpath through child names.
/// Returns the final node's key and its node.
pub fn resolve(path: &str, roots: &dyn Store, blobs: &dyn Store) -> Result<(Vec<u8>, FileNode), PathError> {
    let spec = parse(path)?;

    let (mut key, subpath) = match spec {
        PathSpec::Root { name, subpath } => {
            let bytes = roots.get(name.as_bytes())?;
            let root = match Record::from_bytes(&bytes)? {
                Record::Root(root) => root,
                _ => return Err(PathError::NotARoot),
            };
            (root.file_key, subpath)
        }
        PathSpec::Key { key, subpath } => (key, subpath),
    };

    let mut node = load_node(blobs, &key)?;
    for component in subpath {
        if component.is_empty() {
            continue;
        }
        key = node
            .children
            .get(&component)
            .cloned()
            .ok_or(PathError::NoSuchChild(component))?;
        node = load_node(blobs, &key)?;
    }

    Ok((key, node))
}

impl From<TreeError> for PathError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::Store(e) => PathError::Store(e),
            TreeError::Malformed(e) => PathError::Malformed(e),
            TreeError::WrongRecordType { .. } => PathError::NotANode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_form_splits_name_and_subpath() {
        let spec = parse("myroot/dir/file.txt").unwrap();
        assert_eq!(
            spec,
            PathSpec::Root {
                name: "myroot".into(),
                subpath: vec!["dir".into(), "file.txt".into()],
            }
        );
    }

    #[test]
    fn root_form_with_no_subpath() {
        let spec = parse("myroot").unwrap();
        assert_eq!(
            spec,
            PathSpec::Root { name: "myroot".into(), subpath: vec![] }
        );
    }

    #[test]
    fn key_form_hex() {
        let spec = parse("@deadbeef/child").unwrap();
        assert_eq!(
            spec,
            PathSpec::Key {
                key: vec![0xde, 0xad, 0xbe, 0xef],
                subpath: vec!["child".into()],
            }
        );
    }

    #[test]
    fn key_form_standard_base64_with_padding() {
        let key_bytes = b"hello!!";
        let encoded = STANDARD.encode(key_bytes);
        assert!(encoded.ends_with('='));
        let path = format!("@{encoded}");
        let spec = parse(&path).unwrap();
        assert_eq!(spec, PathSpec::Key { key: key_bytes.to_vec(), subpath: vec![] });
    }

    #[test]
    fn key_form_padded_base64_containing_slash_uses_equals_slash_terminator() {
        // 0xFFFF standard-encodes to "//8=": an embedded '/' plus the
        // padding '=' that makes the "=/" terminator unambiguous (a bare
        // '=' never appears inside a base64 body, only at its end).
        let key_bytes: Vec<u8> = vec![0xFF, 0xFF];
        let encoded = STANDARD.encode(&key_bytes);
        assert!(encoded.contains('/') && encoded.ends_with('='));
        let path = format!("@{encoded}/child");
        let spec = parse(&path).unwrap();
        assert_eq!(
            spec,
            PathSpec::Key { key: key_bytes, subpath: vec!["child".into()] }
        );
    }
}
