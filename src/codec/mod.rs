//! Byte-in/byte-out transformers applied transparently by [`EncodedStore`].
//!
//! Grounded on `CasBackend::store_block`/`retrieve_block`'s marker-byte
//! compressed/uncompressed framing: that code wraps a single fixed
//! transform (lz4) behind a one-byte marker. Here the same "transform, tag,
//! store" idiom is generalized to an ordered stack of codecs instead of one
//! hardcoded compressor.

pub mod aead;
pub mod encoded;
pub mod zstd_codec;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("data corruption: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mis-configured codec order: {0}")]
    BadOrder(String),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Corrupt(_) => ErrorKind::Corrupt,
            CodecError::Io(_) => ErrorKind::Fatal,
            CodecError::BadOrder(_) => ErrorKind::Fatal,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A reversible byte transform applied to stored values. Keys are never
/// transformed, only values.
pub trait Codec: Send + Sync {
    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>>;

    /// Short, stable name used in log messages and `status` metrics.
    fn name(&self) -> &'static str;
}

pub use aead::XChaChaCodec;
pub use encoded::EncodedStore;
pub use zstd_codec::ZstdCodec;
