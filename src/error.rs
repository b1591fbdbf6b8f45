//! Cross-cutting error classification.
//!
//! Every subsystem defines its own `thiserror` enum, but callers that need to
//! branch on behavior (retry, surface to a client, abort a sweep) match on
//! `ErrorKind` instead of downcasting concrete types.

/// The handful of ways an operation in this crate can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Read or delete of an absent key.
    KeyNotFound,
    /// Non-replacing put of an existing key.
    KeyExists,
    /// Mutation attempted through a read-only wrapper.
    ReadOnly,
    /// Decode failure: AEAD tag mismatch, truncated frame, bad codec input.
    Corrupt,
    /// Operation cancelled by the caller or by shutdown.
    Canceled,
    /// Backend timeout, transport reset, or temporary unavailability.
    Transient,
    /// Out of space, permission denied, or malformed configuration.
    Fatal,
}

impl ErrorKind {
    /// Whether the drainer/sweep should retry an operation that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}
