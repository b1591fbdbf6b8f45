//! AEAD encryption codec: XChaCha20-Poly1305 with a fresh random nonce per
//! encode, prepended to the ciphertext.
//!
//! `chacha20poly1305` is reused from the CAD-engine example in the pack,
//! which already depends on it for its own at-rest encryption. No
//! associated data is used, matching spec.md's glossary entry for AEAD here.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::{Codec, CodecError, CodecResult};

const NONCE_LEN: usize = 24;

pub struct XChaChaCodec {
    cipher: XChaCha20Poly1305,
}

impl XChaChaCodec {
    /// `key` must be exactly 32 bytes.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }
}

impl Codec for XChaChaCodec {
    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data)
            .map_err(|e| CodecError::Corrupt(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(CodecError::Corrupt("frame shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CodecError::Corrupt("AEAD tag mismatch".into()))
    }

    fn name(&self) -> &'static str {
        "xchacha20poly1305"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let codec = XChaChaCodec::new(&[0u8; 32]);
        let plaintext = b"hello\n";
        let encoded = codec.encode(plaintext).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), plaintext);
    }

    #[test]
    fn distinct_nonce_per_encode() {
        let codec = XChaChaCodec::new(&[0u8; 32]);
        let a = codec.encode(b"same input").unwrap();
        let b = codec.encode(b"same input").unwrap();
        assert_ne!(a, b, "fresh nonce should vary the ciphertext");
    }

    #[test]
    fn tampering_is_detected() {
        let codec = XChaChaCodec::new(&[0u8; 32]);
        let mut encoded = codec.encode(b"hello\n").unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(codec.decode(&encoded).is_err());
    }

    #[test]
    fn truncated_frame_is_corrupt() {
        let codec = XChaChaCodec::new(&[0u8; 32]);
        assert!(codec.decode(&[0u8; 4]).is_err());
    }
}
