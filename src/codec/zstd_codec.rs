//! Zstd compression codec: default settings, a pure transform.

use super::{Codec, CodecError, CodecResult};

pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new() -> Self {
        Self { level: 0 } // 0 = zstd's own default level
    }

    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(CodecError::Io)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| CodecError::Corrupt(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_including_empty() {
        let codec = ZstdCodec::new();
        for input in [&b""[..], b"hello", &[0u8; 4096][..]] {
            let encoded = codec.encode(input).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn actually_compresses_redundant_data() {
        let codec = ZstdCodec::new();
        let input = vec![0xAAu8; 64 * 1024];
        let encoded = codec.encode(&input).unwrap();
        assert!(encoded.len() < input.len());
    }
}
