//! Service configuration: TOML-parsed `ServiceConfig`, the `type:address`
//! store-spec grammar, and address-syntax parsing (host:port / Unix path /
//! `@name` indirection), the way `config.rs`'s `Config`/`ServerConfig`/
//! `TargetConfig` triple parses and validates the teacher's own TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PASSPHRASE_ENV_VAR: &str = "BLOBKEEP_PASSPHRASE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("malformed store spec: {0}")]
    Malformed(String),

    #[error("unrecognized store type {0:?} (known but unimplemented in this core)")]
    UnknownStoreType(String),

    #[error("encrypt-then-compress requires allow_nonstandard_codec_order = true")]
    NonstandardCodecOrderNotAllowed,

    #[error("{PASSPHRASE_ENV_VAR} is not set")]
    MissingPassphrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Memory,
    S3,
    Sqlite,
    Pebble,
    Leveldb,
}

impl StoreKind {
    /// Backends the core actually ships; the rest are recognized so config
    /// errors are clear, but are out-of-scope collaborators (spec.md
    /// section 1).
    pub fn is_implemented(self) -> bool {
        matches!(self, StoreKind::File | StoreKind::Memory)
    }
}

#[derive(Debug, Clone)]
pub struct StoreSpec {
    pub kind: StoreKind,
    pub address: String,
}

impl StoreSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (kind_str, address) = spec
            .split_once(':')
            .ok_or_else(|| ConfigError::Malformed(format!("store spec {spec:?} is missing a ':'")))?;

        let kind = match kind_str {
            "file" => StoreKind::File,
            "memory" => StoreKind::Memory,
            "s3" => StoreKind::S3,
            "sqlite" => StoreKind::Sqlite,
            "pebble" => StoreKind::Pebble,
            "leveldb" => StoreKind::Leveldb,
            other => return Err(ConfigError::UnknownStoreType(other.to_string())),
        };

        if !kind.is_implemented() {
            return Err(ConfigError::UnknownStoreType(kind_str.to_string()));
        }

        Ok(Self { kind, address: address.to_string() })
    }

    /// `file:` additionally treats a `.zip` address as a read-only archive
    /// store; recognized here for config validation, not yet implemented by
    /// `store::file` (spec.md section 6, out-of-scope collaborator).
    pub fn is_zip_archive(&self) -> bool {
        self.kind == StoreKind::File && self.address.ends_with(".zip")
    }
}

/// A resolved RPC address: TCP host:port, a Unix-domain socket path, or a
/// named indirection into the rest of the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(String),
    Unix(String),
    Named(String),
}

pub fn parse_address(s: &str) -> Address {
    if let Some(name) = s.strip_prefix('@') {
        Address::Named(name.to_string())
    } else if s.starts_with('/') {
        Address::Unix(s.to_string())
    } else {
        Address::Tcp(s.to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Store-spec for the durable local buffer tier.
    pub store: String,
}

fn default_method_prefix() -> String {
    String::new()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub bind: String,
    pub store: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
    /// Per spec.md section 9's open question: the core only endorses
    /// compress-then-encrypt. Setting this true without the override below
    /// is a validation error, not a silent acceptance.
    #[serde(default)]
    pub encrypt_then_compress: bool,
    #[serde(default)]
    pub allow_nonstandard_codec_order: bool,
    #[serde(default)]
    pub cache_bytes: Option<u64>,
    #[serde(default)]
    pub buffer: Option<BufferConfig>,
    #[serde(default = "default_method_prefix")]
    pub method_prefix: String,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        StoreSpec::parse(&self.store)?;
        if let Some(buffer) = &self.buffer {
            StoreSpec::parse(&buffer.store)?;
        }

        if self.encrypt_then_compress {
            if !self.allow_nonstandard_codec_order {
                return Err(ConfigError::NonstandardCodecOrderNotAllowed);
            }
            log::warn!(
                "configuration requests encrypt-then-compress with allow_nonstandard_codec_order set; \
                 this defeats compression and may leak plaintext length"
            );
        }

        Ok(())
    }
}

/// Derive a 32-byte AEAD key from the passphrase in `$BLOBKEEP_PASSPHRASE`.
/// No terminal prompt: spec.md section 6 scopes interactive passphrase
/// entry to an external collaborator, not the core.
pub fn encryption_key_from_env() -> Result<[u8; 32], ConfigError> {
    let passphrase = std::env::var(PASSPHRASE_ENV_VAR).map_err(|_| ConfigError::MissingPassphrase)?;
    Ok(*blake3::hash(passphrase.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = ServiceConfig::parse(
            r#"
            bind = "127.0.0.1:9000"
            store = "memory:default"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert!(!cfg.read_only);
    }

    #[test]
    fn rejects_unknown_store_type() {
        let err = StoreSpec::parse("btrfs:/data").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStoreType(_)));
    }

    #[test]
    fn rejects_nonstandard_codec_order_without_override() {
        let err = ServiceConfig::parse(
            r#"
            bind = "127.0.0.1:9000"
            store = "memory:default"
            encrypt_then_compress = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NonstandardCodecOrderNotAllowed));
    }

    #[test]
    fn allows_nonstandard_codec_order_with_explicit_override() {
        let cfg = ServiceConfig::parse(
            r#"
            bind = "127.0.0.1:9000"
            store = "memory:default"
            encrypt_then_compress = true
            allow_nonstandard_codec_order = true
            "#,
        )
        .unwrap();
        assert!(cfg.encrypt_then_compress);
    }

    #[test]
    fn address_forms_are_distinguished() {
        assert_eq!(parse_address("127.0.0.1:9000"), Address::Tcp("127.0.0.1:9000".into()));
        assert_eq!(parse_address("/var/run/blobkeep.sock"), Address::Unix("/var/run/blobkeep.sock".into()));
        assert_eq!(parse_address("@primary"), Address::Named("primary".into()));
    }
}
