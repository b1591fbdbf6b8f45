//! `blobkeep-server`: wires a store stack from configuration and serves it
//! over the RPC protocol until killed.
//!
//! Follows the teacher's own `cas-server` binary: parse flags, build the
//! backend, bind a listener, block. A `--config` file (parsed the way
//! `config.rs`'s `Config::load` reads the teacher's own TOML) takes
//! precedence over the discrete flags below it, which exist so the service
//! can be started without a file for quick, local use.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use blobkeep::cas::{CasOverlay, HashAlgorithm};
use blobkeep::codec::{Codec, EncodedStore, XChaChaCodec, ZstdCodec};
use blobkeep::config::{encryption_key_from_env, BufferConfig, ServiceConfig, StoreSpec};
use blobkeep::rpc::{NamespacedCasStore, RpcServer, RpcServerConfig, StackDescription};
use blobkeep::store::backend::{BaseStore, ServiceStack};
use blobkeep::store::buffer::WriteBehindStore;
use blobkeep::store::cache::CachedStore;
use blobkeep::store::readonly::ReadOnlyStore;
use blobkeep::{CasStore, Store};

/// Average value size assumed when translating a `--cache-bytes` budget
/// into a per-shard LRU entry cap. No teacher precedent for a better
/// estimate; tuned by operators through `--cache-bytes` itself, not this
/// constant.
const ASSUMED_AVG_VALUE_BYTES: usize = 4096;

#[derive(Parser, Debug)]
#[command(name = "blobkeep-server", about = "Content-addressed blob storage service")]
struct Args {
    /// Path to a TOML config file. When given, overrides all other flags
    /// except the mutation/caching toggles below, which merge on top of it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `host:port` or an absolute Unix-domain socket path.
    #[arg(long)]
    bind: Option<String>,

    /// `type:address`, e.g. `file:/var/lib/blobkeep` or `memory:default`.
    #[arg(long)]
    store: Option<String>,

    #[arg(long)]
    read_only: bool,

    #[arg(long)]
    compress: bool,

    #[arg(long)]
    encrypt: bool,

    /// Accept encrypt-then-compress ordering. Requires `--encrypt` and
    /// `--compress` and defeats the point of compressing (see spec.md
    /// section 9's resolved open question); only present for operators who
    /// have already decided they need it.
    #[arg(long)]
    encrypt_then_compress: bool,

    #[arg(long)]
    allow_nonstandard_codec_order: bool,

    #[arg(long)]
    cache_bytes: Option<u64>,

    /// `type:address` for a durable write-behind buffer tier in front of `--store`.
    #[arg(long)]
    buffer: Option<String>,
}

fn resolve_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    if let Some(path) = &args.config {
        let mut cfg = ServiceConfig::load(path)?;
        if let Some(bind) = &args.bind {
            cfg.bind = bind.clone();
        }
        if let Some(store) = &args.store {
            cfg.store = store.clone();
        }
        cfg.read_only |= args.read_only;
        cfg.compress |= args.compress;
        cfg.encrypt |= args.encrypt;
        cfg.encrypt_then_compress |= args.encrypt_then_compress;
        cfg.allow_nonstandard_codec_order |= args.allow_nonstandard_codec_order;
        cfg.validate()?;
        return Ok(cfg);
    }

    let bind = args
        .bind
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--bind is required unless --config is given"))?;
    let store = args
        .store
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--store is required unless --config is given"))?;

    let cfg = ServiceConfig {
        bind,
        store,
        read_only: args.read_only,
        compress: args.compress,
        encrypt: args.encrypt,
        encrypt_then_compress: args.encrypt_then_compress,
        allow_nonstandard_codec_order: args.allow_nonstandard_codec_order,
        cache_bytes: args.cache_bytes,
        buffer: args.buffer.clone().map(|store| BufferConfig { store }),
        method_prefix: String::new(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Innermost-first codec stack matching `cfg`'s ordering decision.
fn build_codecs(cfg: &ServiceConfig) -> anyhow::Result<Vec<Arc<dyn Codec>>> {
    let mut codecs: Vec<Arc<dyn Codec>> = Vec::new();
    let key = if cfg.encrypt {
        Some(encryption_key_from_env()?)
    } else {
        None
    };

    if cfg.encrypt_then_compress {
        if let Some(key) = key {
            codecs.push(Arc::new(XChaChaCodec::new(&key)));
        }
        if cfg.compress {
            codecs.push(Arc::new(ZstdCodec::new()));
        }
    } else {
        if cfg.compress {
            codecs.push(Arc::new(ZstdCodec::new()));
        }
        if let Some(key) = key {
            codecs.push(Arc::new(XChaChaCodec::new(&key)));
        }
    }

    Ok(codecs)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg = resolve_config(&args)?;

    let store_spec = StoreSpec::parse(&cfg.store)?;
    let base = Arc::new(BaseStore::open(&store_spec)?);

    let mut blob_store: Arc<dyn Store> = Arc::clone(&base) as Arc<dyn Store>;

    let codecs = build_codecs(&cfg)?;
    if !codecs.is_empty() {
        blob_store = Arc::new(EncodedStore::new(blob_store, codecs)) as Arc<dyn Store>;
    }

    if let Some(cache_bytes) = cfg.cache_bytes {
        blob_store = Arc::new(CachedStore::new(
            blob_store,
            cache_bytes as usize,
            ASSUMED_AVG_VALUE_BYTES,
        )) as Arc<dyn Store>;
    }

    let mut buffer_len: Option<Arc<dyn Fn() -> u64 + Send + Sync>> = None;
    if let Some(buffer_cfg) = &cfg.buffer {
        let buffer_spec = StoreSpec::parse(&buffer_cfg.store)?;
        let buffer_base = BaseStore::open(&buffer_spec)?;
        let wb = Arc::new(WriteBehindStore::new(buffer_base, blob_store)?);
        let wb_for_metrics = Arc::clone(&wb);
        buffer_len = Some(Arc::new(move || wb_for_metrics.pending_len() as u64));
        blob_store = wb as Arc<dyn Store>;
    }

    let mut blobs: Arc<dyn CasStore> = Arc::new(CasOverlay::with_algorithm(blob_store, HashAlgorithm::Sha3_256));
    if cfg.read_only {
        blobs = Arc::new(ReadOnlyStore::new(blobs)) as Arc<dyn CasStore>;
    }

    let root: Arc<dyn NamespacedCasStore> = Arc::new(ServiceStack::new(blobs, Arc::clone(&base)));

    let stack = StackDescription {
        store_name: cfg.store.clone(),
        writable: !cfg.read_only,
        encrypted: cfg.encrypt,
        compressed: cfg.compress,
        cache_size: cfg.cache_bytes,
        buffer_db: cfg.buffer.as_ref().map(|b| b.store.clone()),
    };

    let _server = RpcServer::start(
        &cfg.bind,
        root,
        RpcServerConfig {
            stack,
            buffer_len,
            method_prefix: cfg.method_prefix.clone(),
        },
    )?;
    log::info!("blobkeep-server listening on {}", cfg.bind);

    // No signal handling in this core; park until the process is killed.
    // `_server` stays alive for the process lifetime so its accept thread
    // keeps running.
    loop {
        std::thread::park();
    }
}
