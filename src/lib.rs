//! `blobkeep`: a content-addressed blob store with a pluggable backend
//! stack, a write-behind buffer, an RPC service, and a reachability-based
//! garbage collector.

pub mod cas;
pub mod codec;
pub mod config;
pub mod error;
pub mod gc;
pub mod index;
pub mod path;
pub mod rpc;
pub mod store;
pub mod tree;

pub use cas::{CasOverlay, HashAlgorithm};
pub use config::{ServiceConfig, StoreSpec};
pub use error::ErrorKind;
pub use gc::{GcConfig, GcReport};
pub use store::backend::{BaseStore, ServiceStack};
pub use store::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};
