//! Length-framed RPC service exposing the store stack over TCP or a
//! Unix-domain socket. See [`server::RpcServer`] for the accept loop and
//! [`protocol`] for the wire format.

pub mod protocol;
pub mod server;

pub use protocol::{Frame, RpcError};
pub use server::{NamespacedCasStore, RpcServer, RpcServerConfig, ServiceMetrics, StackDescription};
