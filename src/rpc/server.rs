//! The RPC accept loop and per-connection dispatch.
//!
//! Grounded on `cas::server::CasServer`: a `TcpListener::incoming()` loop
//! handing each connection to `thread::spawn` over shared state. Generalized
//! two ways beyond the teacher: a `Listener` enum also accepts Unix-domain
//! sockets (the way `nbd::server` and `iscsi` each have their own listener
//! sharing one `BlockStorage`), and the accept loop polls a nonblocking
//! listener instead of blocking forever, so shutdown can flip a
//! [`CancelToken`] and have the loop notice within one poll interval instead
//! of blocking on a connection that may never arrive.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::process;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::protocol::{read_frame, write_frame, Frame, RpcError};
use crate::error::ErrorKind;
use crate::store::{CancelToken, CasStore, ListControl, Namespaced, PutOptions, Store, StoreError};

const LIST_CHUNK_SIZE: usize = 256;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub started: u64,
    pub store: String,
    pub pid: u32,
    pub writable: bool,
    pub encrypted: bool,
    pub compressed: bool,
    pub cache_size: Option<u64>,
    pub buffer_db: Option<String>,
    pub buffer_len: Option<u64>,
    pub build_info: String,
}

/// Static facts about the wired store stack, known at server construction.
#[derive(Clone)]
pub struct StackDescription {
    pub store_name: String,
    pub writable: bool,
    pub encrypted: bool,
    pub compressed: bool,
    pub cache_size: Option<u64>,
    pub buffer_db: Option<String>,
}

pub struct RpcServerConfig {
    pub stack: StackDescription,
    /// Polled on every `status` request; `None` if no write-behind buffer is wired.
    pub buffer_len: Option<Arc<dyn Fn() -> u64 + Send + Sync>>,
    /// Stripped from an incoming method name before matching against the
    /// known method set. Empty by default (no namespacing).
    pub method_prefix: String,
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

enum Conn {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Conn {
    fn try_clone(&self) -> std::io::Result<Conn> {
        match self {
            Conn::Tcp(s) => Ok(Conn::Tcp(s.try_clone()?)),
            #[cfg(unix)]
            Conn::Unix(s) => Ok(Conn::Unix(s.try_clone()?)),
        }
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        match self {
            Conn::Tcp(s) => s.set_read_timeout(dur),
            #[cfg(unix)]
            Conn::Unix(s) => s.set_read_timeout(dur),
        }
    }
}

impl std::io::Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.read(buf),
        }
    }
}

impl std::io::Write for Conn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Conn::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Conn::Unix(s) => s.flush(),
        }
    }
}

/// One entry point to the store stack, navigable one level deep via `sub`.
/// Matches the `Namespaced::sub` contract, which returns a plain `Store`
/// (not itself `Namespaced`) -- a single level of nesting is what the
/// glossary's "sub-namespace" concept calls for.
enum Current {
    Root(Arc<dyn NamespacedCasStore>),
    Child(Arc<dyn Store>),
}

impl Current {
    fn as_store(&self) -> &dyn Store {
        match self {
            Current::Root(s) => s.as_ref(),
            Current::Child(s) => s.as_ref(),
        }
    }

    fn sub(&self, name: &str) -> Result<Current, StoreError> {
        match self {
            Current::Root(s) => Ok(Current::Child(s.sub(name)?)),
            Current::Child(_) => Err(StoreError::NoSuchNamespace(name.to_string())),
        }
    }

    fn as_cas(&self) -> Option<&dyn CasStore> {
        match self {
            Current::Root(s) => Some(s.as_ref()),
            Current::Child(_) => None,
        }
    }
}

/// The combined capability the RPC service needs at the root of the store
/// stack: plain KV, content addressing, and sub-namespace navigation.
pub trait NamespacedCasStore: Store + CasStore + Namespaced {}
impl<T: Store + CasStore + Namespaced> NamespacedCasStore for T {}

pub struct RpcServer {
    cancel: CancelToken,
    threads: Mutex<VecDeque<JoinHandle<()>>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    /// Bind and start serving in the background. `addr` is `host:port` for
    /// TCP, or an absolute path for a Unix-domain socket.
    pub fn start(
        addr: &str,
        root: Arc<dyn NamespacedCasStore>,
        config: RpcServerConfig,
    ) -> std::io::Result<Arc<Self>> {
        let listener = if addr.starts_with('/') {
            #[cfg(unix)]
            {
                let _ = std::fs::remove_file(addr);
                Listener::Unix(UnixListener::bind(addr)?)
            }
            #[cfg(not(unix))]
            {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix-domain sockets are not supported on this platform",
                ));
            }
        } else {
            let socket_addr = addr
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no address"))?;
            Listener::Tcp(TcpListener::bind(socket_addr)?)
        };

        match &listener {
            Listener::Tcp(l) => l.set_nonblocking(true)?,
            #[cfg(unix)]
            Listener::Unix(l) => l.set_nonblocking(true)?,
        }

        let cancel = CancelToken::new();
        let server = Arc::new(RpcServer {
            cancel: cancel.clone(),
            threads: Mutex::new(VecDeque::new()),
            accept_thread: Mutex::new(None),
        });

        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let config = Arc::new(config);
        let server_weak = Arc::downgrade(&server);

        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, root, config, started, cancel, server_weak);
        });
        *server.accept_thread.lock().unwrap() = Some(accept_thread);

        Ok(server)
    }

    /// Stop accepting new connections, give in-flight requests
    /// [`SHUTDOWN_GRACE`] to finish, then return.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let mut threads = self.threads.lock().unwrap();
        while let Some(handle) = threads.pop_front() {
            if handle.is_finished() || Instant::now() < deadline {
                let _ = handle.join();
            } else {
                log::warn!("rpc shutdown: a connection thread did not finish within the grace period");
            }
        }
    }
}

fn accept_loop(
    listener: Listener,
    root: Arc<dyn NamespacedCasStore>,
    config: Arc<RpcServerConfig>,
    started: u64,
    cancel: CancelToken,
    server: std::sync::Weak<RpcServer>,
) {
    loop {
        if cancel.is_canceled() {
            return;
        }

        let accepted = match &listener {
            Listener::Tcp(l) => l.accept().map(|(s, _)| Conn::Tcp(s)),
            #[cfg(unix)]
            Listener::Unix(l) => l.accept().map(|(s, _)| Conn::Unix(s)),
        };

        match accepted {
            Ok(conn) => {
                let root = Arc::clone(&root);
                let config = Arc::clone(&config);
                let cancel = cancel.clone();
                let handle = std::thread::spawn(move || {
                    if let Err(e) = handle_connection(conn, root, config, started, cancel) {
                        log::warn!("rpc connection ended with an error: {e}");
                    }
                });
                if let Some(server) = server.upgrade() {
                    server.threads.lock().unwrap().push_back(handle);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::warn!("rpc accept failed: {e}");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn handle_connection(
    conn: Conn,
    root: Arc<dyn NamespacedCasStore>,
    config: Arc<RpcServerConfig>,
    started: u64,
    cancel: CancelToken,
) -> Result<(), RpcError> {
    conn.set_read_timeout(Some(CONNECTION_READ_TIMEOUT))?;
    let write_conn = conn.try_clone()?;
    let mut reader = BufReader::new(conn);
    let mut writer = BufWriter::new(write_conn);

    let mut current = Current::Root(root);

    loop {
        if cancel.is_canceled() {
            return Ok(());
        }

        let frame = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(RpcError::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Frame::Request { request_id, method, args } = frame else {
            continue;
        };

        match dispatch(&method, &args, &mut current, &config, started, &cancel) {
            Ok(Dispatched::Single(payload)) => {
                write_frame(&mut writer, &Frame::FinalResponse { request_id, payload })?;
            }
            Ok(Dispatched::Chunked(chunks)) => {
                for chunk in chunks {
                    write_frame(&mut writer, &Frame::ChunkResponse { request_id, payload: chunk })?;
                }
                write_frame(
                    &mut writer,
                    &Frame::FinalResponse { request_id, payload: Vec::new() },
                )?;
            }
            Err(e) => {
                write_frame(
                    &mut writer,
                    &Frame::Error {
                        request_id,
                        code: error_code(&e),
                        message: e.to_string(),
                    },
                )?;
            }
        }
    }
}

fn error_code(kind: &ErrorKind) -> u8 {
    match kind {
        ErrorKind::KeyNotFound => 1,
        ErrorKind::KeyExists => 2,
        ErrorKind::ReadOnly => 3,
        ErrorKind::Corrupt => 4,
        ErrorKind::Canceled => 5,
        ErrorKind::Transient => 6,
        ErrorKind::Fatal => 7,
    }
}

enum Dispatched {
    Single(Vec<u8>),
    Chunked(Vec<Vec<u8>>),
}

#[derive(Serialize, Deserialize)]
struct GetArgs {
    key: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct GetResponse {
    data: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct PutArgs {
    key: Vec<u8>,
    data: Vec<u8>,
    replace: bool,
}
#[derive(Serialize, Deserialize)]
struct DeleteArgs {
    key: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct HasArgs {
    keys: Vec<Vec<u8>>,
}
#[derive(Serialize, Deserialize)]
struct HasResponse {
    present: Vec<Vec<u8>>,
}
#[derive(Serialize, Deserialize)]
struct LenResponse {
    len: u64,
}
#[derive(Serialize, Deserialize)]
struct ListArgs {
    start: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct CasPutArgs {
    data: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct CasKeyResponse {
    key: Vec<u8>,
}
#[derive(Serialize, Deserialize)]
struct SubArgs {
    name: String,
}

fn dispatch(
    method: &str,
    args: &[u8],
    current: &mut Current,
    config: &RpcServerConfig,
    started: u64,
    cancel: &CancelToken,
) -> Result<Dispatched, ErrorKind> {
    let to_err = |e: StoreError| e.kind();
    let to_encode_err = |_: bincode::Error| ErrorKind::Corrupt;
    let method = method.strip_prefix(config.method_prefix.as_str()).unwrap_or(method);

    match method {
        "get" => {
            let a: GetArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let data = current.as_store().get(&a.key).map_err(to_err)?;
            let resp = bincode::serialize(&GetResponse { data }).map_err(to_encode_err)?;
            Ok(Dispatched::Single(resp))
        }
        "put" => {
            let a: PutArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let opts = if a.replace {
                PutOptions::new(a.key, a.data)
            } else {
                PutOptions::new(a.key, a.data).no_replace()
            };
            current.as_store().put(opts).map_err(to_err)?;
            Ok(Dispatched::Single(Vec::new()))
        }
        "delete" => {
            let a: DeleteArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            current.as_store().delete(&a.key).map_err(to_err)?;
            Ok(Dispatched::Single(Vec::new()))
        }
        "has" => {
            let a: HasArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let present = current.as_store().has(&a.keys).map_err(to_err)?;
            let resp = bincode::serialize(&HasResponse {
                present: present.into_iter().collect(),
            })
            .map_err(to_encode_err)?;
            Ok(Dispatched::Single(resp))
        }
        "len" => {
            let len = current.as_store().len().map_err(to_err)?;
            let resp = bincode::serialize(&LenResponse { len }).map_err(to_encode_err)?;
            Ok(Dispatched::Single(resp))
        }
        "list" => {
            let a: ListArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let mut chunks = Vec::new();
            let mut current_chunk: Vec<Vec<u8>> = Vec::new();
            current
                .as_store()
                .list(&a.start, cancel, &mut |k| {
                    current_chunk.push(k.to_vec());
                    if current_chunk.len() == LIST_CHUNK_SIZE {
                        chunks.push(std::mem::take(&mut current_chunk));
                    }
                    ListControl::Continue
                })
                .map_err(to_err)?;
            if !current_chunk.is_empty() {
                chunks.push(current_chunk);
            }
            let encoded: Result<Vec<Vec<u8>>, bincode::Error> = chunks
                .into_iter()
                .map(|c| bincode::serialize(&c))
                .collect();
            Ok(Dispatched::Chunked(encoded.map_err(to_encode_err)?))
        }
        "cas-put" => {
            let a: CasPutArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let cas = current.as_cas().ok_or(ErrorKind::Fatal)?;
            let key = cas.cas_put(&a.data).map_err(to_err)?;
            let resp = bincode::serialize(&CasKeyResponse { key }).map_err(to_encode_err)?;
            Ok(Dispatched::Single(resp))
        }
        "cas-key" => {
            let a: CasPutArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            let cas = current.as_cas().ok_or(ErrorKind::Fatal)?;
            let key = cas.cas_key(&a.data);
            let resp = bincode::serialize(&CasKeyResponse { key }).map_err(to_encode_err)?;
            Ok(Dispatched::Single(resp))
        }
        "sub" | "open-kv" | "open-cas" => {
            let a: SubArgs = bincode::deserialize(args).map_err(to_encode_err)?;
            *current = current.sub(&a.name).map_err(to_err)?;
            Ok(Dispatched::Single(Vec::new()))
        }
        "status" => {
            let metrics = ServiceMetrics {
                started,
                store: config.stack.store_name.clone(),
                pid: process::id(),
                writable: config.stack.writable,
                encrypted: config.stack.encrypted,
                compressed: config.stack.compressed,
                cache_size: config.stack.cache_size,
                buffer_db: config.stack.buffer_db.clone(),
                buffer_len: config.buffer_len.as_ref().map(|f| f()),
                build_info: env!("CARGO_PKG_VERSION").to_string(),
            };
            let resp = serde_json::to_vec(&metrics).map_err(|_| ErrorKind::Fatal)?;
            Ok(Dispatched::Single(resp))
        }
        _ => Err(ErrorKind::Fatal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::CasOverlay;
    use crate::store::memory::MemoryStore;
    use std::net::TcpStream;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn get_put_over_the_wire_round_trips() {
        let port = free_port();
        let addr = format!("127.0.0.1:{port}");
        let store: Arc<dyn NamespacedCasStore> = Arc::new(CasOverlay::new(MemoryStore::new()));

        let server = RpcServer::start(
            &addr,
            store,
            RpcServerConfig {
                stack: StackDescription {
                    store_name: "memory".into(),
                    writable: true,
                    encrypted: false,
                    compressed: false,
                    cache_size: None,
                    buffer_db: None,
                },
                buffer_len: None,
                method_prefix: String::new(),
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));

        let mut client = TcpStream::connect(&addr).unwrap();
        let put_args = bincode::serialize(&PutArgs {
            key: b"k".to_vec(),
            data: b"v".to_vec(),
            replace: true,
        })
        .unwrap();
        write_frame(
            &mut client,
            &Frame::Request { request_id: 1, method: "put".into(), args: put_args },
        )
        .unwrap();
        let resp = read_frame(&mut client).unwrap();
        assert!(matches!(resp, Frame::FinalResponse { .. }));

        let get_args = bincode::serialize(&GetArgs { key: b"k".to_vec() }).unwrap();
        write_frame(
            &mut client,
            &Frame::Request { request_id: 2, method: "get".into(), args: get_args },
        )
        .unwrap();
        let resp = read_frame(&mut client).unwrap();
        match resp {
            Frame::FinalResponse { payload, .. } => {
                let decoded: GetResponse = bincode::deserialize(&payload).unwrap();
                assert_eq!(decoded.data, b"v");
            }
            other => panic!("unexpected: {other:?}"),
        }

        drop(client);
        server.shutdown();
    }
}
