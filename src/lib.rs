//! framelink: a thread-pooled, event-demultiplexed TCP library that frames
//! every application message with a 2-byte big-endian length prefix.
//!
//! The library is process-global and reference counted: [`start`] it,
//! create server and client sockets that report events through the
//! [`ServerHandler`]/[`ClientHandler`] callback traits, and [`stop`] it to
//! tear everything down. Sockets are multiplexed across a pool of worker
//! threads; callbacks are always invoked with no library lock held, so
//! re-entering the library from a callback is legal.

pub mod error;
mod event;
mod handler;
mod lifecycle;
pub mod net;
mod poll;
mod pool;
mod registry;
mod worker;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::warn;

use crate::handler::NetObj;
use crate::lifecycle::Lifecycle;
use crate::net::tcp::{ClientSocket, ServerSocket};
use crate::pool::NetThreadPool;
use crate::registry::HandleRegistry;

pub use crate::error::{Error, Result};
pub use crate::net::tcp::frame::{MAX_PAYLOAD_LEN, PREFIX_LEN};
pub use crate::net::tcp::traits::{ClientHandler, ServerHandle, ServerHandler, SocketHandle};

/// How long teardown waits for the worker pool to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-global library state.
struct Library {
    lifecycle: Lifecycle,
    servers: HandleRegistry<ServerHandle, ServerSocket>,
    sockets: HandleRegistry<SocketHandle, ClientSocket>,
    pool: NetThreadPool,
}

fn library() -> &'static Library {
    static LIBRARY: OnceLock<Library> = OnceLock::new();
    LIBRARY.get_or_init(|| Library {
        lifecycle: Lifecycle::new(),
        servers: HandleRegistry::new(),
        sockets: HandleRegistry::new(),
        pool: NetThreadPool::new(),
    })
}

/// Starts the library, incrementing the process-wide reference count.
/// Balanced [`stop`] calls tear it down again.
pub fn start() -> Result<()> {
    let lib = library();
    let mut count = lib.lifecycle.lock_exclusive();
    // The platform network stack needs no explicit initialization on this
    // target; the first-reference hook stays in the counter so teardown
    // mirrors it.
    *count += 1;
    Ok(())
}

/// Releases one library reference. The last release closes every
/// remaining socket, waits for the worker pool to drain, and tears the
/// library down. Extra calls are silent no-ops.
pub fn stop() {
    let lib = library();
    let mut count = lib.lifecycle.lock_exclusive();
    if *count == 0 {
        return;
    }
    *count -= 1;
    if *count > 0 {
        return;
    }

    while let Some(server) = lib.servers.pop_any() {
        shutdown_server(lib, &server);
    }
    while let Some(socket) = lib.sockets.pop_any() {
        shutdown_client(lib, &socket);
    }

    // Workers acquire the gate in shared mode to run their final
    // callbacks, so it has to be released while the pool drains; the
    // barrier keeps new start/stop calls parked meanwhile.
    lib.lifecycle.begin_uninitializing();
    drop(count);

    if !lib.pool.wait_for_shutdown(SHUTDOWN_TIMEOUT) {
        warn!(
            "worker pool did not shut down within {:?}",
            SHUTDOWN_TIMEOUT
        );
    }

    let count = lib.lifecycle.relock_exclusive();
    lib.lifecycle.end_uninitializing();
    drop(count);
}

/// Creates a listening socket on a numeric address with the given backlog.
/// `handler.on_connection_pending` fires whenever the accept queue is
/// non-empty.
pub fn create_server(
    ip_addr: &str,
    port: u16,
    backlog: i32,
    handler: Arc<dyn ServerHandler>,
) -> Result<ServerHandle> {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return Err(Error::NotInitialized);
    }
    if ip_addr.is_empty() || backlog < 0 {
        return Err(Error::IllegalArgument);
    }

    let server = ServerSocket::create(ip_addr, port, backlog, handler)?;
    register_server(lib, server)
}

/// Accepts one pending connection on `server`, wrapping it as a new client
/// socket that reports through `handler`. Returns the new handle and the
/// peer's address; with nothing pending, the platform would-block error.
pub fn accept(
    server: ServerHandle,
    handler: Arc<dyn ClientHandler>,
) -> Result<(SocketHandle, SocketAddr)> {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return Err(Error::NotInitialized);
    }

    let server = match lib.servers.find(server) {
        Some(server) => server,
        None => return Err(Error::SocketNotFound),
    };

    let (stream, peer_addr) = server.accept()?;
    let socket = ClientSocket::create_accepted(stream, handler);
    let handle = register_client(lib, socket)?;
    Ok((handle, peer_addr))
}

/// Deletes a server socket. Unknown handles are a silent no-op.
pub fn delete_server(server: ServerHandle) {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return;
    }

    if let Some(server) = lib.servers.remove(server) {
        shutdown_server(lib, &server);
    }
}

/// Creates a client socket, connecting synchronously. Candidate addresses
/// from resolution are tried in order; on exhaustion the last attempt's
/// error is returned.
pub fn create_client(
    host: &str,
    port: u16,
    handler: Arc<dyn ClientHandler>,
) -> Result<SocketHandle> {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return Err(Error::NotInitialized);
    }
    if host.is_empty() {
        return Err(Error::IllegalArgument);
    }

    let socket = ClientSocket::create(host, port, handler)?;
    register_client(lib, socket)
}

/// Creates a client socket, connecting asynchronously: resolution happens
/// on a transient background thread and the outcome arrives via
/// `handler.on_connect_complete`, never as a return code of this call.
pub fn create_client_async(
    host: &str,
    port: u16,
    handler: Arc<dyn ClientHandler>,
) -> Result<SocketHandle> {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return Err(Error::NotInitialized);
    }
    if host.is_empty() {
        return Err(Error::IllegalArgument);
    }

    let socket = ClientSocket::create_async(host, port, handler)?;
    register_client(lib, socket)
}

/// Sends one framed message on `socket`. Zero-length payloads are a no-op
/// that puts no bytes on the wire; payloads over [`MAX_PAYLOAD_LEN`] are
/// rejected.
pub fn send(socket: SocketHandle, buf: &[u8]) -> Result<()> {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return Err(Error::NotInitialized);
    }
    if buf.len() > MAX_PAYLOAD_LEN {
        return Err(Error::BufferTooBig);
    }

    let socket = match lib.sockets.find(socket) {
        Some(socket) => socket,
        None => return Err(Error::SocketNotFound),
    };

    if buf.is_empty() {
        // a zero-length send is a null operation
        return Ok(());
    }

    socket.send(buf)
}

/// Deletes a client socket. Unknown handles are a silent no-op; callbacks
/// already in flight may still run.
pub fn delete_client(socket: SocketHandle) {
    let lib = library();
    let count = lib.lifecycle.lock_shared();
    if *count == 0 {
        return;
    }

    if let Some(socket) = lib.sockets.remove(socket) {
        shutdown_client(lib, &socket);
    }
}

/// Registers a freshly created server socket with the registry and the
/// worker pool, rolling both back if the pool placement fails.
fn register_server(lib: &Library, server: Arc<ServerSocket>) -> Result<ServerHandle> {
    let handle = server.handle();
    lib.servers.add(handle, Arc::clone(&server));
    let obj = Arc::clone(&server) as Arc<dyn NetObj>;
    if let Err(e) = lib.pool.add_net_obj(obj) {
        lib.servers.remove(handle);
        server.close();
        return Err(Error::Io(e));
    }
    Ok(handle)
}

fn register_client(lib: &Library, socket: Arc<ClientSocket>) -> Result<SocketHandle> {
    let handle = socket.handle();
    lib.sockets.add(handle, Arc::clone(&socket));
    let obj = Arc::clone(&socket) as Arc<dyn NetObj>;
    if let Err(e) = lib.pool.add_net_obj(obj) {
        lib.sockets.remove(handle);
        socket.close();
        return Err(Error::Io(e));
    }
    Ok(handle)
}

fn shutdown_server(lib: &Library, server: &Arc<ServerSocket>) {
    let obj = Arc::clone(server) as Arc<dyn NetObj>;
    lib.pool.remove_net_obj(&obj);
    server.close();
}

fn shutdown_client(lib: &Library, socket: &Arc<ClientSocket>) {
    let obj = Arc::clone(socket) as Arc<dyn NetObj>;
    lib.pool.remove_net_obj(&obj);
    socket.close();
}
