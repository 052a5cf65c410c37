use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a listening socket, valid until explicit deletion.
///
/// Handles are allocated from a process-wide counter and never reused, so a
/// handle that outlives its socket is reliably reported as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerHandle(u64);

impl ServerHandle {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ServerHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Unique identifier for a client socket, valid until explicit deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(u64);

impl SocketHandle {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SocketHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Callbacks for a listening socket.
///
/// Invoked from worker threads with no library lock held, so calling back
/// into the library (including [`accept`](crate::accept) and
/// [`delete_server`](crate::delete_server) on this very socket) is legal.
/// Implementations must be thread-safe; state that should travel with the
/// socket lives on the implementing type.
pub trait ServerHandler: Send + Sync + 'static {
    /// One or more connections are pending; call
    /// [`accept`](crate::accept) to take one.
    fn on_connection_pending(&self, server: ServerHandle);

    /// The listening socket observed a close condition.
    fn on_closed(&self, server: ServerHandle, error: Option<io::Error>) {
        let _ = (server, error);
    }
}

/// Callbacks for a connected (or connecting) socket.
///
/// Per socket lifetime: at most one `on_connect_complete` (async creation
/// only), any number of `on_data`, and exactly one `on_closed` once the
/// socket reached open state. `on_connect_complete` precedes the first
/// `on_data`. All callbacks run with the socket's lock released.
pub trait ClientHandler: Send + Sync + 'static {
    /// Outcome of an asynchronous connect, after the candidate addresses
    /// have been exhausted or one of them accepted.
    fn on_connect_complete(&self, socket: SocketHandle, result: io::Result<()>) {
        let _ = (socket, result);
    }

    /// A complete frame's payload arrived.
    fn on_data(&self, socket: SocketHandle, data: &[u8]);

    /// The peer closed the connection (`None`) or the stream failed.
    fn on_closed(&self, socket: SocketHandle, error: Option<io::Error>) {
        let _ = (socket, error);
    }
}
