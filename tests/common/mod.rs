#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use framelink::{ClientHandler, ServerHandle, ServerHandler, SocketHandle};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Client handler that records every callback and lets tests wait on them.
pub struct Recorder {
    state: Mutex<RecorderState>,
    cv: Condvar,
}

#[derive(Default)]
struct RecorderState {
    data: Vec<Vec<u8>>,
    connects: Vec<Result<(), io::ErrorKind>>,
    closed: usize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RecorderState::default()),
            cv: Condvar::new(),
        })
    }

    pub fn wait_data(&self, n: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let (state, result) = self
            .cv
            .wait_timeout_while(state, timeout, |s| s.data.len() < n)
            .unwrap();
        assert!(
            !result.timed_out(),
            "expected {} frames, saw {}",
            n,
            state.data.len()
        );
        state.data.clone()
    }

    pub fn wait_connects(&self, n: usize, timeout: Duration) -> Vec<Result<(), io::ErrorKind>> {
        let state = self.state.lock().unwrap();
        let (state, result) = self
            .cv
            .wait_timeout_while(state, timeout, |s| s.connects.len() < n)
            .unwrap();
        assert!(
            !result.timed_out(),
            "expected {} connect completions, saw {}",
            n,
            state.connects.len()
        );
        state.connects.clone()
    }

    pub fn wait_closed(&self, n: usize, timeout: Duration) {
        let state = self.state.lock().unwrap();
        let (state, result) = self
            .cv
            .wait_timeout_while(state, timeout, |s| s.closed < n)
            .unwrap();
        assert!(
            !result.timed_out(),
            "expected {} closed callbacks, saw {}",
            n,
            state.closed
        );
    }

    pub fn data_len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    pub fn total_payload_bytes(&self) -> usize {
        self.state.lock().unwrap().data.iter().map(Vec::len).sum()
    }

    pub fn connects(&self) -> Vec<Result<(), io::ErrorKind>> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl ClientHandler for Recorder {
    fn on_connect_complete(&self, _socket: SocketHandle, result: io::Result<()>) {
        let mut state = self.state.lock().unwrap();
        state.connects.push(result.map_err(|e| e.kind()));
        self.cv.notify_all();
    }

    fn on_data(&self, _socket: SocketHandle, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.data.push(data.to_vec());
        self.cv.notify_all();
    }

    fn on_closed(&self, _socket: SocketHandle, _error: Option<io::Error>) {
        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        self.cv.notify_all();
    }
}

/// Client handler that sends every received frame straight back.
pub struct EchoClient;

impl ClientHandler for EchoClient {
    fn on_data(&self, socket: SocketHandle, data: &[u8]) {
        let _ = framelink::send(socket, data);
    }
}

/// Client handler that deletes its own socket from inside the closed
/// callback, exercising re-entrancy.
pub struct DeleteOnClose {
    closed: Mutex<usize>,
    cv: Condvar,
}

impl DeleteOnClose {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: Mutex::new(0),
            cv: Condvar::new(),
        })
    }

    pub fn wait_closed(&self, timeout: Duration) {
        let closed = self.closed.lock().unwrap();
        let (_closed, result) = self
            .cv
            .wait_timeout_while(closed, timeout, |c| *c == 0)
            .unwrap();
        assert!(!result.timed_out(), "closed callback never arrived");
    }
}

impl ClientHandler for DeleteOnClose {
    fn on_data(&self, _socket: SocketHandle, _data: &[u8]) {}

    fn on_closed(&self, socket: SocketHandle, _error: Option<io::Error>) {
        framelink::delete_client(socket);
        *self.closed.lock().unwrap() += 1;
        self.cv.notify_all();
    }
}

/// Server handler that accepts every pending connection with a shared
/// client handler and records the accepted handles.
pub struct AcceptingServer {
    client_handler: Arc<dyn ClientHandler>,
    accepted: Mutex<Vec<SocketHandle>>,
    cv: Condvar,
}

impl AcceptingServer {
    pub fn new(client_handler: Arc<dyn ClientHandler>) -> Arc<Self> {
        Arc::new(Self {
            client_handler,
            accepted: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        })
    }

    pub fn wait_accepted(&self, n: usize, timeout: Duration) -> Vec<SocketHandle> {
        let accepted = self.accepted.lock().unwrap();
        let (accepted, result) = self
            .cv
            .wait_timeout_while(accepted, timeout, |a| a.len() < n)
            .unwrap();
        assert!(
            !result.timed_out(),
            "expected {} accepted sockets, saw {}",
            n,
            accepted.len()
        );
        accepted.clone()
    }

    pub fn accepted(&self) -> Vec<SocketHandle> {
        self.accepted.lock().unwrap().clone()
    }
}

impl ServerHandler for AcceptingServer {
    fn on_connection_pending(&self, server: ServerHandle) {
        // drain the whole accept queue
        while let Ok((socket, _peer)) = framelink::accept(server, Arc::clone(&self.client_handler))
        {
            let mut accepted = self.accepted.lock().unwrap();
            accepted.push(socket);
            self.cv.notify_all();
        }
    }
}
