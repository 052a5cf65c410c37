use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{debug, warn};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use socket2::SockRef;

use crate::error::{Error, Result};
use crate::event::NetEvent;
use crate::handler::{NetObj, Registration};
use crate::net::resolve_host;
use crate::net::tcp::frame::{self, FrameDecoder};
use crate::net::tcp::traits::{ClientHandler, SocketHandle};

/// Interest while a non-blocking connect is in flight; narrowed to reads
/// once the connection is established.
const CONNECTING_INTEREST: Interest = Interest::READABLE.add(Interest::WRITABLE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Resolving,
    Connecting,
    Connected,
    Closed,
}

/// A connected (or connecting) TCP endpoint carrying the framed protocol.
///
/// Created three ways: synchronously (resolve + blocking connect in the
/// caller), asynchronously (transient resolver thread, then
/// readiness-driven candidate iteration), or by adopting a stream from a
/// listener. Callbacks are always invoked with the internal lock released,
/// so the socket may be re-entered, including its own close, from inside a
/// callback.
pub struct ClientSocket {
    handle: SocketHandle,
    handler: Arc<dyn ClientHandler>,
    inner: Mutex<ClientInner>,
    resolve_cv: Condvar,
}

struct ClientInner {
    stream: Option<TcpStream>,
    state: SocketState,
    candidates: Vec<SocketAddr>,
    next_candidate: usize,
    registration: Option<Registration>,
    decoder: FrameDecoder,
    stream_corrupted: bool,
    close_called: bool,
    resolve_completed: bool,
    connect_notified: bool,
    closed_notified: bool,
}

/// Outcome of one non-blocking read into the current decode stage.
enum StageResult {
    Progress,
    WouldBlock,
    Eof,
    Failed(io::Error),
}

/// Outcome of one locked pass over the receive path.
enum ReadStep {
    Deliver(Vec<u8>),
    Again,
    Wait,
    Closed(Option<io::Error>),
}

impl ClientSocket {
    /// Connects synchronously, trying each resolved candidate in order and
    /// reporting the last attempt's error on exhaustion.
    pub fn create(host: &str, port: u16, handler: Arc<dyn ClientHandler>) -> Result<Arc<Self>> {
        let candidates = resolve_host(host, port).map_err(Error::Io)?;
        let stream = Self::connect_blocking(&candidates)?;
        Ok(Self::with_stream(stream, SocketState::Connected, handler))
    }

    /// Starts an asynchronous connect: a transient thread resolves the
    /// host, then connect readiness drives the candidate iteration.
    pub fn create_async(
        host: &str,
        port: u16,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Arc<Self>> {
        let socket = Arc::new(Self {
            handle: SocketHandle::next(),
            handler,
            inner: Mutex::new(ClientInner {
                stream: None,
                state: SocketState::Resolving,
                candidates: Vec::new(),
                next_candidate: 0,
                registration: None,
                decoder: FrameDecoder::new(),
                stream_corrupted: false,
                close_called: false,
                resolve_completed: false,
                connect_notified: false,
                closed_notified: false,
            }),
            resolve_cv: Condvar::new(),
        });

        let resolver = Arc::clone(&socket);
        let host = host.to_string();
        let spawned = thread::Builder::new()
            .name(format!("resolver-{}", socket.handle.as_u64()))
            .spawn(move || {
                let result = resolve_host(&host, port);
                resolver.on_host_resolved(result);
            });
        if let Err(e) = spawned {
            // no resolver is running, so close() must not wait for one
            socket.inner.lock().unwrap().resolve_completed = true;
            return Err(Error::Io(e));
        }

        Ok(socket)
    }

    /// Adopts an already-connected non-blocking stream handed over by a
    /// listener.
    pub fn create_accepted(stream: TcpStream, handler: Arc<dyn ClientHandler>) -> Arc<Self> {
        Self::with_stream(stream, SocketState::Connected, handler)
    }

    fn with_stream(
        stream: TcpStream,
        state: SocketState,
        handler: Arc<dyn ClientHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle: SocketHandle::next(),
            handler,
            inner: Mutex::new(ClientInner {
                stream: Some(stream),
                state,
                candidates: Vec::new(),
                next_candidate: 0,
                registration: None,
                decoder: FrameDecoder::new(),
                stream_corrupted: false,
                close_called: false,
                resolve_completed: true,
                // only async creation emits connect-complete
                connect_notified: true,
                closed_notified: false,
            }),
            resolve_cv: Condvar::new(),
        })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Sends one framed payload: 2-byte big-endian length prefix, then the
    /// payload. The stream is flipped to blocking for the duration so short
    /// writes wait in the kernel instead of spinning.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if inner.stream_corrupted {
            return Err(Error::DataStreamCorrupted);
        }

        let prefix = frame::encode_prefix(buf.len())?;

        let stream = match inner.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "socket is not connected",
                )))
            }
        };

        set_blocking(stream)?;

        let mut corrupted = false;
        let mut prefix_sent = 0;
        let outcome = match send_all(stream, &prefix, &mut prefix_sent) {
            Ok(()) => {
                let mut payload_sent = 0;
                let result = send_all(stream, buf, &mut payload_sent);
                if result.is_err() {
                    // the peer's framer is now out of phase
                    corrupted = true;
                }
                result
            }
            Err(e) => {
                if prefix_sent > 0 {
                    corrupted = true;
                }
                Err(e)
            }
        };

        let restore = set_nonblocking(stream);
        if corrupted {
            inner.stream_corrupted = true;
        }

        match outcome {
            Ok(()) => restore.map_err(Error::Io),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Closes the socket: waits out a still-running resolver, then drops
    /// the stream. Idempotent; no callbacks are delivered afterwards.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.close_called = true;

        while !guard.resolve_completed {
            guard = self.resolve_cv.wait(guard).unwrap();
        }

        let inner = &mut *guard;
        if let Some(mut stream) = inner.stream.take() {
            if let Some(reg) = inner.registration.as_ref() {
                let _ = reg.registry.deregister(&mut stream);
            }
        }
        inner.state = SocketState::Closed;
    }

    fn connect_blocking(candidates: &[SocketAddr]) -> Result<TcpStream> {
        let mut last_err = no_addresses_err();
        for addr in candidates {
            match std::net::TcpStream::connect(addr) {
                Ok(stream) => {
                    stream.set_nonblocking(true).map_err(Error::Io)?;
                    return Ok(TcpStream::from_std(stream));
                }
                Err(e) => last_err = e,
            }
        }
        Err(Error::Io(last_err))
    }

    /// Resolver completion: begin connecting unless close() won the race.
    fn on_host_resolved(&self, result: io::Result<Vec<SocketAddr>>) {
        let mut completion_err: Option<io::Error> = None;
        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match result {
                Ok(candidates) if !inner.close_called => {
                    inner.candidates = candidates;
                    inner.state = SocketState::Connecting;
                    if let Err(e) = Self::connect_next(inner, no_addresses_err()) {
                        inner.state = SocketState::Closed;
                        completion_err = Some(e);
                    }
                }
                // close() beat the resolver; swallow the outcome entirely
                Ok(_) => {}
                Err(e) => {
                    if !inner.close_called {
                        inner.state = SocketState::Closed;
                        completion_err = Some(e);
                    }
                }
            }
            if completion_err.is_some() {
                inner.connect_notified = true;
            }
            inner.resolve_completed = true;
            self.resolve_cv.notify_all();
        }

        if let Some(e) = completion_err {
            self.handler.on_connect_complete(self.handle, Err(e));
        }
    }

    /// Starts a non-blocking connect to the next candidate, dropping any
    /// previous attempt's stream. `last_err` is returned unchanged when the
    /// cursor is already exhausted, so the error reported on failure is
    /// always the latest attempt's.
    fn connect_next(inner: &mut ClientInner, mut last_err: io::Error) -> io::Result<()> {
        if let Some(mut old) = inner.stream.take() {
            if let Some(reg) = inner.registration.as_ref() {
                let _ = reg.registry.deregister(&mut old);
            }
        }

        while inner.next_candidate < inner.candidates.len() {
            let addr = inner.candidates[inner.next_candidate];
            inner.next_candidate += 1;

            match TcpStream::connect(addr) {
                Ok(mut stream) => {
                    if let Some(reg) = inner.registration.as_ref() {
                        if let Err(e) =
                            reg.registry.register(&mut stream, reg.token, CONNECTING_INTEREST)
                        {
                            last_err = e;
                            continue;
                        }
                    }
                    inner.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    /// Connect readiness: confirm the attempt or advance to the next
    /// candidate, reporting completion once the iteration ends.
    fn handle_connect_progress(&self) {
        let mut completion: Option<io::Result<()>> = None;
        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            if inner.state != SocketState::Connecting || inner.connect_notified {
                return;
            }
            let stream = match inner.stream.as_mut() {
                Some(stream) => stream,
                None => return,
            };

            // SO_ERROR reports a failed attempt; a resolvable peer address
            // means the connection is established.
            let attempt_err = match stream.take_error() {
                Ok(Some(e)) => Some(e),
                Ok(None) => match stream.peer_addr() {
                    Ok(_) => None,
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => return, // still in flight
                    Err(e) => Some(e),
                },
                Err(e) => Some(e),
            };

            match attempt_err {
                None => {
                    inner.state = SocketState::Connected;
                    if let Some(reg) = inner.registration.as_ref() {
                        if let Err(e) =
                            reg.registry.reregister(stream, reg.token, Interest::READABLE)
                        {
                            warn!("could not re-register connected socket: {}", e);
                        }
                    }
                    inner.connect_notified = true;
                    completion = Some(Ok(()));
                }
                Some(err) => match Self::connect_next(inner, err) {
                    // the next candidate's attempt is in flight
                    Ok(()) => {}
                    Err(last) => {
                        inner.state = SocketState::Closed;
                        inner.connect_notified = true;
                        completion = Some(Err(last));
                    }
                },
            }
        }

        if let Some(result) = completion {
            self.handler.on_connect_complete(self.handle, result);
        }
    }

    /// Read readiness: run the two-stage frame decode, delivering each
    /// completed frame with the lock released, until the stream would
    /// block. Draining here is required because the demultiplexer is
    /// edge-triggered; per-socket FIFO order is preserved.
    fn handle_readable(&self) {
        loop {
            let step = {
                let mut guard = self.inner.lock().unwrap();
                let inner = &mut *guard;
                if inner.state != SocketState::Connected {
                    return;
                }
                let stream = match inner.stream.as_mut() {
                    Some(stream) => stream,
                    None => return,
                };

                let mut eof: Option<Option<io::Error>> = None;
                let mut would_block = false;

                if !inner.decoder.prefix_complete() {
                    match read_stage(stream, &mut inner.decoder) {
                        StageResult::Progress => {}
                        StageResult::WouldBlock => would_block = true,
                        StageResult::Eof => eof = Some(None),
                        StageResult::Failed(e) => eof = Some(Some(e)),
                    }
                }

                if eof.is_none()
                    && !would_block
                    && inner.decoder.prefix_complete()
                    && !inner.decoder.frame_complete()
                {
                    match read_stage(stream, &mut inner.decoder) {
                        StageResult::Progress => {}
                        StageResult::WouldBlock => would_block = true,
                        StageResult::Eof => eof = Some(None),
                        StageResult::Failed(e) => eof = Some(Some(e)),
                    }
                }

                if let Some(error) = eof {
                    ReadStep::Closed(error)
                } else if inner.decoder.frame_complete() {
                    match inner.decoder.take_payload() {
                        // zero-length frames reset the decoder silently
                        Some(payload) if !payload.is_empty() => ReadStep::Deliver(payload),
                        _ => ReadStep::Again,
                    }
                } else if would_block {
                    ReadStep::Wait
                } else {
                    ReadStep::Again
                }
            };

            match step {
                ReadStep::Deliver(payload) => self.handler.on_data(self.handle, &payload),
                ReadStep::Again => {}
                ReadStep::Wait => return,
                ReadStep::Closed(error) => {
                    self.notify_closed(error);
                    return;
                }
            }
        }
    }

    /// Delivers the closed callback at most once, and never after the
    /// user's own close.
    fn notify_closed(&self, error: Option<io::Error>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SocketState::Connected
                || inner.closed_notified
                || inner.stream.is_none()
            {
                return;
            }
            inner.closed_notified = true;
        }
        self.handler.on_closed(self.handle, error);
    }
}

impl NetObj for ClientSocket {
    fn attach(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let registration = Registration {
            registry: registry.try_clone()?,
            token,
        };
        if let Some(stream) = inner.stream.as_mut() {
            let interest = if inner.state == SocketState::Connecting {
                CONNECTING_INTEREST
            } else {
                Interest::READABLE
            };
            registration.registry.register(stream, token, interest)?;
        }
        inner.registration = Some(registration);
        Ok(())
    }

    fn detach(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let (Some(reg), Some(stream)) = (inner.registration.as_ref(), inner.stream.as_mut()) {
            if let Err(e) = reg.registry.deregister(stream) {
                debug!("deregister on detach failed: {}", e);
            }
        }
        inner.registration = None;
    }

    fn on_event(&self, event: &NetEvent) {
        if event.is_writable() || event.is_error() {
            self.handle_connect_progress();
        }
        if event.is_readable() {
            self.handle_readable();
        }
        if event.is_read_closed() {
            self.notify_closed(None);
        }
    }
}

fn no_addresses_err() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "host resolved to no usable address",
    )
}

fn set_blocking(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_nonblocking(false)
}

fn set_nonblocking(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_nonblocking(true)
}

/// Writes the whole buffer, tracking partial progress through `sent` so the
/// caller can tell a failure at byte zero from one mid-buffer.
fn send_all(stream: &mut TcpStream, buf: &[u8], sent: &mut usize) -> io::Result<()> {
    while *sent < buf.len() {
        match stream.write(&buf[*sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                ))
            }
            Ok(n) => *sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// One non-blocking read into the current decode stage.
fn read_stage(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> StageResult {
    match stream.read(decoder.pending_mut()) {
        Ok(0) => StageResult::Eof,
        Ok(n) => {
            decoder.advance(n);
            StageResult::Progress
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => StageResult::WouldBlock,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => StageResult::Progress,
        Err(e) => StageResult::Failed(e),
    }
}
