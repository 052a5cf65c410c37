use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::event::NetEvent;
use crate::handler::{NetObj, Registration};
use crate::net::tcp::traits::{ServerHandle, ServerHandler};

/// A bound, listening TCP socket.
///
/// Emits a *connection pending* callback when the accept queue is
/// non-empty; the user drives the actual accept. Callbacks run with the
/// internal lock released.
pub struct ServerSocket {
    handle: ServerHandle,
    handler: Arc<dyn ServerHandler>,
    inner: Mutex<ServerInner>,
}

struct ServerInner {
    listener: Option<TcpListener>,
    registration: Option<Registration>,
    closed_notified: bool,
}

impl ServerSocket {
    /// Binds and listens on a numeric address with the caller's backlog.
    /// Name resolution is deliberately disabled for listeners; anything but
    /// a literal IPv4/IPv6 address is an illegal argument.
    pub fn create(
        ip_addr: &str,
        port: u16,
        backlog: i32,
        handler: Arc<dyn ServerHandler>,
    ) -> Result<Arc<Self>> {
        let ip: IpAddr = ip_addr.parse().map_err(|_| Error::IllegalArgument)?;
        let addr = SocketAddr::new(ip, port);
        let listener = bind_listener(addr, backlog).map_err(Error::Io)?;

        Ok(Arc::new(Self {
            handle: ServerHandle::next(),
            handler,
            inner: Mutex::new(ServerInner {
                listener: Some(listener),
                registration: None,
                closed_notified: false,
            }),
        }))
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle
    }

    /// Accepts one pending connection, returning the non-blocking stream
    /// and the peer's address. With nothing pending the platform
    /// would-block error comes back unchanged.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let listener = match inner.listener.as_mut() {
            Some(listener) => listener,
            None => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "server socket is closed",
                )))
            }
        };

        let (stream, peer_addr) = listener.accept().map_err(Error::Io)?;

        // The edge-triggered listener will not re-signal for connections
        // that were already queued; re-arm it.
        if let Some(reg) = inner.registration.as_ref() {
            if let Err(e) = reg.registry.reregister(listener, reg.token, Interest::READABLE) {
                warn!("could not re-arm listener: {}", e);
            }
        }

        Ok((stream, peer_addr))
    }

    /// Releases the listening socket. Idempotent; later readiness is a
    /// no-op.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(mut listener) = inner.listener.take() {
            if let Some(reg) = inner.registration.as_ref() {
                let _ = reg.registry.deregister(&mut listener);
            }
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(TcpListener::from_std(socket.into()))
}

impl NetObj for ServerSocket {
    fn attach(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let registration = Registration {
            registry: registry.try_clone()?,
            token,
        };
        if let Some(listener) = inner.listener.as_mut() {
            registration.registry.register(listener, token, Interest::READABLE)?;
        }
        inner.registration = Some(registration);
        Ok(())
    }

    fn detach(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let (Some(reg), Some(listener)) = (inner.registration.as_ref(), inner.listener.as_mut())
        {
            if let Err(e) = reg.registry.deregister(listener) {
                debug!("deregister on detach failed: {}", e);
            }
        }
        inner.registration = None;
    }

    fn on_event(&self, event: &NetEvent) {
        if event.is_readable() {
            {
                let inner = self.inner.lock().unwrap();
                if inner.listener.is_none() {
                    // socket closed
                    return;
                }
            }
            self.handler.on_connection_pending(self.handle);
        }

        if event.is_read_closed() || event.is_error() {
            let deliver = {
                let mut inner = self.inner.lock().unwrap();
                if inner.listener.is_none() || inner.closed_notified {
                    false
                } else {
                    inner.closed_notified = true;
                    true
                }
            };
            if deliver {
                self.handler.on_closed(self.handle, None);
            }
        }
    }
}
