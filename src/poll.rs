use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};

/// Token reserved for a worker's interrupt waker.
pub const WAKE_TOKEN: Token = Token(0);

/// Owns one demultiplexer instance together with its interrupt waker.
///
/// The poller moves onto the worker's thread; the waker is shared so that
/// outside threads can interrupt a blocking wait.
pub struct Poller {
    poll: Poll,
    waker: Arc<Waker>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self { poll, waker })
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// An independent handle onto the demultiplexer's registry, usable from
    /// any thread.
    pub fn registry(&self) -> io::Result<Registry> {
        self.poll.registry().try_clone()
    }

    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }
}
