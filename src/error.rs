use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the library.
///
/// Failures below the library's own taxonomy (resolution, bind, connect,
/// send, recv) are passed through unchanged as `Io` so callers can
/// distinguish, say, connection-refused from host-unreachable.
#[derive(Debug)]
pub enum Error {
    /// The payload is longer than the 16-bit frame prefix can describe.
    BufferTooBig,
    /// A previous send left a partial frame on the wire. The peer's framer
    /// is permanently out of phase, so every further send fails with this.
    DataStreamCorrupted,
    IllegalArgument,
    NotInitialized,
    SocketNotFound,
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferTooBig => write!(f, "buffer exceeds the maximum frame payload"),
            Error::DataStreamCorrupted => write!(f, "data stream corrupted by a partial send"),
            Error::IllegalArgument => write!(f, "illegal argument"),
            Error::NotInitialized => write!(f, "library is not started"),
            Error::SocketNotFound => write!(f, "no socket for the given handle"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
