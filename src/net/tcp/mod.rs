//! Framed TCP socket objects.
//!
//! A server socket surfaces pending connections through its callbacks and
//! hands accepted streams over as client sockets; a client socket carries
//! the length-prefixed framing on top of the stream. Both register with
//! the worker pool as network objects.

mod client;
pub mod frame;
mod server;
pub mod traits;

pub(crate) use client::ClientSocket;
pub(crate) use server::ServerSocket;
