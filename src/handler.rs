use std::io;

use mio::{Registry, Token};

use crate::event::NetEvent;

/// A participant in a worker's demultiplexing loop.
///
/// An implementor owns exactly one readiness source. The worker an object
/// is placed on calls `attach` from its own thread when the object is
/// added, `detach` when it is removed, and `on_event` whenever the source
/// reports readiness. The object must stay alive while registered; the
/// worker guarantees this by holding a strong reference, plus a transient
/// stack reference across each `on_event` invocation.
/// Where a network object is registered: an independent handle onto the
/// owning worker's demultiplexer registry plus the assigned token. Kept by
/// the object so it can re-arm itself (listener accept) or swap its source
/// under the same token (connect candidate iteration).
pub(crate) struct Registration {
    pub registry: Registry,
    pub token: Token,
}

pub trait NetObj: Send + Sync {
    /// Registers the object's readiness source with the demultiplexer under
    /// `token`, remembering the registration point so the object can
    /// re-arm or re-register itself later.
    fn attach(&self, registry: &Registry, token: Token) -> io::Result<()>;

    /// Deregisters the readiness source. A no-op once the object is closed.
    fn detach(&self);

    /// Called when the object's source has pending readiness. User
    /// callbacks triggered from here must be invoked with no lock held.
    fn on_event(&self, event: &NetEvent);
}
