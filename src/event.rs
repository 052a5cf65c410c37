use mio::{event::Event, Token};
use std::fmt;

/// Readiness snapshot handed to a network object, abstracting away the
/// demultiplexer's own event type.
pub struct NetEvent {
    token: Token,
    is_readable: bool,
    is_writable: bool,
    is_read_closed: bool,
    is_error: bool,
}

impl fmt::Debug for NetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetEvent")
            .field("token", &self.token)
            .field("is_readable", &self.is_readable)
            .field("is_writable", &self.is_writable)
            .field("is_read_closed", &self.is_read_closed)
            .field("is_error", &self.is_error)
            .finish()
    }
}

impl NetEvent {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.is_readable
    }

    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn is_read_closed(&self) -> bool {
        self.is_read_closed
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

impl From<&Event> for NetEvent {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            is_readable: event.is_readable(),
            is_writable: event.is_writable(),
            is_read_closed: event.is_read_closed(),
            is_error: event.is_error(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a synthetic event for unit tests that drive `on_event` by hand.
    pub(crate) fn synthetic(
        token: Token,
        readable: bool,
        writable: bool,
        read_closed: bool,
    ) -> NetEvent {
        NetEvent {
            token,
            is_readable: readable,
            is_writable: writable,
            is_read_closed: read_closed,
            is_error: false,
        }
    }

    #[test]
    fn test_debug_contains_token() {
        let event = synthetic(Token(7), true, false, false);
        let text = format!("{:?}", event);
        assert!(text.contains("7"), "debug output should show the token: {}", text);
    }
}
