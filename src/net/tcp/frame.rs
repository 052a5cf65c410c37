use crate::error::{Error, Result};

/// Width of the big-endian length prefix.
pub const PREFIX_LEN: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Encodes the length prefix for a payload of `payload_len` bytes.
pub fn encode_prefix(payload_len: usize) -> Result<[u8; PREFIX_LEN]> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::BufferTooBig);
    }
    Ok((payload_len as u16).to_be_bytes())
}

/// Incremental decoder for length-prefixed frames.
///
/// Readiness-driven callers read into [`pending_mut`](Self::pending_mut)
/// and report progress with [`advance`](Self::advance); once the frame is
/// whole, [`take_payload`](Self::take_payload) hands the payload out and
/// resets the accumulator. Partial progress is preserved between readiness
/// notifications. The accumulator never grows past
/// `PREFIX_LEN + MAX_PAYLOAD_LEN` bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    filled: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the full 2-byte prefix has arrived.
    pub fn prefix_complete(&self) -> bool {
        self.filled >= PREFIX_LEN
    }

    /// The decoded prefix value, once the prefix is complete.
    pub fn payload_len(&self) -> Option<usize> {
        if self.prefix_complete() {
            Some(u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize)
        } else {
            None
        }
    }

    /// Whether prefix and payload have both fully arrived.
    pub fn frame_complete(&self) -> bool {
        match self.payload_len() {
            Some(len) => self.filled == PREFIX_LEN + len,
            None => false,
        }
    }

    /// The unfilled remainder of the current stage: the prefix while it is
    /// incomplete, the payload afterwards. Empty once the frame is whole.
    pub fn pending_mut(&mut self) -> &mut [u8] {
        let want = match self.payload_len() {
            Some(len) => PREFIX_LEN + len,
            None => PREFIX_LEN,
        };
        if self.buf.len() != want {
            self.buf.resize(want, 0);
        }
        &mut self.buf[self.filled..]
    }

    /// Records `n` newly filled bytes.
    pub fn advance(&mut self, n: usize) {
        self.filled += n;
        debug_assert!(self.filled <= self.buf.len());
    }

    /// Takes the completed payload and resets the accumulator, or returns
    /// `None` while the frame is still partial. A zero-length frame yields
    /// an empty payload; the caller elides the delivery.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        if !self.frame_complete() {
            return None;
        }
        // Swap the whole buffer out so capacity returns to its default
        // after a large frame.
        let mut frame = std::mem::take(&mut self.buf);
        self.filled = 0;
        frame.drain(..PREFIX_LEN);
        Some(frame)
    }
}
