use crate::constants::{BYTES_TO_READ_ON_NETWORK, READ_BUFFER_PREALLOC, WRITE_BUFFER_PREALLOC};
use crate::core_reply::{read_ftp_reply, RawReply, Reply};

/// Accumulates bytes read from the control socket.
///
/// Replies are parsed from the front (`offset`), consumed bytes are dropped
/// when the buffer is compacted before it has to grow.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadBuffer {
    bytes: Vec<u8>,
    offset: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        if self.bytes.capacity() - self.bytes.len() < data.len() {
            if self.offset > 0 {
                self.bytes.drain(..self.offset);
                self.offset = 0;
            }
            let missing = data.len().saturating_sub(self.bytes.capacity() - self.bytes.len());
            if missing > 0 {
                self.bytes
                    .reserve(missing.max(BYTES_TO_READ_ON_NETWORK) + READ_BUFFER_PREALLOC);
            }
        }
        self.bytes.extend_from_slice(data);
    }

    /// Next complete reply, if any, without consuming it.
    pub fn peek_reply(&self) -> Option<RawReply<'_>> {
        read_ftp_reply(self.unread())
    }

    /// Takes the next complete reply off the buffer.
    pub fn take_reply(&mut self) -> Option<Reply> {
        let (reply, len) = {
            let raw = self.peek_reply()?;
            (raw.to_reply(), raw.len())
        };
        self.skip(len);
        Some(reply)
    }

    pub fn skip(&mut self, count: usize) {
        self.offset = (self.offset + count).min(self.bytes.len());
        if self.offset == self.bytes.len() {
            self.bytes.clear();
            self.offset = 0;
        }
    }

    pub fn unread(&self) -> &[u8] {
        &self.bytes[self.offset..]
    }

    pub fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.offset = 0;
    }
}

/// Bytes handed to the socket but not yet written.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
    offset: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        if self.offset > 0 && self.bytes.capacity() - self.bytes.len() < data.len() {
            self.bytes.drain(..self.offset);
            self.offset = 0;
        }
        if self.bytes.capacity() - self.bytes.len() < data.len() {
            self.bytes.reserve(data.len() + WRITE_BUFFER_PREALLOC);
        }
        self.bytes.extend_from_slice(data);
    }

    pub fn pending(&self) -> &[u8] {
        &self.bytes[self.offset..]
    }

    /// Marks `count` bytes as written. Returns true when nothing is left.
    pub fn consume(&mut self, count: usize) -> bool {
        self.offset = (self.offset + count).min(self.bytes.len());
        if self.offset == self.bytes.len() {
            self.bytes.clear();
            self.offset = 0;
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.offset = 0;
    }
}
