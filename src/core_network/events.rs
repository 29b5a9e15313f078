use crate::core_connection::error::EngineError;
use std::collections::VecDeque;
use std::io;

/// Socket-level event delivered to whichever state machine currently owns
/// the connection. `Timeout` and `Esc` are produced by the waits themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// The dispatch task took over a freshly connected (or upgraded) stream.
    Connected,
    /// New bytes were appended to the receive buffer.
    NewBytesRead { error: Option<io::ErrorKind> },
    /// Every pending byte reached the socket.
    WriteDone { error: Option<io::ErrorKind> },
    /// The peer closed the socket, or reading/writing failed.
    Closed { error: Option<io::ErrorKind> },
    Timeout,
    Esc,
}

/// Ordered event queue with one rewrite slot.
///
/// An event added as rewritable can be replaced in place by the next one
/// (a pending "new bytes" notice carries no information once "write done"
/// or "closed" follows it), which keeps the queue short under bursty reads.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<SocketEvent>,
    rewritable: bool,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            rewritable: false,
            capacity,
        }
    }

    /// Appends `event`, or overwrites the last one if it was rewritable.
    pub fn add_event(&mut self, event: SocketEvent, rewritable: bool) -> Result<(), EngineError> {
        if self.rewritable {
            if let Some(last) = self.events.back_mut() {
                *last = event;
                self.rewritable = rewritable;
                return Ok(());
            }
        }
        if self.events.len() >= self.capacity {
            return Err(EngineError::EventQueueOverflow);
        }
        self.events.push_back(event);
        self.rewritable = rewritable;
        Ok(())
    }

    pub fn pop_event(&mut self) -> Option<SocketEvent> {
        let event = self.events.pop_front();
        if self.events.is_empty() {
            self.rewritable = false;
        }
        event
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.rewritable = false;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
