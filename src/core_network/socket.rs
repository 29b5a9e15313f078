use crate::constants::{BYTES_TO_READ_ON_NETWORK, EVENT_QUEUE_CAPACITY};
use crate::core_connection::error::EngineError;
use crate::core_network::buffers::{ReadBuffer, WriteBuffer};
use crate::core_network::events::{EventQueue, SocketEvent};
use crate::core_network::stream::BoxedStream;
use crate::core_reply::Reply;
use crate::core_tls::tls_connection::PeerCertificates;
use log::{debug, error, trace};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};

/// Mutable data shared between the dispatch task and the connection owner.
#[derive(Debug)]
pub struct SocketState {
    pub read_buf: ReadBuffer,
    pub write_buf: WriteBuffer,
    pub events: EventQueue,
    pub closed: bool,
}

#[derive(Debug)]
struct SocketShared {
    state: Mutex<SocketState>,
    notify: Notify,
}

impl SocketShared {
    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, event: SocketEvent, rewritable: bool) {
        {
            let mut state = self.lock();
            if let Err(e) = state.events.add_event(event, rewritable) {
                error!("Control socket: {} ({:?} dropped)", e, event);
            }
        }
        self.notify.notify_one();
    }

    fn bytes_read(&self, data: &[u8]) {
        {
            let mut state = self.lock();
            state.read_buf.append(data);
            if let Err(e) = state
                .events
                .add_event(SocketEvent::NewBytesRead { error: None }, true)
            {
                error!("Control socket: {}", e);
            }
        }
        self.notify.notify_one();
    }

    fn mark_closed(&self, error: Option<io::ErrorKind>) {
        let already_closed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.closed, true)
        };
        if !already_closed {
            self.post(SocketEvent::Closed { error }, false);
        }
    }
}

enum PumpCommand {
    Flush,
    Urgent {
        in_band: Vec<u8>,
        urgent: Vec<u8>,
        done: oneshot::Sender<io::Result<usize>>,
    },
    Detach(oneshot::Sender<BoxedStream>),
    Shutdown,
}

/// Cloneable handle on the socket's buffers and dispatch task.
///
/// Waits run on a clone so the connection state does not stay locked while
/// a command waits for its reply.
#[derive(Debug, Clone)]
pub struct SocketIo {
    shared: Arc<SocketShared>,
    commands: mpsc::UnboundedSender<PumpCommand>,
}

impl SocketIo {
    pub fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.shared.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Queues `bytes` for writing. `WriteDone` is posted once they are out.
    pub fn write(&self, bytes: &[u8]) -> Result<(), EngineError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(EngineError::NotConnected);
            }
            state.write_buf.append(bytes);
        }
        self.commands
            .send(PumpCommand::Flush)
            .map_err(|_| EngineError::NotConnected)
    }

    /// Writes `in_band` normally, then `urgent` as out-of-band data.
    /// Returns the number of urgent bytes sent.
    pub async fn send_urgent(&self, in_band: &[u8], urgent: &[u8]) -> io::Result<usize> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(PumpCommand::Urgent {
                in_band: in_band.to_vec(),
                urgent: urgent.to_vec(),
                done,
            })
            .map_err(|_| io::Error::from(io::ErrorKind::NotConnected))?;
        wait.await
            .map_err(|_| io::Error::from(io::ErrorKind::NotConnected))?
    }

    pub fn take_reply(&self) -> Option<Reply> {
        self.lock().read_buf.take_reply()
    }

    pub fn pop_event(&self) -> Option<SocketEvent> {
        self.lock().events.pop_event()
    }

    /// Puts an event back, for a waiter that must not swallow it (`Closed`).
    pub fn repost(&self, event: SocketEvent) {
        self.shared.post(event, false);
    }

    /// Waits until an event is queued and returns it.
    pub async fn next_event(&self) -> SocketEvent {
        loop {
            if let Some(event) = self.pop_event() {
                return event;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Closes the socket. Further writes fail with `NotConnected`.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.write_buf.clear();
        }
        if self.commands.send(PumpCommand::Shutdown).is_err() {
            trace!("Control socket dispatch task already finished");
        }
    }
}

/// The owned control socket: stream, buffers and event queue travel together.
///
/// A dispatch task owns the stream itself; it appends received bytes to the
/// read buffer, flushes the write buffer and posts events. Exactly one
/// connection holds a `ControlSocket` at a time, hand-offs move it.
#[derive(Debug)]
pub struct ControlSocket {
    io: SocketIo,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    encrypted: bool,
    peer_certificates: Option<PeerCertificates>,
}

impl ControlSocket {
    /// Starts the dispatch task for a connected stream.
    pub fn attach(stream: BoxedStream) -> Self {
        Self::attach_with(stream, ReadBuffer::new(), false, None)
    }

    pub(crate) fn attach_with(
        stream: BoxedStream,
        read_buf: ReadBuffer,
        encrypted: bool,
        peer_certificates: Option<PeerCertificates>,
    ) -> Self {
        let local_addr = stream.local_addr();
        let peer_addr = stream.peer_addr();
        let shared = Arc::new(SocketShared {
            state: Mutex::new(SocketState {
                read_buf,
                write_buf: WriteBuffer::new(),
                events: EventQueue::new(EVENT_QUEUE_CAPACITY),
                closed: false,
            }),
            notify: Notify::new(),
        });
        shared.post(SocketEvent::Connected, false);
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_pump(stream, Arc::clone(&shared), rx));
        Self {
            io: SocketIo { shared, commands },
            local_addr,
            peer_addr,
            encrypted,
            peer_certificates,
        }
    }

    pub fn io(&self) -> &SocketIo {
        &self.io
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }

    pub fn close(&self) {
        self.io.close()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn peer_certificates(&self) -> Option<PeerCertificates> {
        self.peer_certificates.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Stops the dispatch task and returns the stream with any unread bytes,
    /// so the stream can be wrapped (TLS) and attached again.
    pub async fn detach(self) -> Result<(BoxedStream, ReadBuffer), EngineError> {
        let (reply, wait) = oneshot::channel();
        self.io
            .commands
            .send(PumpCommand::Detach(reply))
            .map_err(|_| EngineError::NotConnected)?;
        let stream = wait.await.map_err(|_| EngineError::NotConnected)?;
        let read_buf = std::mem::take(&mut self.io.lock().read_buf);
        Ok((stream, read_buf))
    }
}

async fn run_pump(
    mut stream: BoxedStream,
    shared: Arc<SocketShared>,
    mut commands: mpsc::UnboundedReceiver<PumpCommand>,
) {
    let mut chunk = vec![0u8; BYTES_TO_READ_ON_NETWORK];
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PumpCommand::Flush) => {
                    if let Err(e) = flush_pending(&mut stream, &shared).await {
                        debug!("Control socket write failed: {}", e);
                        shared.mark_closed(Some(e.kind()));
                        return;
                    }
                }
                Some(PumpCommand::Urgent { in_band, urgent, done }) => {
                    let result = send_abort_bytes(&mut stream, &in_band, &urgent).await;
                    if done.send(result).is_err() {
                        trace!("Urgent data result not awaited");
                    }
                }
                Some(PumpCommand::Detach(reply)) => {
                    if reply.send(stream).is_err() {
                        trace!("Detached control stream dropped");
                    }
                    return;
                }
                Some(PumpCommand::Shutdown) | None => {
                    if let Err(e) = stream.shutdown().await {
                        trace!("Control socket shutdown: {}", e);
                    }
                    return;
                }
            },
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    debug!("Control socket closed by peer");
                    shared.mark_closed(None);
                    return;
                }
                Ok(n) => shared.bytes_read(&chunk[..n]),
                Err(e) => {
                    debug!("Control socket read failed: {}", e);
                    shared.mark_closed(Some(e.kind()));
                    return;
                }
            },
        }
    }
}

async fn flush_pending(stream: &mut BoxedStream, shared: &SocketShared) -> io::Result<()> {
    loop {
        let pending = {
            let state = shared.lock();
            if state.write_buf.is_empty() {
                return Ok(());
            }
            state.write_buf.pending().to_vec()
        };
        let written = stream.write(&pending).await?;
        if written == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        let drained = shared.lock().write_buf.consume(written);
        if drained {
            stream.flush().await?;
            shared.post(SocketEvent::WriteDone { error: None }, false);
        }
    }
}

async fn send_abort_bytes(
    stream: &mut BoxedStream,
    in_band: &[u8],
    urgent: &[u8],
) -> io::Result<usize> {
    stream.write_all(in_band).await?;
    stream.flush().await?;
    stream.send_urgent(urgent)
}
