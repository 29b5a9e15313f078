use crate::constants::{DEFAULT_CACHE_MAX_SIZE, DEFAULT_LOG_MAX_SIZE_KB, ESC_POLL_INTERVAL};
use crate::core_cache::ListingCache;
use crate::core_connection::establish::ConnectSubState;
use crate::core_connection::error::EngineError;
use crate::core_connection::ui::{NoUserInterface, UserInterface};
use crate::core_keepalive::KeepAliveState;
use crate::core_log::{LogId, LogSink, SessionLogs};
use crate::core_network::{Connector, ControlSocket, SocketEvent, SocketIo, TcpConnector};
use crate::core_tls::tls_connection::PeerCertificates;
use crate::core_tls::TlsConnection;
use crate::session::{ConnectionParams, SessionState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};

/// Collaborators shared by every connection of a process.
#[derive(Clone)]
pub struct EngineContext {
    pub log: Arc<dyn LogSink>,
    pub ui: Arc<dyn UserInterface>,
    pub connector: Arc<dyn Connector>,
    pub tls: Option<Arc<TlsConnection>>,
    pub cache: ListingCache,
}

impl EngineContext {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            log: Arc::new(SessionLogs::new(DEFAULT_LOG_MAX_SIZE_KB * 1024)),
            ui: Arc::new(NoUserInterface),
            connector,
            tls: None,
            cache: ListingCache::new(DEFAULT_CACHE_MAX_SIZE),
        }
    }

    pub fn tcp(connect_timeout: Duration) -> Self {
        Self::new(Arc::new(TcpConnector::new(connect_timeout)))
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UserInterface>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_tls(mut self, tls: Arc<TlsConnection>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_cache(mut self, cache: ListingCache) -> Self {
        self.cache = cache;
        self
    }
}

/// Mutable part of a connection, behind one mutex.
#[derive(Debug)]
pub struct ConnState {
    pub socket: Option<ControlSocket>,
    pub params: ConnectionParams,
    pub session: SessionState,
    pub keep_alive: KeepAliveState,
    /// Sub-states visited by the last connect attempt.
    pub connect_history: Vec<ConnectSubState>,
}

pub(crate) struct ConnectionInner {
    state: Mutex<ConnState>,
    pub(crate) keep_alive_done: Notify,
    pub(crate) command_guard: tokio::sync::Mutex<()>,
    pub(crate) ctx: EngineContext,
}

/// One FTP control connection.
///
/// Cheap to clone; clones share the same connection. At most one command
/// runs on it at a time (`EngineError::Busy` otherwise).
#[derive(Clone)]
pub struct ControlConnection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl ControlConnection {
    pub fn new(params: ConnectionParams, ctx: EngineContext) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                state: Mutex::new(ConnState {
                    socket: None,
                    params,
                    session: SessionState::default(),
                    keep_alive: KeepAliveState::default(),
                    connect_history: Vec::new(),
                }),
                keep_alive_done: Notify::new(),
                command_guard: tokio::sync::Mutex::new(()),
                ctx,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub fn ctx(&self) -> &EngineContext {
        &self.inner.ctx
    }

    pub fn params(&self) -> ConnectionParams {
        self.lock().params.clone()
    }

    pub fn set_params(&self, params: ConnectionParams) {
        self.lock().params = params;
    }

    pub fn session(&self) -> SessionState {
        self.lock().session.clone()
    }

    pub fn connect_history(&self) -> Vec<ConnectSubState> {
        self.lock().connect_history.clone()
    }

    pub fn is_same(&self, other: &ControlConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_connected(&self) -> bool {
        self.lock()
            .socket
            .as_ref()
            .is_some_and(|socket| !socket.is_closed())
    }

    /// True when the control connection runs over TLS.
    pub fn is_encrypted(&self) -> bool {
        self.lock()
            .socket
            .as_ref()
            .is_some_and(|socket| socket.is_encrypted())
    }

    /// Certificate chain the server presented in the TLS handshake.
    pub fn peer_certificates(&self) -> Option<PeerCertificates> {
        self.lock()
            .socket
            .as_ref()
            .and_then(|socket| socket.peer_certificates())
    }

    pub fn log_id(&self) -> LogId {
        self.lock().session.log_id
    }

    /// Appends `text` to this connection's session log.
    pub fn log_message(&self, text: &str) -> bool {
        let log_id = self.log_id();
        self.inner.ctx.log.log_message(log_id, text, true)
    }

    pub(crate) fn socket_io(&self) -> Result<SocketIo, EngineError> {
        self.lock()
            .socket
            .as_ref()
            .map(|socket| socket.io().clone())
            .ok_or(EngineError::NotConnected)
    }

    /// Closes the control socket if there is one. Safe to call twice.
    pub fn close_socket(&self) {
        let (socket, log_id) = {
            let mut state = self.lock();
            (state.socket.take(), state.session.log_id)
        };
        if let Some(socket) = socket {
            socket.close();
            self.inner.ctx.log.set_connected(log_id, false);
        }
    }

    /// Waits for the next socket event, a timeout or (with `watch_esc`) ESC.
    /// A zero timeout only looks at the queue.
    pub(crate) async fn wait_for_event(
        &self,
        io: &SocketIo,
        timeout: Duration,
        watch_esc: bool,
    ) -> SocketEvent {
        if let Some(event) = io.pop_event() {
            return event;
        }
        if timeout.is_zero() {
            return SocketEvent::Timeout;
        }
        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                biased;
                event = io.next_event() => return event,
                _ = sleep_until(deadline) => return SocketEvent::Timeout,
                _ = sleep(ESC_POLL_INTERVAL), if watch_esc => {
                    if self.inner.ctx.ui.cancel_requested() {
                        return SocketEvent::Esc;
                    }
                }
            }
        }
    }
}

/// Locks two different connections, always in the same (address) order.
pub(crate) fn lock_pair<'a>(
    a: &'a ControlConnection,
    b: &'a ControlConnection,
) -> (MutexGuard<'a, ConnState>, MutexGuard<'a, ConnState>) {
    if Arc::as_ptr(&a.inner) < Arc::as_ptr(&b.inner) {
        let first = a.lock();
        let second = b.lock();
        (first, second)
    } else {
        let second = b.lock();
        let first = a.lock();
        (first, second)
    }
}
