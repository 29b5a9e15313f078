//! Scripted FTP servers over in-memory pipes, for the engine tests.

use crate::config::ClientConfig;
use crate::core_connection::{ControlConnection, EngineContext, NoUserInterface, UserInterface};
use crate::core_log::{LogSink, SessionLogs};
use crate::core_network::{BoxFuture, BoxedStream, Connector, ControlStream};
use crate::session::ConnectionParams;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// Client end of a scripted connection. Urgent data is recorded instead of
/// going through the pipe.
pub struct ScriptedStream {
    inner: DuplexStream,
    urgent: Arc<Mutex<Vec<u8>>>,
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl ControlStream for ScriptedStream {
    fn send_urgent(&mut self, data: &[u8]) -> io::Result<usize> {
        self.urgent.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }
}

/// Server end of a scripted connection.
pub struct FakeServer {
    stream: DuplexStream,
    pending: Vec<u8>,
    urgent: Arc<Mutex<Vec<u8>>>,
}

impl FakeServer {
    pub fn pair() -> (BoxedStream, FakeServer) {
        let (client, server) = duplex(64 * 1024);
        let urgent = Arc::new(Mutex::new(Vec::new()));
        let stream = ScriptedStream {
            inner: client,
            urgent: Arc::clone(&urgent),
        };
        (
            Box::new(stream),
            FakeServer {
                stream: server,
                pending: Vec::new(),
                urgent,
            },
        )
    }

    pub async fn send(&mut self, text: &str) {
        self.stream.write_all(text.as_bytes()).await.unwrap();
    }

    /// Next line sent by the client, raw bytes, without CRLF. `None` once
    /// the client closed the connection.
    pub async fn read_raw_line(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(pos) = self.pending.windows(2).position(|w| w == b"\r\n") {
                let line = self.pending[..pos].to_vec();
                self.pending.drain(..pos + 2);
                return Some(line);
            }
            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
            }
        }
    }

    pub async fn read_line(&mut self) -> Option<String> {
        self.read_raw_line()
            .await
            .map(|line| String::from_utf8_lossy(&line).into_owned())
    }

    pub async fn expect(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line.as_deref(), Some(expected));
    }

    /// True if the client sends anything within `wait`.
    pub async fn has_more_within(&mut self, wait: Duration) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        let mut chunk = [0u8; 1024];
        match tokio::time::timeout(wait, self.stream.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => {
                self.pending.extend_from_slice(&chunk[..n]);
                true
            }
            _ => false,
        }
    }

    pub fn urgent_bytes(&self) -> Vec<u8> {
        self.urgent.lock().unwrap().clone()
    }

    /// `220` greeting, anonymous login and `SYST`.
    pub async fn login(&mut self) {
        self.send("220 Welcome\r\n").await;
        self.expect("USER anonymous").await;
        self.send("331 Please specify the password\r\n").await;
        self.expect("PASS name@someserver.com").await;
        self.send("230 Login successful\r\n").await;
        self.expect("SYST").await;
        self.send("215 UNIX Type: L8\r\n").await;
    }

    /// Answers every command with `answer` until the client goes away,
    /// waiting `delay` before each reply. Counts commands that arrived while
    /// a reply was still due.
    pub async fn serve(
        mut self,
        delay: Duration,
        mut answer: impl FnMut(&str) -> String + Send,
    ) -> ServeReport {
        let mut report = ServeReport::default();
        while let Some(line) = self.read_line().await {
            if self.has_more_within(delay).await {
                report.overlaps += 1;
            }
            let reply = answer(&line);
            report.commands.push(line);
            self.send(&reply).await;
        }
        report
    }
}

#[derive(Debug, Default)]
pub struct ServeReport {
    pub commands: Vec<String>,
    /// Commands received before the previous one was answered.
    pub overlaps: usize,
}

/// Hands out prepared streams, one per connect, and counts the calls.
#[derive(Default)]
pub struct ScriptedConnector {
    streams: Mutex<VecDeque<BoxedStream>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stream: BoxedStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(&'a self, _host: &'a str, _port: u16) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
        })
    }
}

/// Parameters for `ftp.example.org` with short timeouts and no retry delay.
pub fn test_params() -> ConnectionParams {
    let mut config = ClientConfig::default();
    config.server.host = "ftp.example.org".to_string();
    config.timeouts.server_replies_secs = 2;
    config.timeouts.connect_retries = 2;
    config.timeouts.delay_between_retries_secs = 0;
    config.always_reconnect = true;
    let mut params = ConnectionParams::from_config(&config);
    params.keep_alive.enabled = false;
    params
}

/// A connection whose connector serves `FakeServer`s, with its session logs.
pub struct Scripted {
    pub conn: ControlConnection,
    pub connector: Arc<ScriptedConnector>,
    pub logs: Arc<SessionLogs>,
}

impl Scripted {
    pub fn new(params: ConnectionParams) -> Self {
        Self::with_ui(params, Arc::new(NoUserInterface))
    }

    pub fn with_ui(params: ConnectionParams, ui: Arc<dyn UserInterface>) -> Self {
        let connector = Arc::new(ScriptedConnector::new());
        let logs = Arc::new(SessionLogs::new(64 * 1024));
        let ctx = EngineContext::new(Arc::clone(&connector) as Arc<dyn Connector>)
            .with_log(Arc::clone(&logs) as Arc<dyn LogSink>)
            .with_ui(ui);
        Self {
            conn: ControlConnection::new(params, ctx),
            connector,
            logs,
        }
    }

    /// Another connection sharing this one's context (a worker).
    pub fn sibling(&self) -> ControlConnection {
        ControlConnection::new(self.conn.params(), self.conn.ctx().clone())
    }

    pub fn log_text(&self) -> String {
        self.logs.text(self.conn.log_id()).unwrap_or_default()
    }
}

/// Connects `conn` to a fresh `FakeServer` that runs the login script.
pub async fn logged_in(scripted: &Scripted) -> FakeServer {
    logged_in_on(&scripted.conn, &scripted.connector).await
}

pub async fn logged_in_on(conn: &ControlConnection, connector: &ScriptedConnector) -> FakeServer {
    let (client, mut server) = FakeServer::pair();
    connector.push(client);
    let login = tokio::spawn(async move {
        server.login().await;
        server
    });
    conn.start_control_connection().await.unwrap();
    login.await.unwrap()
}
