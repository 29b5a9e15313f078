use crate::config::KeepAliveCommand;
use crate::constants::{ESC_POLL_INTERVAL, NLST_CMD_TEXT};
use crate::core_connection::connection::{ConnectionInner, ControlConnection};
use crate::core_connection::error::{CommandFailure, FailureDetail, FailureKind};
use crate::core_network::pasv::{drain_data_connection, open_pasv_connection, parse_pasv_reply};
use crate::core_network::port::{accept_port_connection, setup_port_listener};
use crate::core_network::{SocketEvent, SocketIo};
use crate::core_reply::Reply;
use log::{debug, info, trace, warn};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Where the idle-time keep-alive engine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepAliveMode {
    /// A foreground command owns the connection.
    #[default]
    Forbidden,
    /// Idle, no timer armed (keep-alive stopped or failed).
    None,
    WaitingForTimer,
    /// The keep-alive command is on the wire.
    Processing,
    /// Processing, and a foreground command waits for it to finish.
    WaitingForEndOfProcessing,
}

#[derive(Debug)]
pub struct KeepAliveState {
    pub mode: KeepAliveMode,
    /// When the current idle period began.
    pub started_at: Instant,
    pub commands_sent: u32,
    timer: Option<JoinHandle<()>>,
    finished: bool,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self {
            mode: KeepAliveMode::Forbidden,
            started_at: Instant::now(),
            commands_sent: 0,
            timer: None,
            finished: false,
        }
    }
}

impl KeepAliveState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

enum EndOfKeepAlive {
    Finished,
    Timeout,
    Cancelled,
}

impl ControlConnection {
    pub fn keep_alive_mode(&self) -> KeepAliveMode {
        self.lock().keep_alive.mode
    }

    /// Number of keep-alive commands sent on this connection.
    pub fn keep_alive_commands_sent(&self) -> u32 {
        self.lock().keep_alive.commands_sent
    }

    /// Takes the connection away from the keep-alive engine before a
    /// foreground command: cancels an armed timer, or waits until the
    /// keep-alive command on the wire has its reply.
    pub(crate) async fn wait_for_end_of_keep_alive(&self) -> Result<(), CommandFailure> {
        let timeout = {
            let mut state = self.lock();
            if !state.params.keep_alive.enabled {
                state.keep_alive.mode = KeepAliveMode::Forbidden;
                return Ok(());
            }
            let mode = state.keep_alive.mode;
            match mode {
                KeepAliveMode::Processing | KeepAliveMode::WaitingForEndOfProcessing => {
                    state.keep_alive.mode = KeepAliveMode::WaitingForEndOfProcessing;
                    state.params.server_timeout
                }
                KeepAliveMode::WaitingForTimer => {
                    state.keep_alive.cancel_timer();
                    state.keep_alive.mode = KeepAliveMode::Forbidden;
                    return Ok(());
                }
                KeepAliveMode::None | KeepAliveMode::Forbidden => {
                    state.keep_alive.mode = KeepAliveMode::Forbidden;
                    return Ok(());
                }
            }
        };

        let ui = &self.inner.ctx.ui;
        ui.show_wait("Waiting for the keep-alive command to finish...");
        let end = self.wait_for_keep_alive_finish(timeout).await;
        ui.hide_wait();

        let result = match end {
            EndOfKeepAlive::Finished => Ok(()),
            EndOfKeepAlive::Cancelled => {
                self.release_keep_alive();
                self.close_socket();
                self.log_message("Connection closed while waiting for the keep-alive command.\r\n");
                Err(CommandFailure::NonRetryableFatal(
                    FailureDetail::new(
                        FailureKind::UserCancelled,
                        "interrupted by user",
                    )
                    .closed(),
                ))
            }
            EndOfKeepAlive::Timeout => {
                self.log_message("Timeout while waiting for the keep-alive command.\r\n");
                self.release_keep_alive();
                self.close_socket();
                Err(CommandFailure::RetryableFatal(
                    FailureDetail::new(
                        FailureKind::Transport,
                        "keep-alive command timed out",
                    )
                    .closed(),
                ))
            }
        };
        self.lock().keep_alive.mode = KeepAliveMode::Forbidden;
        result
    }

    async fn wait_for_keep_alive_finish(&self, timeout: Duration) -> EndOfKeepAlive {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.keep_alive_done.notified();
            if self.lock().keep_alive.finished {
                return EndOfKeepAlive::Finished;
            }
            tokio::select! {
                biased;
                _ = notified => {}
                _ = sleep_until(deadline) => return EndOfKeepAlive::Timeout,
                _ = tokio::time::sleep(ESC_POLL_INTERVAL) => {
                    let ui = &self.inner.ctx.ui;
                    if ui.cancel_requested() && ui.confirm_cancel(false) {
                        return EndOfKeepAlive::Cancelled;
                    }
                }
            }
        }
    }

    /// Arms the keep-alive timer after a foreground command. With
    /// `immediate` the first keep-alive command goes out right away.
    pub(crate) fn setup_keep_alive_timer(&self, immediate: bool) {
        let mut state = self.lock();
        let connected = state.socket.as_ref().is_some_and(|s| !s.is_closed());
        if !state.params.keep_alive.enabled
            || state.keep_alive.mode != KeepAliveMode::Forbidden
            || !connected
        {
            return;
        }
        let now = Instant::now();
        let deadline = if immediate {
            now
        } else {
            now + state.params.keep_alive.send_every
        };
        state.keep_alive.mode = KeepAliveMode::WaitingForTimer;
        state.keep_alive.started_at = now;
        state.keep_alive.cancel_timer();
        state.keep_alive.timer = Some(tokio::spawn(keep_alive_timer(self.downgrade(), deadline)));
        trace!("Keep-alive timer armed in {:?}", deadline - now);
    }

    /// Called once a keep-alive command got its reply.
    fn setup_next_keep_alive_timer(&self) {
        let mut state = self.lock();
        let mode = state.keep_alive.mode;
        match mode {
            KeepAliveMode::Processing => {
                state.keep_alive.finished = true;
                let send_every = state.params.keep_alive.send_every;
                let now = Instant::now();
                let idle_after_next = now + send_every - state.keep_alive.started_at;
                if idle_after_next < state.params.keep_alive.stop_after {
                    let deadline = now + send_every;
                    state.keep_alive.mode = KeepAliveMode::WaitingForTimer;
                    state.keep_alive.timer =
                        Some(tokio::spawn(keep_alive_timer(self.downgrade(), deadline)));
                } else {
                    state.keep_alive.mode = KeepAliveMode::None;
                    drop(state);
                    info!("Keep-alive stopped after the configured idle time");
                    self.log_message("Keep-alive stopped.\r\n");
                    return;
                }
            }
            KeepAliveMode::WaitingForEndOfProcessing => {
                state.keep_alive.finished = true;
            }
            _ => {}
        }
        drop(state);
        self.inner.keep_alive_done.notify_one();
    }

    /// Stops keep-alive until the next foreground command re-arms it.
    pub(crate) fn release_keep_alive(&self) {
        {
            let mut state = self.lock();
            let mode = state.keep_alive.mode;
            match mode {
                KeepAliveMode::Processing | KeepAliveMode::WaitingForEndOfProcessing => {
                    state.keep_alive.finished = true;
                }
                KeepAliveMode::WaitingForTimer => state.keep_alive.cancel_timer(),
                KeepAliveMode::None | KeepAliveMode::Forbidden => {}
            }
            state.keep_alive.mode = KeepAliveMode::None;
        }
        self.inner.keep_alive_done.notify_one();
    }

    async fn receive_keep_alive_timer(&self) {
        let job = {
            let mut state = self.lock();
            if !state.params.keep_alive.enabled
                || state.keep_alive.mode != KeepAliveMode::WaitingForTimer
            {
                return;
            }
            // this task is the timer, nothing to abort
            state.keep_alive.timer = None;
            let socket = state
                .socket
                .as_ref()
                .filter(|s| !s.is_closed())
                .map(|s| (s.io().clone(), s.local_addr().map(|a| a.ip())));
            match socket {
                Some((io, local_ip)) => {
                    state.keep_alive.mode = KeepAliveMode::Processing;
                    state.keep_alive.finished = false;
                    state.keep_alive.commands_sent += 1;
                    Some(KeepAliveJob {
                        io,
                        command: state.params.keep_alive.command,
                        list_command: state.params.list_command_text().to_string(),
                        passive: state.params.passive_mode,
                        local_ip,
                        timeout: state.params.server_timeout,
                    })
                }
                None => None,
            }
        };
        let Some(job) = job else {
            self.release_keep_alive();
            return;
        };
        match self.run_keep_alive_job(&job).await {
            Ok(()) => self.setup_next_keep_alive_timer(),
            Err(e) => {
                debug!("Keep-alive failed: {}", e);
                self.release_keep_alive();
            }
        }
    }

    async fn run_keep_alive_job(&self, job: &KeepAliveJob) -> Result<(), CommandFailure> {
        while let Some(reply) = job.io.take_reply() {
            self.log_message(&reply.text);
        }
        match job.command {
            KeepAliveCommand::Noop => self.keep_alive_exchange(job, "NOOP").await.map(drop),
            KeepAliveCommand::Pwd => self.keep_alive_exchange(job, "PWD").await.map(drop),
            KeepAliveCommand::Nlst | KeepAliveCommand::List => {
                let list = if job.command == KeepAliveCommand::Nlst {
                    NLST_CMD_TEXT
                } else {
                    job.list_command.as_str()
                };
                if job.passive {
                    self.keep_alive_passive_listing(job, list).await
                } else {
                    self.keep_alive_active_listing(job, list).await
                }
            }
        }
    }

    async fn keep_alive_passive_listing(
        &self,
        job: &KeepAliveJob,
        list: &str,
    ) -> Result<(), CommandFailure> {
        let reply = self.keep_alive_exchange(job, "PASV").await?;
        let Some(addr) = (reply.code == 227)
            .then(|| parse_pasv_reply(&reply.text))
            .flatten()
        else {
            debug!("Keep-alive: no usable PASV reply, listing skipped");
            return Ok(());
        };
        let data = match tokio::time::timeout(job.timeout, open_pasv_connection(addr)).await {
            Ok(Ok(stream)) => stream,
            _ => {
                warn!("Keep-alive: cannot open data connection to {}", addr);
                return Ok(());
            }
        };
        let drain = tokio::spawn(drain_data_connection(data));
        let result = self.keep_alive_exchange(job, list).await;
        finish_drain(drain, job.timeout).await;
        result.map(drop)
    }

    async fn keep_alive_active_listing(
        &self,
        job: &KeepAliveJob,
        list: &str,
    ) -> Result<(), CommandFailure> {
        let Some(local_ip) = job.local_ip else {
            return self.keep_alive_exchange(job, "NOOP").await.map(drop);
        };
        let (listener, port_cmd) = match setup_port_listener(local_ip).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Keep-alive: cannot listen for a data connection: {}", e);
                return Ok(());
            }
        };
        let reply = self.keep_alive_exchange(job, port_cmd.trim_end()).await?;
        if !reply.is_success() {
            return Ok(());
        }
        let timeout = job.timeout;
        let drain = tokio::spawn(async move {
            let stream = tokio::time::timeout(timeout, accept_port_connection(listener))
                .await
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
            drain_data_connection(stream).await
        });
        let result = self.keep_alive_exchange(job, list).await;
        finish_drain(drain, job.timeout).await;
        result.map(drop)
    }

    /// Writes one command and reads replies up to the first non-1xx one.
    async fn keep_alive_exchange(
        &self,
        job: &KeepAliveJob,
        command: &str,
    ) -> Result<Reply, CommandFailure> {
        self.log_message(&format!("{}\r\n", command));
        job.io.write(format!("{}\r\n", command).as_bytes())?;
        loop {
            while let Some(reply) = job.io.take_reply() {
                self.log_message(&reply.text);
                if !reply.is_preliminary() {
                    return Ok(reply);
                }
            }
            match self.wait_for_event(&job.io, job.timeout, false).await {
                SocketEvent::Closed { error } => {
                    // the next foreground command must see the close too
                    job.io.repost(SocketEvent::Closed { error });
                    return Err(CommandFailure::retryable(
                        FailureKind::Transport,
                        "connection closed during keep-alive",
                    ));
                }
                SocketEvent::Timeout => {
                    warn!("No reply to keep-alive {} within {:?}", command, job.timeout);
                    self.log_message("Keep-alive command timed out.\r\n");
                    self.close_socket();
                    self.release_keep_alive();
                    return Err(CommandFailure::retryable(
                        FailureKind::Transport,
                        "keep-alive reply timed out",
                    ));
                }
                _ => {}
            }
        }
    }
}

struct KeepAliveJob {
    io: SocketIo,
    command: KeepAliveCommand,
    list_command: String,
    passive: bool,
    local_ip: Option<std::net::IpAddr>,
    timeout: Duration,
}

async fn finish_drain(drain: JoinHandle<std::io::Result<u64>>, timeout: Duration) {
    match tokio::time::timeout(timeout, drain).await {
        Ok(Ok(Ok(bytes))) => trace!("Keep-alive listing: {} bytes discarded", bytes),
        Ok(Ok(Err(e))) => debug!("Keep-alive data connection: {}", e),
        Ok(Err(e)) => debug!("Keep-alive data task: {}", e),
        Err(_) => debug!("Keep-alive data connection timed out"),
    }
}

async fn keep_alive_timer(conn: Weak<ConnectionInner>, deadline: Instant) {
    sleep_until(deadline).await;
    if let Some(inner) = conn.upgrade() {
        ControlConnection::from_inner(inner)
            .receive_keep_alive_timer()
            .await;
    }
}
