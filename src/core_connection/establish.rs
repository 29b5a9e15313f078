use crate::constants::ESC_POLL_INTERVAL;
use crate::core_connection::connection::ControlConnection;
use crate::core_connection::error::{
    CommandFailure, EngineError, FailureDetail, FailureKind,
};
use crate::core_ftpcommand::engine::SendOptions;
use crate::core_ftpcommand::ftpcommand::{FtpCommand, PreparedCommand};
use crate::core_network::{ControlSocket, SocketEvent, SocketIo};
use crate::core_reply::Reply;
use crate::core_tls::TlsError;
use crate::session::{SessionState, TlsState};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Steps of one connect attempt, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectSubState {
    Connect,
    WaitForLoginPrompt,
    AuthTls,
    Pbsz,
    Prot,
    /// One step of the `USER`/`PASS`/`ACCT` script.
    SendNextScriptCmd,
    ModeZ,
    SendInitCommands,
    SendSystemCommand,
    Ready,
}

/// How a single connect attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Connected,
    /// Worth another attempt after the retry delay.
    Retry(String),
    Fatal(CommandFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginStep {
    User,
    Pass,
    Acct,
}

impl ControlConnection {
    fn enter(&self, sub_state: ConnectSubState) {
        debug!("Connect: {:?}", sub_state);
        self.lock().connect_history.push(sub_state);
    }

    /// Connects and logs in, retrying up to `connect_retries` times.
    pub async fn start_control_connection(&self) -> Result<(), CommandFailure> {
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        self.connect_with_retries().await
    }

    pub(crate) async fn connect_with_retries(&self) -> Result<(), CommandFailure> {
        let (retries, delay) = {
            let state = self.lock();
            (state.params.connect_retries, state.params.delay_between_retries)
        };
        let max_attempts = retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connect_attempt().await {
                AttemptOutcome::Connected => return Ok(()),
                AttemptOutcome::Fatal(e) => {
                    self.close_socket();
                    self.release_keep_alive();
                    return Err(e);
                }
                AttemptOutcome::Retry(message) => {
                    self.close_socket();
                    self.release_keep_alive();
                    if attempt >= max_attempts {
                        warn!("Giving up after {} connect attempts: {}", attempt, message);
                        return Err(CommandFailure::NonRetryableFatal(
                            FailureDetail::new(FailureKind::Transport, message).closed(),
                        ));
                    }
                    self.log_message(&format!(
                        "Waiting {} seconds before the next attempt ({} of {}).\r\n",
                        delay.as_secs(),
                        attempt + 1,
                        max_attempts
                    ));
                    self.wait_before_reconnect(delay).await?;
                }
            }
        }
    }

    /// Sleeps `delay`, ESC included.
    pub(crate) async fn wait_before_reconnect(&self, delay: Duration) -> Result<(), CommandFailure> {
        let deadline = Instant::now() + delay;
        let ui = &self.inner.ctx.ui;
        while Instant::now() < deadline {
            let step = deadline.saturating_duration_since(Instant::now()).min(ESC_POLL_INTERVAL);
            sleep(step).await;
            if ui.cancel_requested() && ui.confirm_cancel(false) {
                self.log_message("Action canceled by user.\r\n");
                return Err(CommandFailure::NonRetryableFatal(
                    FailureDetail::new(FailureKind::UserCancelled, "interrupted by user").closed(),
                ));
            }
        }
        Ok(())
    }

    /// Reconnects when the control connection is gone. Returns true if it
    /// had to.
    pub(crate) async fn reconnect_if_needed(&self) -> Result<bool, CommandFailure> {
        if self.is_connected() {
            return Ok(false);
        }
        self.close_socket();
        let (always, host) = {
            let state = self.lock();
            (state.params.always_reconnect, state.params.host.clone())
        };
        if !always
            && !self
                .inner
                .ctx
                .ui
                .confirm_reconnect(&format!("The connection to {} was lost. Reconnect?", host))
        {
            return Err(CommandFailure::fatal(
                FailureKind::UserCancelled,
                "reconnect refused by user",
            ));
        }
        self.log_message("Reconnecting...\r\n");
        self.connect_with_retries().await?;
        Ok(true)
    }

    /// One attempt: connect, greeting, TLS, login, `MODE Z`, init commands
    /// and `SYST`.
    pub(crate) async fn connect_attempt(&self) -> AttemptOutcome {
        self.close_socket();
        let (host, port, user, timeout) = {
            let mut state = self.lock();
            state.connect_history.clear();
            let log_id = state.session.log_id;
            state.session = SessionState {
                log_id,
                ..SessionState::default()
            };
            (
                state.params.host.clone(),
                state.params.port,
                state.params.user.clone(),
                state.params.server_timeout,
            )
        };
        if self.log_id().is_none() {
            let log_id = self.inner.ctx.log.create_log(&host, port, &user);
            self.lock().session.log_id = log_id;
        }

        self.enter(ConnectSubState::Connect);
        self.log_message(&format!("Connecting to {}:{}...\r\n", host, port));
        let stream = match self.inner.ctx.connector.connect(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                self.log_message(&format!("Unable to connect: {}\r\n", e));
                return AttemptOutcome::Retry(format!("unable to connect to {}:{}: {}", host, port, e));
            }
        };
        let socket = ControlSocket::attach(stream);
        let io = socket.io().clone();
        self.lock().socket = Some(socket);
        self.inner.ctx.log.set_connected(self.log_id(), true);

        self.enter(ConnectSubState::WaitForLoginPrompt);
        match self.wait_for_login_prompt(&io, timeout).await {
            Ok(reply) => self.lock().session.server_first_reply = Some(reply.text),
            Err(outcome) => return outcome,
        }

        if let Err(outcome) = self.connect_steps(&host).await {
            return outcome;
        }

        self.enter(ConnectSubState::Ready);
        info!("Connected to {}:{}", host, port);
        self.log_message("Connection established.\r\n");
        AttemptOutcome::Connected
    }

    async fn connect_steps(&self, host: &str) -> Result<(), AttemptOutcome> {
        let params = self.params();

        if params.encrypt_control {
            self.upgrade_to_tls(host).await?;
            if params.encrypt_data {
                self.protect_data_connections().await?;
            }
        }

        self.login().await?;

        if params.compress_data {
            self.enter(ConnectSubState::ModeZ);
            let compress = self.connect_command(FtpCommand::MODE.prepare(Some("Z")), true).await?;
            let active = compress.as_ref().is_some_and(Reply::is_success);
            if !active {
                self.log_message("Server refused MODE Z, compression disabled.\r\n");
            }
            self.lock().session.compression_active = active;
        }

        let init_commands = params.init_command_list();
        if !init_commands.is_empty() {
            self.enter(ConnectSubState::SendInitCommands);
            for command in init_commands {
                self.connect_command(PreparedCommand::raw(&command), true).await?;
            }
        }

        self.enter(ConnectSubState::SendSystemCommand);
        let system = self.connect_command(FtpCommand::SYST.prepare(None), true).await?;
        self.lock().session.server_system = system.map(|r| r.trimmed_text().to_string());
        Ok(())
    }

    async fn wait_for_login_prompt(
        &self,
        io: &SocketIo,
        timeout: Duration,
    ) -> Result<Reply, AttemptOutcome> {
        let start = Instant::now();
        let mut closed = false;
        loop {
            while let Some(reply) = io.take_reply() {
                self.log_message(&reply.text);
                if reply.is_malformed() {
                    return Err(AttemptOutcome::Fatal(CommandFailure::NonRetryableFatal(
                        FailureDetail::new(FailureKind::Protocol, "not an FTP server")
                            .with_reply(reply)
                            .closed(),
                    )));
                }
                if reply.is_preliminary() {
                    continue;
                }
                if reply.is_failure() {
                    // "421 Too many users", try again later
                    return Err(AttemptOutcome::Retry(reply.trimmed_text().to_string()));
                }
                return Ok(reply);
            }
            if closed {
                return Err(AttemptOutcome::Retry("connection closed by server".to_string()));
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            match self.wait_for_event(io, remaining, true).await {
                SocketEvent::Closed { .. } => closed = true,
                SocketEvent::Timeout => {
                    return Err(AttemptOutcome::Retry(
                        "connection lost (server reply timeout)".to_string(),
                    ));
                }
                SocketEvent::Esc => {
                    if self.inner.ctx.ui.confirm_cancel(false) {
                        self.log_message("Action canceled by user.\r\n");
                        return Err(AttemptOutcome::Fatal(CommandFailure::NonRetryableFatal(
                            FailureDetail::new(FailureKind::UserCancelled, "interrupted by user")
                                .closed(),
                        )));
                    }
                }
                _ => {}
            }
        }
    }

    /// Sends one connect-phase command. With `tolerate_rejection` a 4xx/5xx
    /// reply is `Ok(None)`.
    async fn connect_command(
        &self,
        command: Result<PreparedCommand, EngineError>,
        tolerate_rejection: bool,
    ) -> Result<Option<Reply>, AttemptOutcome> {
        let command = command.map_err(|e| AttemptOutcome::Fatal(e.into()))?;
        match self.send_ftp_command(&command, SendOptions::default()).await {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if tolerate_rejection && e.rejected_reply().is_some() => Ok(None),
            Err(e) => Err(attempt_failure(e)),
        }
    }

    async fn upgrade_to_tls(&self, host: &str) -> Result<(), AttemptOutcome> {
        self.enter(ConnectSubState::AuthTls);
        let reply = self
            .connect_command(FtpCommand::AUTH.prepare(Some("TLS")), true)
            .await?;
        if !reply.as_ref().is_some_and(Reply::is_success) {
            return Err(AttemptOutcome::Fatal(CommandFailure::fatal(
                FailureKind::Protocol,
                "server refused AUTH TLS",
            )));
        }
        let Some(tls) = self.inner.ctx.tls.clone() else {
            return Err(AttemptOutcome::Fatal(EngineError::Tls(TlsError::TlsNotConfigured).into()));
        };
        // the keep-alive timer armed after AUTH must not touch the plain stream
        self.wait_for_end_of_keep_alive()
            .await
            .map_err(attempt_failure)?;

        let socket = self.lock().socket.take();
        let Some(socket) = socket else {
            return Err(AttemptOutcome::Retry("connection lost".to_string()));
        };
        let (stream, read_buf) = socket
            .detach()
            .await
            .map_err(|e| attempt_failure(e.into()))?;
        let (stream, certificates) = match tls.connect_tls(host, stream).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                self.log_message(&format!("{}\r\n", e.to_log_message()));
                return Err(attempt_failure(EngineError::Tls(e).into()));
            }
        };
        let socket = ControlSocket::attach_with(stream, read_buf, true, certificates);
        let mut state = self.lock();
        state.socket = Some(socket);
        state.session.tls_state = TlsState::ControlOnly;
        drop(state);
        self.log_message("TLS connection established.\r\n");
        Ok(())
    }

    async fn protect_data_connections(&self) -> Result<(), AttemptOutcome> {
        self.enter(ConnectSubState::Pbsz);
        let pbsz = self
            .connect_command(FtpCommand::PBSZ.prepare(Some("0")), true)
            .await?;
        if !pbsz.as_ref().is_some_and(Reply::is_success) {
            self.log_message("Data connections stay unencrypted (PBSZ refused).\r\n");
            return Ok(());
        }
        self.enter(ConnectSubState::Prot);
        let prot = self
            .connect_command(FtpCommand::PROT.prepare(Some("P")), true)
            .await?;
        if prot.as_ref().is_some_and(Reply::is_success) {
            self.lock().session.tls_state = TlsState::ControlAndData;
        } else {
            self.log_message("Data connections stay unencrypted (PROT P refused).\r\n");
        }
        Ok(())
    }

    /// `USER` then `PASS` (331) and `ACCT` (332) as the server asks.
    async fn login(&self) -> Result<(), AttemptOutcome> {
        let params = self.params();
        let mut step = LoginStep::User;
        loop {
            self.enter(ConnectSubState::SendNextScriptCmd);
            let command = match step {
                LoginStep::User => FtpCommand::USER.prepare(Some(&params.user)),
                LoginStep::Pass => FtpCommand::PASS.prepare(Some(&params.password)),
                LoginStep::Acct => FtpCommand::ACCT.prepare(Some(&params.account)),
            }
            .map_err(|e| AttemptOutcome::Fatal(e.into()))?;

            let reply = match self.send_ftp_command(&command, SendOptions::default()).await {
                Ok(reply) => reply,
                Err(e) => {
                    let Some(rejected) = e.rejected_reply() else {
                        return Err(attempt_failure(e));
                    };
                    let message = format!("login failed: {}", rejected.trimmed_text());
                    if rejected.first_digit() == Some(4) || params.retry_login_without_asking {
                        return Err(AttemptOutcome::Retry(message));
                    }
                    return Err(AttemptOutcome::Fatal(CommandFailure::NonRetryableFatal(
                        FailureDetail::new(FailureKind::Protocol, message).with_reply(rejected.clone()),
                    )));
                }
            };
            if reply.is_success() {
                return Ok(());
            }
            step = match (step, reply.code) {
                (LoginStep::User | LoginStep::Pass, 332) => LoginStep::Acct,
                (LoginStep::User, _) => LoginStep::Pass,
                _ => {
                    return Err(AttemptOutcome::Fatal(CommandFailure::NonRetryableFatal(
                        FailureDetail::new(
                            FailureKind::Protocol,
                            "incomplete login: the server asks for more",
                        )
                        .with_reply(reply),
                    )))
                }
            };
        }
    }

    /// Sends `QUIT` and closes the connection.
    pub async fn close_control_connection(&self) -> Result<(), CommandFailure> {
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        if !self.is_connected() {
            self.close_socket();
            self.release_keep_alive();
            return Ok(());
        }
        let quit = FtpCommand::QUIT.prepare(None)?;
        let result = self
            .send_ftp_command(&quit, SendOptions::default().no_retry())
            .await;
        self.release_keep_alive();
        self.close_socket();
        self.log_message("Disconnected.\r\n");
        info!("Disconnected from {}", self.lock().params.host);
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.rejected_reply().is_some() || e.connection_closed() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn attempt_failure(e: CommandFailure) -> AttemptOutcome {
    if e.is_retryable() {
        AttemptOutcome::Retry(e.to_string())
    } else {
        AttemptOutcome::Fatal(e)
    }
}
