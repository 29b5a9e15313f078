use crate::constants::{TELNET_IAC, TELNET_IP, TELNET_SYNCH};
use crate::core_connection::connection::ControlConnection;
use crate::core_connection::error::{
    CommandFailure, CommandResult, EngineError, FailureDetail, FailureKind,
};
use crate::core_ftpcommand::ftpcommand::{FtpCommand, PreparedCommand};
use crate::core_network::{SocketEvent, SocketIo};
use crate::core_reply::Reply;
use log::{debug, trace, warn};
use std::time::Duration;
use tokio::time::Instant;

/// How `send_command` treats one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// ESC aborts the command (`ABOR`) instead of closing the connection.
    pub allow_abort: bool,
    pub reset_working_path: bool,
    pub reset_transfer_mode: bool,
    /// False when a retry cannot help; failures are then never retryable.
    pub can_retry: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            allow_abort: false,
            reset_working_path: false,
            reset_transfer_mode: false,
            can_retry: true,
        }
    }
}

impl SendOptions {
    pub fn abortable(mut self) -> Self {
        self.allow_abort = true;
        self
    }

    pub fn resets_working_path(mut self) -> Self {
        self.reset_working_path = true;
        self
    }

    pub fn resets_transfer_mode(mut self) -> Self {
        self.reset_transfer_mode = true;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.can_retry = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    SendCommand,
    AbortCommand,
    ResendAbortCommand,
    FatalError,
    OperationFatalError,
    Done,
}

/// Progress of one `send_command` run.
struct SendRun {
    state: SendState,
    aborting: bool,
    oob_sent: bool,
    all_written: bool,
    cancelled: bool,
    cmd_reply_received: bool,
    donot_retry: bool,
    reply: Option<Reply>,
    fatal: Option<FailureDetail>,
}

impl SendRun {
    fn new() -> Self {
        Self {
            state: SendState::SendCommand,
            aborting: false,
            oob_sent: false,
            all_written: false,
            cancelled: false,
            cmd_reply_received: false,
            donot_retry: false,
            reply: None,
            fatal: None,
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(
            self.state,
            SendState::FatalError | SendState::OperationFatalError
        )
    }

    fn is_waiting_for_reply(&self) -> bool {
        matches!(
            self.state,
            SendState::SendCommand | SendState::AbortCommand | SendState::ResendAbortCommand
        )
    }

    fn fail(&mut self, state: SendState, detail: FailureDetail) {
        self.state = state;
        self.fatal = Some(detail);
        self.all_written = true;
    }
}

impl ControlConnection {
    /// Sends one command and waits for its final reply.
    ///
    /// `Ok` carries a 2xx/3xx reply. A 4xx/5xx reply on a live connection is
    /// `RetryableFatal` (or `NonRetryableFatal` without `can_retry`) with the
    /// reply attached; the connection stays open. Timeouts and lost
    /// connections close the socket.
    pub async fn send_command(
        &self,
        command: FtpCommand,
        arg: Option<&str>,
        opts: SendOptions,
    ) -> CommandResult {
        let prepared = command.prepare(arg)?;
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        self.send_ftp_command(&prepared, opts).await
    }

    /// Sends a raw command line typed by the user. A typed `CWD`, `CDUP`
    /// or `TYPE` also invalidates the matching session cache.
    pub async fn send_raw_command(&self, text: &str, mut opts: SendOptions) -> CommandResult {
        let prepared = PreparedCommand::raw(text)?;
        if let Some(command) = FtpCommand::from_line(text) {
            if command.changes_working_path() {
                opts = opts.resets_working_path();
            }
            if command.changes_transfer_mode() {
                opts = opts.resets_transfer_mode();
            }
        }
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        self.send_ftp_command(&prepared, opts).await
    }

    /// `send_command` without the re-entrancy guard, for operations that
    /// already hold it.
    pub(crate) async fn send_ftp_command(
        &self,
        command: &PreparedCommand,
        opts: SendOptions,
    ) -> CommandResult {
        self.wait_for_end_of_keep_alive().await?;

        let io = match self.socket_io() {
            Ok(io) => io,
            Err(e) => {
                self.release_keep_alive();
                return Err(e.into());
            }
        };
        let timeout = self.lock().params.server_timeout;

        // some servers send a reply twice (WarFTPD after a denied LIST)
        while let Some(unexpected) = io.take_reply() {
            debug!("Unexpected reply ignored: {}", unexpected.trimmed_text());
            self.log_message(&unexpected.text);
        }

        let ui = &self.inner.ctx.ui;
        ui.show_wait(command.log_text.trim_end());
        let result = self
            .run_send_states(&io, command, opts.allow_abort, timeout)
            .await;
        ui.hide_wait();

        {
            let mut state = self.lock();
            if opts.reset_working_path {
                state.session.reset_working_path_cache();
            }
            if opts.reset_transfer_mode {
                state.session.reset_transfer_mode_cache();
            }
        }

        match result {
            Ok(run) => self.finish_run(run, opts),
            Err(e) => {
                self.close_socket();
                self.release_keep_alive();
                Err(e.into())
            }
        }
    }

    async fn run_send_states(
        &self,
        io: &SocketIo,
        command: &PreparedCommand,
        allow_abort: bool,
        timeout: Duration,
    ) -> Result<SendRun, EngineError> {
        let mut run = SendRun::new();
        loop {
            let (bytes, log_text) = match run.state {
                SendState::SendCommand => (command.wire.clone(), command.log_text.clone()),
                SendState::AbortCommand | SendState::ResendAbortCommand => {
                    run.state = SendState::AbortCommand;
                    run.aborting = true;
                    run.all_written = false;
                    let abor = FtpCommand::ABOR.prepare(None)?;
                    let wire = self.send_telnet_interrupt(io, abor.wire, &mut run).await;
                    (wire, abor.log_text)
                }
                SendState::FatalError | SendState::OperationFatalError | SendState::Done => {
                    return Ok(run)
                }
            };
            let send_state = run.state;

            if let Err(e) = io.write(bytes.as_bytes()) {
                debug!("Cannot write command: {}", e);
                run.fail(
                    SendState::FatalError,
                    FailureDetail::new(FailureKind::Transport, "connection lost"),
                );
                continue;
            }
            self.log_message(&log_text);

            let start = Instant::now();
            while !run.all_written || run.state == send_state {
                let remaining = timeout.saturating_sub(start.elapsed());
                match self.wait_for_event(io, remaining, true).await {
                    SocketEvent::Esc => self.handle_esc(&mut run, allow_abort),
                    SocketEvent::Timeout => {
                        warn!("No reply from the server within {:?}", timeout);
                        run.fail(
                            SendState::FatalError,
                            FailureDetail::new(
                                FailureKind::Transport,
                                "connection lost (server reply timeout)",
                            ),
                        );
                    }
                    SocketEvent::WriteDone { .. } => {
                        run.all_written = true;
                        self.process_replies(io, &mut run, false);
                    }
                    SocketEvent::NewBytesRead { .. } | SocketEvent::Connected => {
                        self.process_replies(io, &mut run, false);
                    }
                    SocketEvent::Closed { error } => {
                        self.process_replies(io, &mut run, true);
                        run.all_written = true;
                        if run.is_waiting_for_reply() {
                            run.fail(
                                SendState::FatalError,
                                FailureDetail::new(FailureKind::Transport, "connection lost"),
                            );
                        }
                        if let Some(kind) = error {
                            self.log_message(&format!("Connection error: {}\r\n", kind));
                        }
                    }
                }
            }
        }
    }

    fn handle_esc(&self, run: &mut SendRun, allow_abort: bool) {
        let abort_possible = allow_abort && run.state == SendState::SendCommand;
        if !self.inner.ctx.ui.confirm_cancel(abort_possible) {
            return;
        }
        if abort_possible {
            // ABOR goes out once the command itself is written
            run.state = SendState::AbortCommand;
        } else {
            run.state = SendState::Done;
            run.cancelled = true;
            run.all_written = true;
            self.log_message("Action canceled by user.\r\n");
        }
    }

    /// `IAC IP` in-band then the Synch as urgent data. Returns the bytes of
    /// the `ABOR` line still to write.
    async fn send_telnet_interrupt(&self, io: &SocketIo, abor: String, run: &mut SendRun) -> String {
        run.oob_sent = false;
        if !self.lock().session.can_send_oob {
            return abor;
        }
        match io.send_urgent(&[TELNET_IAC, TELNET_IP], &[TELNET_SYNCH]).await {
            Ok(0) => {
                self.log_message("Unable to send TELNET \"Synch\" signal (0 bytes sent)\r\n");
            }
            Ok(_) => {
                trace!("TELNET IP and Synch sent");
                run.oob_sent = true;
            }
            Err(e) => {
                self.log_message(&format!("Unable to send TELNET \"Synch\" signal: {}\r\n", e));
            }
        }
        abor
    }

    fn process_replies(&self, io: &SocketIo, run: &mut SendRun, closed: bool) {
        while let Some(reply) = io.take_reply() {
            self.log_message(&reply.text);

            if !run.is_fatal() && reply.is_malformed() {
                run.donot_retry = true;
                run.fail(
                    SendState::OperationFatalError,
                    FailureDetail::new(FailureKind::Protocol, "not an FTP server").with_reply(reply),
                );
                return;
            }
            if reply.is_preliminary() {
                continue;
            }
            if closed {
                // e.g. "421 Service not available, closing control connection"
                if !run.is_fatal() && reply.is_failure() {
                    let message = reply.trimmed_text().to_string();
                    run.fail(
                        SendState::FatalError,
                        FailureDetail::new(FailureKind::Protocol, message).with_reply(reply),
                    );
                }
                continue;
            }
            if !run.aborting {
                // with AbortCommand pending the user wants ABOR even after success
                if run.state != SendState::AbortCommand {
                    run.state = SendState::Done;
                    run.reply = Some(reply);
                }
                return;
            }
            if run.oob_sent && reply.first_digit() == Some(5) && reply.second_digit() == Some(0) {
                // the server read the Synch byte as part of "ABOR"
                debug!("Server does not understand OOB data, resending plain ABOR");
                self.lock().session.can_send_oob = false;
                run.state = SendState::ResendAbortCommand;
                return;
            }
            if !run.cmd_reply_received {
                run.state = SendState::Done;
                run.reply = Some(reply);
                run.cmd_reply_received = true;
            }
        }
    }

    fn finish_run(&self, run: SendRun, opts: SendOptions) -> CommandResult {
        match run.state {
            SendState::Done if run.cancelled => {
                self.close_socket();
                self.release_keep_alive();
                Err(CommandFailure::NonRetryableFatal(
                    FailureDetail::new(FailureKind::UserCancelled, "interrupted by user").closed(),
                ))
            }
            SendState::Done => {
                let Some(reply) = run.reply else {
                    return Err(CommandFailure::fatal(
                        FailureKind::Operation,
                        "command finished without a reply",
                    ));
                };
                self.setup_keep_alive_timer(false);
                if run.aborting {
                    Err(CommandFailure::AbortedWithReply(reply))
                } else if reply.is_failure() {
                    let detail = FailureDetail::new(
                        FailureKind::Protocol,
                        reply.trimmed_text().to_string(),
                    )
                    .with_reply(reply);
                    if opts.can_retry {
                        Err(CommandFailure::RetryableFatal(detail))
                    } else {
                        Err(CommandFailure::NonRetryableFatal(detail))
                    }
                } else {
                    Ok(reply)
                }
            }
            _ => {
                self.close_socket();
                self.release_keep_alive();
                let detail = run
                    .fatal
                    .unwrap_or_else(|| FailureDetail::new(FailureKind::Transport, "connection lost"))
                    .closed();
                self.log_message(&format!("Fatal error: {}\r\n", detail.message));
                if run.donot_retry || !opts.can_retry {
                    Err(CommandFailure::NonRetryableFatal(detail))
                } else {
                    Err(CommandFailure::RetryableFatal(detail))
                }
            }
        }
    }
}
