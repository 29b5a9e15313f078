use crate::core_reply::Reply;
use crate::core_tls::TlsError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Local failures of the engine itself.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not connected")]
    NotConnected,

    #[error("another command is already running on this connection")]
    Busy,

    #[error("socket event queue overflow")]
    EventQueueOverflow,

    #[error("command is too long")]
    CommandTooLong,

    #[error("network error: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Where a failure comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Socket level: refused, reset, timed out. The connection is closed.
    Transport,
    /// Malformed or unexpected reply.
    Protocol,
    /// Local resource failure.
    Operation,
    /// The user pressed ESC and confirmed.
    UserCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    pub reply: Option<Reply>,
    /// The engine closed the control connection while failing.
    pub connection_closed: bool,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reply: None,
            connection_closed: false,
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn with_reply_opt(mut self, reply: Option<Reply>) -> Self {
        self.reply = reply;
        self
    }

    pub fn closed(mut self) -> Self {
        self.connection_closed = true;
        self
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a command did not end with a 2xx/3xx reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// The user aborted the command; this is the server's first reply after `ABOR`.
    #[error("command aborted: {0}")]
    AbortedWithReply(Reply),

    #[error("{0}")]
    RetryableFatal(FailureDetail),

    #[error("{0}")]
    NonRetryableFatal(FailureDetail),
}

impl CommandFailure {
    pub fn retryable(kind: FailureKind, message: impl Into<String>) -> Self {
        CommandFailure::RetryableFatal(FailureDetail::new(kind, message))
    }

    pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
        CommandFailure::NonRetryableFatal(FailureDetail::new(kind, message))
    }

    pub fn detail(&self) -> Option<&FailureDetail> {
        match self {
            CommandFailure::AbortedWithReply(_) => None,
            CommandFailure::RetryableFatal(d) | CommandFailure::NonRetryableFatal(d) => Some(d),
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            CommandFailure::AbortedWithReply(reply) => Some(reply),
            _ => self.detail().and_then(|d| d.reply.as_ref()),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        self.detail().map(|d| d.kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CommandFailure::RetryableFatal(_))
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.kind() == Some(FailureKind::UserCancelled)
    }

    /// The server answered 4xx/5xx and the connection is still usable.
    pub fn rejected_reply(&self) -> Option<&Reply> {
        match self.detail() {
            Some(d) if !d.connection_closed => d.reply.as_ref().filter(|r| r.is_failure()),
            _ => None,
        }
    }

    pub fn connection_closed(&self) -> bool {
        self.detail().is_some_and(|d| d.connection_closed)
    }
}

impl From<EngineError> for CommandFailure {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Transport(err) => {
                CommandFailure::retryable(FailureKind::Transport, err.to_string())
            }
            EngineError::NotConnected => {
                CommandFailure::retryable(FailureKind::Transport, "connection lost")
            }
            EngineError::Tls(err) if err.is_retryable() => {
                CommandFailure::retryable(FailureKind::Transport, err.to_log_message())
            }
            EngineError::Tls(err) => {
                CommandFailure::fatal(FailureKind::Protocol, err.to_log_message())
            }
            EngineError::Protocol(msg) => CommandFailure::fatal(FailureKind::Protocol, msg),
            other => CommandFailure::fatal(FailureKind::Operation, other.to_string()),
        }
    }
}

pub type CommandResult = Result<Reply, CommandFailure>;

/// Four-way view of a command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Reply),
    AbortedWithReply(Reply),
    RetryableFatal(String),
    NonRetryableFatal(String),
}

impl From<CommandResult> for Outcome {
    fn from(result: CommandResult) -> Self {
        match result {
            Ok(reply) => Outcome::Success(reply),
            Err(CommandFailure::AbortedWithReply(reply)) => Outcome::AbortedWithReply(reply),
            Err(CommandFailure::RetryableFatal(d)) => Outcome::RetryableFatal(d.message),
            Err(CommandFailure::NonRetryableFatal(d)) => Outcome::NonRetryableFatal(d.message),
        }
    }
}
