use chrono::Local;
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifies one session log. `LogId::NONE` disables logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogId(pub i32);

impl LogId {
    pub const NONE: LogId = LogId(-1);

    pub fn is_none(&self) -> bool {
        *self == LogId::NONE
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only session log. Logging failures never fail the caller.
pub trait LogSink: Send + Sync {
    fn log_message(&self, log_id: LogId, text: &str, prepend_timestamp: bool) -> bool;

    /// Creates a log for a new connection.
    fn create_log(&self, _host: &str, _port: u16, _user: &str) -> LogId {
        LogId::NONE
    }

    fn set_connected(&self, _log_id: LogId, _connected: bool) {}
}

/// Puts `(H:MM:SS): ` after any leading line breaks of `text`.
pub fn with_timestamp(text: &str) -> String {
    let body = text.trim_start_matches(&['\r', '\n'][..]);
    let breaks = &text[..text.len() - body.len()];
    format!("{}({}): {}", breaks, Local::now().format("%-H:%M:%S"), body)
}

#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub text: String,
    pub skipped_chars: usize,
    pub skipped_lines: usize,
    pub connected: bool,
}

impl SessionLog {
    /// Drops whole lines from the front until the log fits in `max_size`.
    fn trim_to(&mut self, max_size: usize) {
        if self.text.len() <= max_size {
            return;
        }
        let excess = self.text.len() - max_size;
        let cut = match self.text.as_bytes()[excess..].iter().position(|&b| b == b'\n') {
            Some(pos) => excess + pos + 1,
            None => self.text.len(),
        };
        self.skipped_lines += self.text.as_bytes()[..cut]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        self.skipped_chars += cut;
        self.text.drain(..cut);
    }
}

#[derive(Debug, Default)]
struct SessionLogsInner {
    next_id: i32,
    logs: HashMap<LogId, SessionLog>,
}

/// In-memory registry of per-connection session logs.
#[derive(Debug)]
pub struct SessionLogs {
    inner: Mutex<SessionLogsInner>,
    max_size: usize,
}

impl SessionLogs {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(SessionLogsInner::default()),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionLogsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn text(&self, log_id: LogId) -> Option<String> {
        self.lock().logs.get(&log_id).map(|log| log.text.clone())
    }

    pub fn log(&self, log_id: LogId) -> Option<SessionLog> {
        self.lock().logs.get(&log_id).cloned()
    }

    pub fn is_connected(&self, log_id: LogId) -> bool {
        self.lock().logs.get(&log_id).is_some_and(|log| log.connected)
    }

    pub fn close_log(&self, log_id: LogId) {
        self.lock().logs.remove(&log_id);
    }
}

impl LogSink for SessionLogs {
    fn log_message(&self, log_id: LogId, text: &str, prepend_timestamp: bool) -> bool {
        if log_id.is_none() {
            return true;
        }
        let line = if prepend_timestamp {
            with_timestamp(text)
        } else {
            text.to_string()
        };
        let mut inner = self.lock();
        match inner.logs.get_mut(&log_id) {
            Some(log) => {
                debug!("[log {}] {}", log_id, line.trim_end());
                log.text.push_str(&line);
                log.trim_to(self.max_size);
                true
            }
            None => {
                trace!("SessionLogs::log_message(): log {} not found", log_id);
                false
            }
        }
    }

    fn create_log(&self, host: &str, port: u16, user: &str) -> LogId {
        let mut inner = self.lock();
        let log_id = LogId(inner.next_id);
        inner.next_id += 1;
        inner.logs.insert(
            log_id,
            SessionLog {
                host: host.to_string(),
                port,
                user: user.to_string(),
                ..SessionLog::default()
            },
        );
        log_id
    }

    fn set_connected(&self, log_id: LogId, connected: bool) {
        if let Some(log) = self.lock().logs.get_mut(&log_id) {
            log.connected = connected;
        }
    }
}
