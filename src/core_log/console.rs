use crate::core_log::log_sink::{with_timestamp, LogId, LogSink};
use colored::Colorize;

/// Session log printed to stderr, used by the command line client.
#[derive(Debug, Default)]
pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn log_message(&self, log_id: LogId, text: &str, prepend_timestamp: bool) -> bool {
        if log_id.is_none() {
            return true;
        }
        let line = if prepend_timestamp {
            with_timestamp(text)
        } else {
            text.to_string()
        };
        for row in line.lines().filter(|l| !l.is_empty()) {
            let colored = match row.as_bytes().first() {
                Some(b'4') | Some(b'5') => row.red(),
                Some(b) if b.is_ascii_digit() => row.green(),
                Some(b'(') => row.normal(),
                _ => row.cyan(),
            };
            eprintln!("{}", colored);
        }
        true
    }

    fn create_log(&self, _host: &str, _port: u16, _user: &str) -> LogId {
        LogId(0)
    }
}
