pub mod console;
pub mod log_sink;

pub use console::ConsoleLog;
pub use log_sink::{LogId, LogSink, SessionLogs};
