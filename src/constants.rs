use std::time::Duration;

pub const DEFAULT_FTP_PORT: u16 = 21;

// Receive buffer growth
pub const BYTES_TO_READ_ON_NETWORK: usize = 1024;
pub const READ_BUFFER_PREALLOC: usize = 512;
pub const WRITE_BUFFER_PREALLOC: usize = 512;

/// Event queue capacity. Overflow is reported as an internal error.
pub const EVENT_QUEUE_CAPACITY: usize = 32;

/// A line without an FTP reply syntax is cut after this many characters.
pub const MAX_MALFORMED_REPLY_LINE: usize = 1000;

/// How often blocking waits poll the user interface for ESC.
pub const ESC_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const DEFAULT_SERVER_REPLIES_TIMEOUT_SECS: u64 = 30;
pub const MIN_SERVER_REPLIES_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_CONNECT_RETRIES: u32 = 60;
pub const DEFAULT_DELAY_BETWEEN_RETRIES_SECS: u64 = 20;

pub const DEFAULT_KEEP_ALIVE_SEND_EVERY_SECS: u64 = 90;
pub const DEFAULT_KEEP_ALIVE_STOP_AFTER_MINS: u64 = 30;

pub const DEFAULT_CACHE_MAX_SIZE: u64 = 4 * 1024 * 1024;
pub const MIN_CACHE_MAX_SIZE: u64 = 100 * 1024;

pub const DEFAULT_LOG_MAX_SIZE_KB: usize = 50;

pub const ANONYMOUS_USER: &str = "anonymous";
pub const DEFAULT_ANONYMOUS_PASSWORD: &str = "name@someserver.com";

pub const LIST_CMD_TEXT: &str = "LIST";
pub const NLST_CMD_TEXT: &str = "NLST";
pub const LIST_A_CMD_TEXT: &str = "LIST -a";

// TELNET abort sequence: IAC IP in-band, then IAC DM (Synch) as urgent data.
pub const TELNET_IAC: u8 = 0xFF;
pub const TELNET_IP: u8 = 0xF4;
pub const TELNET_SYNCH: u8 = 0xF2;

/// Longest command line (CRLF included) the engine sends.
pub const MAX_COMMAND_LENGTH: usize = 1000;
