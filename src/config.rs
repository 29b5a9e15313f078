use crate::constants::*;
use crate::core_tls::TlsConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Command sent by the keep-alive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepAliveCommand {
    #[default]
    Noop,
    Pwd,
    Nlst,
    List,
}

impl KeepAliveCommand {
    /// Listing commands need a data connection.
    pub fn needs_data_connection(&self) -> bool {
        matches!(self, KeepAliveCommand::Nlst | KeepAliveCommand::List)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub account: Option<String>,
    /// Commands sent after login, separated by `;`.
    pub init_commands: String,
    pub list_command: Option<String>,
    pub use_list_a: bool,
    pub passive_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_FTP_PORT,
            user: None,
            password: None,
            account: None,
            init_commands: String::new(),
            list_command: None,
            use_list_a: false,
            passive_mode: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub server_replies_secs: u64,
    pub connect_retries: u32,
    pub delay_between_retries_secs: u64,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            server_replies_secs: DEFAULT_SERVER_REPLIES_TIMEOUT_SECS,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            delay_between_retries_secs: DEFAULT_DELAY_BETWEEN_RETRIES_SECS,
            connect_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub send_every_secs: u64,
    #[validate(range(min = 1))]
    pub stop_after_mins: u64,
    pub command: KeepAliveCommand,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            send_every_secs: DEFAULT_KEEP_ALIVE_SEND_EVERY_SECS,
            stop_after_mins: DEFAULT_KEEP_ALIVE_STOP_AFTER_MINS,
            command: KeepAliveCommand::Noop,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    pub use_listings_cache: bool,
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_listings_cache: true,
            max_size_bytes: DEFAULT_CACHE_MAX_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct LogConfig {
    #[validate(range(min = 1))]
    pub max_log_size_kb: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_log_size_kb: DEFAULT_LOG_MAX_SIZE_KB,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ClientConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub timeouts: TimeoutsConfig,
    #[validate(nested)]
    pub keep_alive: KeepAliveConfig,
    #[validate(nested)]
    pub cache: CacheConfig,
    pub tls: TlsConfig,
    #[validate(nested)]
    pub log: LogConfig,
    /// Negotiate `MODE Z`.
    pub compress_data: bool,
    /// Reconnect without asking when the connection was found closed.
    pub always_reconnect: bool,
    /// Retry after a 5xx login reply instead of giving up.
    pub retry_login_without_asking: bool,
    pub anonymous_password: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timeouts: TimeoutsConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            cache: CacheConfig::default(),
            tls: TlsConfig::default(),
            log: LogConfig::default(),
            compress_data: false,
            always_reconnect: false,
            retry_login_without_asking: false,
            anonymous_password: DEFAULT_ANONYMOUS_PASSWORD.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let config: ClientConfig = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration file: {}", path))?;
        config
            .tls
            .validate()
            .with_context(|| format!("Invalid TLS configuration in: {}", path))?;
        Ok(config)
    }

    /// Reply timeout, never below one second.
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeouts
                .server_replies_secs
                .max(MIN_SERVER_REPLIES_TIMEOUT_SECS),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        match self.timeouts.connect_timeout_secs {
            Some(secs) => Duration::from_secs(secs.max(MIN_SERVER_REPLIES_TIMEOUT_SECS)),
            None => self.server_timeout(),
        }
    }

    pub fn cache_max_size(&self) -> u64 {
        self.cache.max_size_bytes.max(MIN_CACHE_MAX_SIZE)
    }

    pub fn log_max_size(&self) -> usize {
        self.log.max_log_size_kb * 1024
    }
}
