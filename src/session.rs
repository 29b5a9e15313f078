use crate::config::{ClientConfig, KeepAliveCommand};
use crate::constants::{ANONYMOUS_USER, LIST_A_CMD_TEXT, LIST_CMD_TEXT};
use crate::core_log::LogId;
use std::time::Duration;

/// Transfer type last set with `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Unknown,
    Ascii,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsState {
    #[default]
    None,
    ControlOnly,
    ControlAndData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveSettings {
    pub enabled: bool,
    pub send_every: Duration,
    pub stop_after: Duration,
    pub command: KeepAliveCommand,
}

/// What a connection needs to know to (re)establish and run its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub account: String,
    pub init_commands: String,
    pub list_command: Option<String>,
    pub use_list_a: bool,
    pub passive_mode: bool,
    pub keep_alive: KeepAliveSettings,
    pub encrypt_control: bool,
    pub encrypt_data: bool,
    pub compress_data: bool,
    pub use_listings_cache: bool,
    pub server_timeout: Duration,
    pub connect_retries: u32,
    pub delay_between_retries: Duration,
    pub always_reconnect: bool,
    pub retry_login_without_asking: bool,
}

impl ConnectionParams {
    pub fn from_config(config: &ClientConfig) -> Self {
        let (user, password) = match &config.server.user {
            Some(user) if !user.is_empty() && !user.eq_ignore_ascii_case(ANONYMOUS_USER) => (
                user.clone(),
                config.server.password.clone().unwrap_or_default(),
            ),
            _ => (
                ANONYMOUS_USER.to_string(),
                config
                    .server
                    .password
                    .clone()
                    .unwrap_or_else(|| config.anonymous_password.clone()),
            ),
        };
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            user,
            password,
            account: config.server.account.clone().unwrap_or_default(),
            init_commands: config.server.init_commands.clone(),
            list_command: config.server.list_command.clone(),
            use_list_a: config.server.use_list_a,
            passive_mode: config.server.passive_mode,
            keep_alive: KeepAliveSettings {
                enabled: config.keep_alive.enabled,
                send_every: Duration::from_secs(config.keep_alive.send_every_secs),
                stop_after: Duration::from_secs(config.keep_alive.stop_after_mins * 60),
                command: config.keep_alive.command,
            },
            encrypt_control: config.tls.encrypt_control,
            encrypt_data: config.tls.encrypt_control && config.tls.encrypt_data,
            compress_data: config.compress_data,
            use_listings_cache: config.cache.use_listings_cache,
            server_timeout: config.server_timeout(),
            connect_retries: config.timeouts.connect_retries,
            delay_between_retries: Duration::from_secs(config.timeouts.delay_between_retries_secs),
            always_reconnect: config.always_reconnect,
            retry_login_without_asking: config.retry_login_without_asking,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.eq_ignore_ascii_case(ANONYMOUS_USER)
    }

    /// User name as the listing cache keys it (anonymous logins share one slot).
    pub fn cache_user(&self) -> Option<&str> {
        if self.is_anonymous() {
            None
        } else {
            Some(&self.user)
        }
    }

    pub fn list_command_text(&self) -> &str {
        match &self.list_command {
            Some(cmd) if !cmd.is_empty() => cmd.as_str(),
            _ if self.use_list_a => LIST_A_CMD_TEXT,
            _ => LIST_CMD_TEXT,
        }
    }

    pub fn is_list_a(&self) -> bool {
        self.list_command_text().eq_ignore_ascii_case(LIST_A_CMD_TEXT)
    }

    /// Switches between `LIST` and `LIST -a` (servers that reject `-a`).
    pub fn toggle_list_a(&mut self) {
        let to_list_a = !self.is_list_a();
        self.list_command = None;
        self.use_list_a = to_list_a;
    }

    /// Init commands split on `;`, with the first leading space of each removed.
    pub fn init_command_list(&self) -> Vec<String> {
        self.init_commands
            .split(';')
            .map(|cmd| cmd.strip_prefix(|c: char| c.is_whitespace()).unwrap_or(cmd))
            .filter(|cmd| !cmd.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Per-connection state the engine caches between commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Last known working directory; `Some("")` when the server did not tell.
    pub working_path: Option<String>,
    pub transfer_mode: TransferMode,
    pub server_first_reply: Option<String>,
    pub server_system: Option<String>,
    pub can_send_oob: bool,
    pub log_id: LogId,
    pub tls_state: TlsState,
    pub compression_active: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            working_path: None,
            transfer_mode: TransferMode::Unknown,
            server_first_reply: None,
            server_system: None,
            can_send_oob: true,
            log_id: LogId::NONE,
            tls_state: TlsState::None,
            compression_active: false,
        }
    }
}

impl SessionState {
    pub fn reset_working_path_cache(&mut self) {
        self.working_path = None;
    }

    pub fn reset_transfer_mode_cache(&mut self) {
        self.transfer_mode = TransferMode::Unknown;
    }
}
