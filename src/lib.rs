//! Client side of the FTP control connection: command engine, keep-alive,
//! reconnect and hand-off between a panel connection and background workers.

pub mod client;
pub mod config;
pub mod constants;
pub mod core_cache;
pub mod core_cli;
pub mod core_connection;
pub mod core_ftpcommand;
pub mod core_keepalive;
pub mod core_log;
pub mod core_network;
pub mod core_reply;
pub mod core_tls;
pub mod core_worker;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
