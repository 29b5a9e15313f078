use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use rouilleftp::client;
use rouilleftp::config::ClientConfig;
use rouilleftp::core_cli::Cli;
use std::io::Write;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Initialize the logger with a custom format
    let default_filter = if args.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();

    // Determine the default config path based on the OS
    let default_config_path = if cfg!(target_os = "windows") {
        "C:\\rouilleftp\\rouilleftp.conf"
    } else {
        "/etc/rouilleftp.conf"
    };

    // An explicit config must exist, the default one is optional
    let config = if !args.config.is_empty() {
        ClientConfig::load_from_file(&args.config)?
    } else if Path::new(default_config_path).exists() {
        ClientConfig::load_from_file(default_config_path)?
    } else {
        ClientConfig::default()
    };

    client::run(config, &args).await
}
