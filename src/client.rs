use crate::config::ClientConfig;
use crate::core_cache::ListingCache;
use crate::core_cli::Cli;
use crate::core_connection::{CancelFlag, ControlConnection, EngineContext, UserInterface};
use crate::core_ftpcommand::SendOptions;
use crate::core_log::ConsoleLog;
use crate::core_tls::TlsConnection;
use crate::session::ConnectionParams;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Runs one client session: connect, enter the URL path, send the
/// commands given on the command line, idle if asked, then `QUIT`.
///
/// # Arguments
///
/// * `config` - The client configuration, before `--url` is applied.
/// * `cli` - The parsed command line.
pub async fn run(mut config: ClientConfig, cli: &Cli) -> Result<()> {
    let target = cli.apply_url(&mut config)?;
    if config.server.host.is_empty() {
        bail!("No server to connect to: use --url or set [server] host in the configuration");
    }
    if cli.keep_alive_secs > 0 {
        config.keep_alive.enabled = true;
    }

    let params = ConnectionParams::from_config(&config);
    let cancel = Arc::new(CancelFlag::new());
    let ui: Arc<dyn UserInterface> = cancel.clone();
    let mut ctx = EngineContext::tcp(config.connect_timeout())
        .with_log(Arc::new(ConsoleLog))
        .with_ui(ui)
        .with_cache(ListingCache::new(config.cache_max_size()));
    if params.encrypt_control {
        let tls = TlsConnection::new(&config.tls).context("Failed to set up TLS")?;
        ctx = ctx.with_tls(Arc::new(tls));
    }

    // Ctrl-C plays the ESC key
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            cancel.request_cancel();
        }
    });

    let (host, port) = (params.host.clone(), params.port);
    let conn = ControlConnection::new(params, ctx);
    info!("Connecting to {}:{}", host, port);
    conn.start_control_connection()
        .await
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
    if conn.is_encrypted() {
        let chain = conn.peer_certificates().map_or(0, |c| c.len());
        info!("Control connection encrypted, server sent {} certificate(s)", chain);
    }

    if !target.path.is_empty() {
        let change = conn
            .change_working_path(&target.path, false)
            .await
            .with_context(|| format!("Failed to change to {}", target.path))?;
        if change.path_was_cut {
            warn!("{} is not accessible, using {}", target.path, change.path);
        } else {
            info!("Working directory: {}", change.path);
        }
    }

    for command in &cli.commands {
        match conn
            .send_raw_command(command, SendOptions::default().abortable())
            .await
        {
            Ok(reply) => info!("{}", reply.trimmed_text()),
            Err(e) if e.rejected_reply().is_some() => warn!("{}", e),
            Err(e) => return Err(e).with_context(|| format!("Command failed: {}", command)),
        }
    }

    if cli.keep_alive_secs > 0 {
        info!("Staying idle for {} seconds", cli.keep_alive_secs);
        tokio::time::sleep(Duration::from_secs(cli.keep_alive_secs)).await;
    }

    conn.close_control_connection()
        .await
        .context("Failed to close the connection")?;
    Ok(())
}
