use crate::core_cache::{CachedListing, ListingKey, ServerPathType};
use crate::core_connection::connection::ControlConnection;
use crate::core_connection::error::{CommandFailure, EngineError, FailureDetail, FailureKind};
use crate::core_ftpcommand::engine::SendOptions;
use crate::core_ftpcommand::ftpcommand::FtpCommand;
use crate::core_keepalive::KeepAliveMode;
use crate::core_reply::{directory_from_reply, Reply};
use crate::session::TlsState;
use log::{debug, info};
use tokio::time::Instant;

/// Result of `change_working_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    /// Path as the server (or the cache) spells it. Empty when the server
    /// does not report its working directory.
    pub path: String,
    pub path_type: ServerPathType,
    /// The requested directory was not accessible and a parent was used.
    pub path_was_cut: bool,
    pub cached_listing: Option<CachedListing>,
    /// Last `CWD` reply, `None` when no `CWD` was sent.
    pub reply: Option<Reply>,
}

impl ControlConnection {
    /// Working directory from the cache, or from `PWD` when nothing is
    /// cached or `force_refresh` is set. An empty string means the server
    /// did not say.
    pub async fn get_current_working_path(&self, force_refresh: bool) -> Result<String, CommandFailure> {
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        self.current_working_path(force_refresh).await
    }

    pub(crate) async fn current_working_path(&self, force_refresh: bool) -> Result<String, CommandFailure> {
        if !force_refresh {
            if let Some(path) = self.lock().session.working_path.clone() {
                return Ok(path);
            }
        }

        let pwd = FtpCommand::PWD.prepare(None)?;
        let path = match self.send_ftp_command(&pwd, SendOptions::default()).await {
            Ok(reply) if reply.is_success() => match directory_from_reply(reply.trimmed_text()) {
                Some(path) => path,
                None => {
                    self.close_socket();
                    self.release_keep_alive();
                    return Err(CommandFailure::NonRetryableFatal(
                        FailureDetail::new(
                            FailureKind::Protocol,
                            "unable to parse the working directory from the server reply",
                        )
                        .with_reply(reply)
                        .closed(),
                    ));
                }
            },
            Ok(_) => String::new(),
            Err(e) if e.rejected_reply().is_some() => String::new(),
            Err(e) => return Err(e),
        };
        self.lock().session.working_path = Some(path.clone());
        Ok(path)
    }

    /// Sends `CWD path`, reconnecting first when the connection is gone.
    /// After a reconnect `start_path` is entered before `path` (for relative
    /// paths). Returns whether the server accepted the change.
    pub(crate) async fn send_change_working_path(
        &self,
        path: &str,
        start_path: Option<&str>,
    ) -> Result<(bool, Reply), CommandFailure> {
        let cwd = FtpCommand::CWD.prepare(Some(path))?;
        let opts = SendOptions::default().resets_working_path();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reconnected = self.reconnect_if_needed().await?;
            if reconnected {
                if let Some(start) = start_path.filter(|s| !s.is_empty()) {
                    let start_cwd = FtpCommand::CWD.prepare(Some(start))?;
                    match self.send_ftp_command(&start_cwd, opts).await {
                        Ok(_) => {}
                        Err(e) if e.rejected_reply().is_some() => {}
                        Err(e) if e.is_retryable() && self.may_retry(attempts) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
            match self.send_ftp_command(&cwd, opts).await {
                Ok(reply) => return Ok((true, reply)),
                Err(e) => {
                    if let Some(reply) = e.rejected_reply() {
                        return Ok((false, reply.clone()));
                    }
                    if e.is_retryable() && self.may_retry(attempts) {
                        debug!("CWD failed ({}), reconnecting", e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn may_retry(&self, attempts: u32) -> bool {
        attempts <= self.lock().params.connect_retries
    }

    /// Changes to `path`, using the listing cache when possible.
    ///
    /// With a cached listing for the path (and no `force_refresh`) nothing
    /// goes to the server. Otherwise `CWD` + `PWD` are sent; when the
    /// directory is not accessible its parents are tried one by one.
    pub async fn change_working_path(
        &self,
        path: &str,
        force_refresh: bool,
    ) -> Result<PathChange, CommandFailure> {
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;

        let (first_reply, system_reply) = {
            let state = self.lock();
            (
                state.session.server_first_reply.clone(),
                state.session.server_system.clone(),
            )
        };
        let detect = |p: &str| {
            ServerPathType::detect(first_reply.as_deref(), system_reply.as_deref(), p)
        };

        let mut path = path.to_string();
        // the current directory needs no CWD
        let mut verified = false;
        let mut path_type;
        if path.is_empty() {
            self.reconnect_if_needed().await?;
            path = self.current_working_path(false).await?;
            path_type = detect(&path);
            verified = true;
        } else if path.starts_with('/') || path.starts_with('\\') {
            path_type = detect(&path[1..]);
            if matches!(path_type, ServerPathType::OpenVms | ServerPathType::Mvs) {
                path.remove(0);
                if path.is_empty() {
                    path = match path_type {
                        ServerPathType::OpenVms => "[000000]".to_string(),
                        _ => "''".to_string(),
                    };
                }
            } else {
                path_type = detect(&path);
            }
        } else {
            path_type = detect(&path);
        }

        if force_refresh {
            info!("Refreshing path {}", path);
        } else {
            info!("Changing path to {}", path);
        }

        let (use_cache, mut resuscitate) = {
            let mut state = self.lock();
            let connected = state.socket.as_ref().is_some_and(|s| !s.is_closed());
            let keep_alive = connected && state.params.keep_alive.enabled;
            // any path change restarts the idle period
            if keep_alive {
                state.keep_alive.started_at = Instant::now();
            }
            let resuscitate = keep_alive && state.keep_alive.mode == KeepAliveMode::None;
            (state.params.use_listings_cache && !force_refresh, resuscitate)
        };

        let mut path_was_cut = false;
        let mut reply = None;
        let mut cached_listing = None;
        loop {
            if use_cache {
                let key = self.listing_key(path_type, &path);
                if let Some(hit) = self.inner.ctx.cache.get_path_listing(&key).await {
                    debug!("Listing of {} found in the cache", hit.key.path);
                    path = hit.key.path.clone();
                    cached_listing = Some(hit);
                    break;
                }
            }
            if verified {
                break;
            }
            resuscitate = false;

            let (changed, cwd_reply) = self.send_change_working_path(&path, None).await?;
            reply = Some(cwd_reply);
            if changed {
                let server_path = self.current_working_path(true).await?;
                verified = true;
                if server_path.is_empty() || path_type.is_same_path(&server_path, &path) {
                    if !server_path.is_empty() {
                        path = server_path;
                    }
                    break;
                }
                // the server canonicalized the path, look it up again
                path_type = detect(&server_path);
                path = server_path;
                continue;
            }

            match path_type.cut_directory(&path) {
                Some((parent, cut)) => {
                    debug!("Cannot change to {}, trying without {}", path, cut);
                    path = parent;
                    path_was_cut = true;
                }
                None => {
                    let current = self.current_working_path(true).await?;
                    if current.is_empty() {
                        path.clear();
                        break;
                    }
                    return Err(CommandFailure::NonRetryableFatal(
                        FailureDetail::new(
                            FailureKind::Protocol,
                            format!("Cannot change to path {}", path),
                        )
                        .with_reply_opt(reply),
                    ));
                }
            }
        }

        if cached_listing.is_some() && resuscitate {
            // a cache hit counts as activity on an idle connection
            self.wait_for_end_of_keep_alive().await?;
            self.setup_keep_alive_timer(true);
        }

        Ok(PathChange {
            path,
            path_type,
            path_was_cut,
            cached_listing,
            reply,
        })
    }

    /// Stores the listing of `path` fetched over a data connection. With the
    /// listings cache disabled the whole cache is dropped instead.
    pub async fn cache_path_listing(&self, path_type: ServerPathType, path: &str, listing: Vec<u8>) {
        let use_cache = self.lock().params.use_listings_cache;
        let cache = &self.inner.ctx.cache;
        if !use_cache {
            cache.clear().await;
            return;
        }
        let key = self.listing_key(path_type, path);
        cache
            .add_or_update_path_listing(CachedListing::new(key, listing))
            .await;
    }

    /// Listing cache key of `path` on this connection.
    pub fn listing_key(&self, path_type: ServerPathType, path: &str) -> ListingKey {
        let state = self.lock();
        ListingKey {
            host: state.params.host.clone(),
            port: state.params.port,
            user: state.params.cache_user().map(str::to_string),
            path_type,
            path: path.to_string(),
            list_command: state.params.list_command_text().to_string(),
            is_ftps: state.session.tls_state != TlsState::None,
        }
    }
}
