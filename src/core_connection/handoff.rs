use crate::core_connection::connection::{lock_pair, ConnState, ControlConnection};
use crate::core_connection::error::{CommandFailure, EngineError};
use log::debug;

impl ControlConnection {
    /// Moves this connection's live control socket to `worker`, along with
    /// the session caches. Returns false when there was nothing to move.
    pub async fn give_connection_to_worker(
        &self,
        worker: &ControlConnection,
    ) -> Result<bool, CommandFailure> {
        move_connection(self, worker).await
    }

    /// Takes the live control socket back from `worker`.
    pub async fn get_connection_from_worker(
        &self,
        worker: &ControlConnection,
    ) -> Result<bool, CommandFailure> {
        move_connection(worker, self).await
    }
}

fn is_live(state: &ConnState) -> bool {
    state.socket.as_ref().is_some_and(|s| !s.is_closed())
}

fn same_target(a: &ConnState, b: &ConnState) -> bool {
    a.params.host.eq_ignore_ascii_case(&b.params.host)
        && a.params.port == b.params.port
        && a.params.user == b.params.user
}

async fn move_connection(
    from: &ControlConnection,
    to: &ControlConnection,
) -> Result<bool, CommandFailure> {
    if from.is_same(to) {
        return Ok(false);
    }
    let _from_guard = from
        .inner
        .command_guard
        .try_lock()
        .map_err(|_| EngineError::Busy)?;
    let _to_guard = to
        .inner
        .command_guard
        .try_lock()
        .map_err(|_| EngineError::Busy)?;

    from.wait_for_end_of_keep_alive().await?;
    to.wait_for_end_of_keep_alive().await?;

    let moved = {
        let (mut src, mut dst) = lock_pair(from, to);
        if !is_live(&src) || is_live(&dst) || !same_target(&src, &dst) {
            false
        } else {
            std::mem::swap(&mut src.socket, &mut dst.socket);
            if is_live(&dst) && !is_live(&src) {
                let log_id = dst.session.log_id;
                dst.session = src.session.clone();
                dst.session.log_id = log_id;
                src.session.reset_working_path_cache();
                src.session.reset_transfer_mode_cache();
                true
            } else {
                // the socket died during the swap
                std::mem::swap(&mut src.socket, &mut dst.socket);
                false
            }
        }
    };

    if !moved {
        debug!("Connection hand-off skipped");
        from.setup_keep_alive_timer(false);
        to.setup_keep_alive_timer(false);
        return Ok(false);
    }

    // whatever `to` had before is dead, drop it with the source side
    from.close_socket();
    from.release_keep_alive();
    let log = &to.ctx().log;
    log.set_connected(from.log_id(), false);
    log.set_connected(to.log_id(), true);
    from.log_message("Connection handed over.\r\n");
    to.log_message("Connection taken over.\r\n");
    debug!("Control connection to {} handed over", to.lock().params.host);
    to.setup_keep_alive_timer(false);
    Ok(true)
}
