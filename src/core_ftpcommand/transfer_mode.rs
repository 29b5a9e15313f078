use crate::core_connection::connection::ControlConnection;
use crate::core_connection::error::{CommandFailure, EngineError};
use crate::core_ftpcommand::engine::SendOptions;
use crate::core_ftpcommand::ftpcommand::FtpCommand;
use crate::session::TransferMode;
use log::debug;

impl ControlConnection {
    /// Sets `TYPE A` or `TYPE I`. Nothing is sent when the cached mode is
    /// already the right one, unless `force` is set. Returns whether the
    /// server accepted the mode.
    pub async fn set_current_transfer_mode(
        &self,
        ascii: bool,
        force: bool,
    ) -> Result<bool, CommandFailure> {
        let _guard = self
            .inner
            .command_guard
            .try_lock()
            .map_err(|_| EngineError::Busy)?;
        self.transfer_mode(ascii, force).await
    }

    pub(crate) async fn transfer_mode(&self, ascii: bool, force: bool) -> Result<bool, CommandFailure> {
        let wanted = if ascii {
            TransferMode::Ascii
        } else {
            TransferMode::Binary
        };
        if !force && self.lock().session.transfer_mode == wanted {
            return Ok(true);
        }

        let arg = if ascii { "A" } else { "I" };
        let command = FtpCommand::TYPE.prepare(Some(arg))?;
        let accepted = match self.send_ftp_command(&command, SendOptions::default()).await {
            Ok(reply) => reply.is_success(),
            Err(e) if e.rejected_reply().is_some() => false,
            Err(e) => {
                self.lock().session.transfer_mode = TransferMode::Unknown;
                return Err(e);
            }
        };
        let mut state = self.lock();
        if accepted {
            state.session.transfer_mode = wanted;
        } else {
            debug!("TYPE {} refused by the server", arg);
            state.session.transfer_mode = TransferMode::Unknown;
        }
        Ok(accepted)
    }
}
