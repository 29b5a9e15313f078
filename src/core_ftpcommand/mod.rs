// Here's the command side of the control connection
pub mod engine;
pub mod ftpcommand;
pub mod transfer_mode;
pub mod working_path;

#[cfg(test)]
mod test_ftpcommand;

pub use engine::SendOptions;
pub use ftpcommand::{FtpCommand, PreparedCommand};
pub use working_path::PathChange;
