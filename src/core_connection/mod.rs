pub mod connection;
pub mod error;
pub mod establish;
pub mod handoff;
pub mod ui;

#[cfg(test)]
mod test_connection;

pub use connection::{ControlConnection, EngineContext};
pub use error::{CommandFailure, CommandResult, EngineError, FailureDetail, FailureKind, Outcome};
pub use establish::ConnectSubState;
pub use ui::{CancelFlag, NoUserInterface, UserInterface};
