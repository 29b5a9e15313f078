use std::sync::atomic::{AtomicBool, Ordering};

/// Narrow interface to the user interface driving a connection.
///
/// Every method has a headless default so the engine runs without any UI.
pub trait UserInterface: Send + Sync {
    /// Polled during waits; returns true once per ESC press.
    fn cancel_requested(&self) -> bool {
        false
    }

    fn show_wait(&self, _text: &str) {}

    fn hide_wait(&self) {}

    /// Asks whether the running command should be aborted (`abort_possible`)
    /// or the whole connection closed.
    fn confirm_cancel(&self, _abort_possible: bool) -> bool {
        true
    }

    /// Asks whether a lost connection should be re-established.
    fn confirm_reconnect(&self, _message: &str) -> bool {
        true
    }
}

/// No dialogs, no ESC.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUserInterface;

impl UserInterface for NoUserInterface {}

/// ESC flag set from another task (Ctrl-C handler, tests).
#[derive(Debug, Default)]
pub struct CancelFlag {
    requested: AtomicBool,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

impl UserInterface for CancelFlag {
    fn cancel_requested(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}
