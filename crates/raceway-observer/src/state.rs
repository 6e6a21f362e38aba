//! Shared application state for the HTTP server.
//!
//! The server owns no race state of its own. Every handler and every
//! push-channel connection goes through the [`ControlHandle`], so reads
//! and writes are ordered by the control loop like any other command.

use raceway_core::runner::ControlHandle;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the control loop.
    pub control: ControlHandle,
}

impl AppState {
    /// Wrap a control-loop handle.
    pub const fn new(control: ControlHandle) -> Self {
        Self { control }
    }
}
