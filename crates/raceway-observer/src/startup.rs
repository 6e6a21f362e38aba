//! Server startup helper for embedding in the engine binary.
//!
//! ```rust,ignore
//! use raceway_observer::startup::spawn_observer;
//! use raceway_observer::state::AppState;
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::new(handle));
//! let server = spawn_observer(3000, state).await?;
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind `0.0.0.0:{port}` and serve the API on a background task.
///
/// The socket is bound before this returns, so a taken port is reported
/// here instead of from inside the task. The server runs until the
/// returned handle is aborted or the runtime shuts down.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address cannot be bound.
pub async fn spawn_observer(
    port: u16,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = crate::server::bind(&ServerConfig::on_port(port)).await?;

    let handle = tokio::spawn(async move {
        if let Err(e) = crate::server::serve(listener, state).await {
            tracing::error!(error = %e, "HTTP server exited with error");
        }
    });

    tracing::info!(port, "HTTP server spawned on background task");
    Ok(handle)
}
