//! HTTP API and push channel for Raceway.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **Push channel** (`/ws?role=`) carrying every race event to the venue
//!   displays and accepting their commands (start, flag changes, end, lap
//!   presses)
//! - **Queue REST endpoints** for the front desk (create, edit, remove
//!   races and their rosters)
//! - **Session REST endpoints** for read-only queries (status, laps,
//!   leaderboard)
//!
//! # Architecture
//!
//! The server holds no race state. Every request becomes a message to the
//! control loop through a
//! [`ControlHandle`](raceway_core::runner::ControlHandle), so HTTP and
//! push-channel commands are ordered together with countdown ticks.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError};
pub use startup::{StartupError, spawn_observer};
pub use state::AppState;
