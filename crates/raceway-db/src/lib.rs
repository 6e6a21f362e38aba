//! Data layer for Raceway (`Dragonfly` + `PostgreSQL`).
//!
//! `PostgreSQL` keeps the race queue and the lap archive so they survive
//! restarts. `Dragonfly` keeps the status snapshot written on every
//! countdown tick, which is what lets a restarted engine resume a race
//! with the time it actually had left.
//!
//! ```text
//! control loop --StateSink--> persister task
//!                                 |-- QueueStore  -> races, race_drivers
//!                                 |-- LapStore    -> sessions, lap_times
//!                                 +-- DragonflyPool -> race:status, race:session
//! ```
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` status and session records
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`queue_store`] -- Race queue rows
//! - [`lap_store`] -- Session archive and lap history
//! - [`error`] -- Shared error type

pub mod dragonfly;
pub mod error;
pub mod lap_store;
pub mod postgres;
pub mod queue_store;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use lap_store::{LapRow, LapStore};
pub use postgres::PostgresPool;
pub use queue_store::{DriverRow, QueueStore, RaceRow};
