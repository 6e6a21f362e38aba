//! Error type for the queue, lap, and status stores.

/// Errors that can occur while reading or writing durable race state.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` query or connection failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly` command failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A status or session record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `Dragonfly` key was absent.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A stored row holds a value outside its domain (for example a car
    /// number that does not fit in `u8`).
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A connection URL or pool setting was rejected.
    #[error("Configuration error: {0}")]
    Config(String),
}
