//! `Dragonfly` (Redis-compatible) status snapshot.
//!
//! `Dragonfly` holds the small, hot record that lets a restarted engine
//! resume a countdown in flight instead of granting a fresh race.
//!
//! # Key Patterns
//!
//! | Key | Type | Description |
//! |-----|------|-------------|
//! | `race:status` | JSON | [`RaceStatus`], written every tick and transition |
//! | `race:session` | JSON | [`ActiveSession`], written on start, deleted on end |

use fred::prelude::*;
use raceway_types::{ActiveSession, RaceStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Key holding the serialized [`RaceStatus`].
pub const STATUS_KEY: &str = "race:status";

/// Key holding the serialized [`ActiveSession`].
pub const SESSION_KEY: &str = "race:session";

/// Connection handle to a `Dragonfly` instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at `redis://host:port[/db]`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed and
    /// [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    // =========================================================================
    // Generic JSON get/set/delete
    // =========================================================================

    /// Serialize `value` as JSON and store it at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] or [`DbError::Dragonfly`].
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.client.set(key, json.as_str(), None, None, false).await?;
        Ok(())
    }

    /// Read and deserialize the JSON value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::KeyNotFound`] if the key does not exist, or
    /// [`DbError::Serialization`] / [`DbError::Dragonfly`].
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        value.map_or_else(
            || Err(DbError::KeyNotFound(key.to_owned())),
            |s| Ok(serde_json::from_str(&s)?),
        )
    }

    /// Delete `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<(), DbError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }

    // =========================================================================
    // Race state -- race:status, race:session
    // =========================================================================

    /// Store the status record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn save_status(&self, status: &RaceStatus) -> Result<(), DbError> {
        self.set_json(STATUS_KEY, status).await
    }

    /// Load the status record, or `None` if none was ever saved.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or deserialization fails.
    pub async fn load_status(&self) -> Result<Option<RaceStatus>, DbError> {
        optional(self.get_json(STATUS_KEY).await)
    }

    /// Store the active session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn save_session(&self, session: &ActiveSession) -> Result<(), DbError> {
        self.set_json(SESSION_KEY, session).await
    }

    /// Load the active session, or `None` when idle.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or deserialization fails.
    pub async fn load_session(&self) -> Result<Option<ActiveSession>, DbError> {
        optional(self.get_json(SESSION_KEY).await)
    }

    /// Remove the active session record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn clear_session(&self) -> Result<(), DbError> {
        self.delete(SESSION_KEY).await
    }

    /// Delete every key in the current database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the quit command fails.
    pub async fn close(&self) -> Result<(), DbError> {
        self.client.quit().await?;
        tracing::info!("Dragonfly connection closed");
        Ok(())
    }
}

fn optional<T>(result: Result<T, DbError>) -> Result<Option<T>, DbError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DbError::KeyNotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_becomes_none() {
        let result: Result<Option<u32>, DbError> =
            optional(Err(DbError::KeyNotFound(STATUS_KEY.to_owned())));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn other_errors_pass_through() {
        let result: Result<Option<u32>, DbError> =
            optional(Err(DbError::Config("bad".to_owned())));
        assert!(matches!(result, Err(DbError::Config(_))));
    }
}
