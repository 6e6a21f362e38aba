//! Session archive and lap history.
//!
//! Every promoted race gets a `sessions` row and every accepted lap a
//! `lap_times` row. The in-memory ledger is discarded when a session ends;
//! these tables are what remains. On restart with a session in flight the
//! ledger is rebuilt from [`LapStore::load_session`].

use chrono::{DateTime, Utc};
use raceway_types::{ActiveSession, LapRecord, RaceId};
use sqlx::PgPool;

use crate::error::DbError;
use crate::queue_store::race_id_to_db;

/// Operations on the `sessions` and `lap_times` tables.
pub struct LapStore<'a> {
    pool: &'a PgPool,
}

impl<'a> LapStore<'a> {
    /// Create a lap store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Archive a newly started session. Re-archiving the same id is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the roster cannot be encoded
    /// or [`DbError::Postgres`] if the insert fails.
    pub async fn begin_session(&self, session: &ActiveSession) -> Result<(), DbError> {
        let roster = serde_json::to_value(&session.roster)?;
        let total = i32::try_from(session.total_duration_seconds).unwrap_or(i32::MAX);

        sqlx::query(
            r"INSERT INTO sessions (id, name, roster, total_duration_seconds, started_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(race_id_to_db(session.session_id))
        .bind(&session.name)
        .bind(roster)
        .bind(total)
        .bind(session.started_at)
        .execute(self.pool)
        .await?;

        tracing::debug!(session_id = %session.session_id, "Archived session");
        Ok(())
    }

    /// Stamp the end time of a session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn end_session(
        &self,
        session_id: RaceId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE sessions SET ended_at = $2 WHERE id = $1 AND ended_at IS NULL")
            .bind(race_id_to_db(session_id))
            .bind(ended_at)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Append one lap.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails (including a
    /// duplicate `(session, car, sequence)`).
    pub async fn append(&self, session_id: RaceId, lap: &LapRecord) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO lap_times (session_id, car_number, sequence, lap_millis, recorded_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(race_id_to_db(session_id))
        .bind(i16::from(lap.car_number))
        .bind(i32::try_from(lap.sequence).unwrap_or(i32::MAX))
        .bind(lap.lap_millis)
        .bind(lap.recorded_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// All laps of a session, ordered by car then sequence.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::CorruptRow`] if a stored value is out of range.
    pub async fn load_session(&self, session_id: RaceId) -> Result<Vec<LapRecord>, DbError> {
        let rows = sqlx::query_as::<_, LapRow>(
            r"SELECT session_id, car_number, sequence, lap_millis, recorded_at
              FROM lap_times
              WHERE session_id = $1
              ORDER BY car_number, sequence",
        )
        .bind(race_id_to_db(session_id))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(LapRow::into_record).collect()
    }
}

/// A row from the `lap_times` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LapRow {
    /// Session the lap belongs to.
    pub session_id: i64,
    /// Car number.
    pub car_number: i16,
    /// 1-based lap number.
    pub sequence: i32,
    /// Lap duration in milliseconds.
    pub lap_millis: i64,
    /// When the press happened.
    pub recorded_at: DateTime<Utc>,
}

impl LapRow {
    /// Convert to the domain record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::CorruptRow`] if the car number or sequence is
    /// out of range.
    pub fn into_record(self) -> Result<LapRecord, DbError> {
        let car_number = u8::try_from(self.car_number).map_err(|e| {
            DbError::CorruptRow(format!("lap_times.car_number {}: {e}", self.car_number))
        })?;
        let sequence = u32::try_from(self.sequence).map_err(|e| {
            DbError::CorruptRow(format!("lap_times.sequence {}: {e}", self.sequence))
        })?;
        Ok(LapRecord {
            car_number,
            sequence,
            lap_millis: self.lap_millis,
            recorded_at: self.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(car_number: i16, sequence: i32) -> LapRow {
        LapRow {
            session_id: 1,
            car_number,
            sequence,
            lap_millis: 12_000,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_record() {
        let record = row(3, 2).into_record();
        assert_eq!(record.as_ref().map(|r| r.car_number).ok(), Some(3));
        assert_eq!(record.map(|r| r.sequence).ok(), Some(2));
    }

    #[test]
    fn out_of_range_values_are_corrupt() {
        assert!(matches!(row(-1, 1).into_record(), Err(DbError::CorruptRow(_))));
        assert!(matches!(row(1, -5).into_record(), Err(DbError::CorruptRow(_))));
    }
}
