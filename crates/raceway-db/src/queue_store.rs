//! Race queue persistence.
//!
//! The queue lives in two tables: `races` (one row per queued race,
//! ordered by `position`) and `race_drivers` (one row per roster slot).
//! Roster writes replace the whole roster inside a transaction so a
//! reader never sees half an edit.

use std::collections::BTreeMap;

use raceway_types::{DriverAssignment, RaceId, RaceQueueEntry};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::DbError;

/// Operations on the `races` and `race_drivers` tables.
pub struct QueueStore<'a> {
    pool: &'a PgPool,
}

impl<'a> QueueStore<'a> {
    /// Create a queue store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load the whole queue in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails, or
    /// [`DbError::CorruptRow`] if a stored id or car number is out of range.
    pub async fn load_all(&self) -> Result<Vec<RaceQueueEntry>, DbError> {
        let races = sqlx::query_as::<_, RaceRow>(
            r"SELECT id, name, position, created_at
              FROM races
              ORDER BY position, id",
        )
        .fetch_all(self.pool)
        .await?;

        let drivers = sqlx::query_as::<_, DriverRow>(
            r"SELECT race_id, driver_name, car_number, slot
              FROM race_drivers
              ORDER BY race_id, slot",
        )
        .fetch_all(self.pool)
        .await?;

        let mut rosters: BTreeMap<i64, Vec<DriverAssignment>> = BTreeMap::new();
        for row in drivers {
            let car_number = u8::try_from(row.car_number).map_err(|e| {
                DbError::CorruptRow(format!("race_drivers.car_number {}: {e}", row.car_number))
            })?;
            rosters
                .entry(row.race_id)
                .or_default()
                .push(DriverAssignment::new(row.driver_name, car_number));
        }

        let mut entries = Vec::with_capacity(races.len());
        for race in races {
            entries.push(RaceQueueEntry {
                id: race_id_from_db(race.id)?,
                name: race.name,
                drivers: rosters.remove(&race.id).unwrap_or_default(),
            });
        }

        tracing::debug!(count = entries.len(), "Loaded race queue");
        Ok(entries)
    }

    /// Insert a race at the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, entry: &RaceQueueEntry) -> Result<(), DbError> {
        let id = race_id_to_db(entry.id);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"INSERT INTO races (id, name, position)
              VALUES ($1, $2, $1)",
        )
        .bind(id)
        .bind(&entry.name)
        .execute(&mut *tx)
        .await?;

        insert_drivers(&mut tx, id, &entry.drivers).await?;
        tx.commit().await?;

        tracing::debug!(race_id = %entry.id, "Inserted race");
        Ok(())
    }

    /// Delete a race and its roster.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete(&self, id: RaceId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM races WHERE id = $1")
            .bind(race_id_to_db(id))
            .execute(self.pool)
            .await?;
        tracing::debug!(race_id = %id, "Deleted race");
        Ok(())
    }

    /// Replace a race's roster.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a statement fails. Nothing is
    /// written in that case.
    pub async fn replace_roster(
        &self,
        id: RaceId,
        drivers: &[DriverAssignment],
    ) -> Result<(), DbError> {
        let id = race_id_to_db(id);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM race_drivers WHERE race_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_drivers(&mut tx, id, drivers).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Rename a race.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn rename(&self, id: RaceId, name: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE races SET name = $2 WHERE id = $1")
            .bind(race_id_to_db(id))
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// The smallest id that has never been used by a queued or promoted
    /// race.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn next_race_id(&self) -> Result<RaceId, DbError> {
        let (max,): (Option<i64>,) = sqlx::query_as(
            r"SELECT GREATEST(
                  (SELECT MAX(id) FROM races),
                  (SELECT MAX(id) FROM sessions)
              )",
        )
        .fetch_one(self.pool)
        .await?;

        let next = max
            .map(race_id_from_db)
            .transpose()?
            .and_then(RaceId::next)
            .unwrap_or(RaceId::FIRST);
        Ok(next)
    }
}

async fn insert_drivers(
    tx: &mut Transaction<'_, Postgres>,
    race_id: i64,
    drivers: &[DriverAssignment],
) -> Result<(), DbError> {
    if drivers.is_empty() {
        return Ok(());
    }

    let len = drivers.len();
    let mut race_ids = Vec::with_capacity(len);
    let mut names = Vec::with_capacity(len);
    let mut cars = Vec::with_capacity(len);
    let mut slots = Vec::with_capacity(len);

    for (slot, driver) in (0i16..).zip(drivers) {
        race_ids.push(race_id);
        names.push(driver.driver_name.clone());
        cars.push(i16::from(driver.car_number));
        slots.push(slot);
    }

    sqlx::query(
        r"INSERT INTO race_drivers (race_id, driver_name, car_number, slot)
          SELECT * FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::SMALLINT[], $4::SMALLINT[])",
    )
    .bind(&race_ids)
    .bind(&names)
    .bind(&cars)
    .bind(&slots)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Convert a race id to its `BIGINT` column value.
pub(crate) fn race_id_to_db(id: RaceId) -> i64 {
    i64::try_from(id.into_inner()).unwrap_or(i64::MAX)
}

/// Convert a `BIGINT` column value to a race id.
pub(crate) fn race_id_from_db(id: i64) -> Result<RaceId, DbError> {
    u64::try_from(id)
        .map(RaceId)
        .map_err(|e| DbError::CorruptRow(format!("race id {id}: {e}")))
}

/// A row from the `races` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RaceRow {
    /// Race id.
    pub id: i64,
    /// Race name.
    pub name: String,
    /// Queue position (FIFO order).
    pub position: i64,
    /// When the race was queued.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A row from the `race_drivers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriverRow {
    /// Owning race id.
    pub race_id: i64,
    /// Driver display name.
    pub driver_name: String,
    /// Car number.
    pub car_number: i16,
    /// Position within the roster.
    pub slot: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_id_conversion() {
        assert_eq!(race_id_to_db(RaceId(42)), 42);
        assert_eq!(race_id_to_db(RaceId(u64::MAX)), i64::MAX);
        assert_eq!(race_id_from_db(7).ok(), Some(RaceId(7)));
        assert!(matches!(race_id_from_db(-1), Err(DbError::CorruptRow(_))));
    }
}
