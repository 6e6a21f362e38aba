//! Rebuilding race state after a restart.
//!
//! The queue comes back from `PostgreSQL`. The session comes back only
//! when `Dragonfly` holds a running status and a session record that
//! agree. The status is the record written every tick, so it supplies the
//! mode, remaining time, and total duration; the session record supplies
//! the roster and start time. Laps are replayed from the archive.

use raceway_core::queue::RaceQueue;
use raceway_db::{DbError, DragonflyPool, LapStore, PostgresPool, QueueStore};
use raceway_types::{ActiveSession, LapRecord, RaceQueueEntry, RaceStatus, SafetyMode};
use tracing::{info, warn};

/// State recovered from durable storage.
#[derive(Debug, Default)]
pub struct RestoredState {
    /// Queued races in FIFO order.
    pub queue: RaceQueue,
    /// The session in flight and its laps, if one survives.
    pub session: Option<(ActiveSession, Vec<LapRecord>)>,
}

impl RestoredState {
    /// Snapshot of the restored queue, as the persister's starting point.
    pub fn queue_entries(&self) -> Vec<RaceQueueEntry> {
        self.queue.snapshot()
    }
}

/// Decide which session, if any, resumes.
///
/// - A running status with time left and a session record resumes with
///   the timer armed at the stored remaining time.
/// - A running `Finished` status resumes in `Finished` with the timer
///   stopped. A running status at zero seconds counts as `Finished`.
/// - A stopped status, a missing session record, or an inconsistent
///   status yields `None` and the engine starts idle.
pub fn reconcile(
    status: Option<RaceStatus>,
    session: Option<ActiveSession>,
) -> Option<ActiveSession> {
    let status = status?;
    let Some(mut session) = session else {
        if status.running {
            warn!("Status says running but no session record exists, starting idle");
        }
        return None;
    };

    if !status.running {
        warn!(session_id = %session.session_id, "Discarding stale session record");
        return None;
    }
    if !status.is_consistent() {
        warn!(
            remaining_seconds = status.remaining_seconds,
            total_duration_seconds = status.total_duration_seconds,
            "Discarding inconsistent status snapshot"
        );
        return None;
    }

    session.running = true;
    session.remaining_seconds = status.remaining_seconds;
    session.total_duration_seconds = status.total_duration_seconds;
    session.mode = if status.remaining_seconds == 0 {
        SafetyMode::Finished
    } else {
        status.mode
    };
    Some(session)
}

/// Load everything needed to resume.
///
/// # Errors
///
/// Returns [`DbError`] if any read fails. The caller falls back to an
/// empty, idle start.
pub async fn load(
    postgres: &PostgresPool,
    dragonfly: &DragonflyPool,
) -> Result<RestoredState, DbError> {
    let queue_store = QueueStore::new(postgres.pool());
    let entries = queue_store.load_all().await?;
    let mut next_id = queue_store.next_race_id().await?;

    let status = dragonfly.load_status().await?;
    let stored_session = dragonfly.load_session().await?;

    let session = match reconcile(status, stored_session) {
        Some(session) => {
            let laps = LapStore::new(postgres.pool())
                .load_session(session.session_id)
                .await?;
            if let Some(after) = session.session_id.next() {
                next_id = next_id.max(after);
            }
            Some((session, laps))
        }
        None => None,
    };

    info!(
        queued = entries.len(),
        next_id = %next_id,
        session = session.is_some(),
        "Restored state"
    );

    Ok(RestoredState {
        queue: RaceQueue::restore(entries, next_id),
        session,
    })
}

/// Decide whether storage stays attached after a restore attempt.
///
/// The persister diffs every queue change against the queue it was seeded
/// with. If restore failed, the in-memory queue no longer matches storage
/// and those diffs would delete stored races, so storage is dropped and
/// the engine runs without persistence.
pub fn keep_storage<S>(
    storage: S,
    restored: Result<RestoredState, DbError>,
) -> (Option<S>, RestoredState) {
    match restored {
        Ok(state) => (Some(storage), state),
        Err(e) => {
            warn!(error = %e, "Restore failed, running without persistence");
            (None, RestoredState::default())
        }
    }
}
