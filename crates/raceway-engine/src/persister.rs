//! Background persistence of race state.
//!
//! The control loop never awaits storage. [`ChannelSink`] turns each
//! [`StateSink`] callback into a [`PersistCommand`] on an unbounded
//! channel, and [`Persister::run`] applies them in order on its own task.
//! Write failures are logged and dropped; they never reach race control.
//!
//! Queue changes arrive as full snapshots. The persister keeps the last
//! snapshot it wrote and turns each new one into row-level operations with
//! [`diff_queue`].

use chrono::Utc;
use raceway_core::sink::StateSink;
use raceway_db::{DbError, DragonflyPool, LapStore, PostgresPool, QueueStore};
use raceway_types::{ActiveSession, DriverAssignment, LapRecord, RaceId, RaceQueueEntry, RaceStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One durable change, in the order the control loop made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistCommand {
    /// The full queue after a change.
    Queue(Vec<RaceQueueEntry>),
    /// The status record after a tick or transition.
    Status(RaceStatus),
    /// A session was activated.
    SessionStarted(ActiveSession),
    /// The active session was ended.
    SessionEnded,
    /// A lap was accepted.
    Lap {
        /// Session the lap belongs to.
        session_id: RaceId,
        /// The lap.
        lap: LapRecord,
    },
}

/// [`StateSink`] that forwards every change to the persister task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl ChannelSink {
    fn send(&self, command: PersistCommand) {
        if self.tx.send(command).is_err() {
            debug!("Persister stopped, dropping state change");
        }
    }
}

/// Create a sink and the receiving end for [`Persister::run`].
pub fn channel_sink() -> (ChannelSink, mpsc::UnboundedReceiver<PersistCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

impl StateSink for ChannelSink {
    fn queue_changed(&mut self, queue: &[RaceQueueEntry]) {
        self.send(PersistCommand::Queue(queue.to_vec()));
    }

    fn status_changed(&mut self, status: &RaceStatus) {
        self.send(PersistCommand::Status(*status));
    }

    fn session_changed(&mut self, session: Option<&ActiveSession>) {
        self.send(session.map_or(PersistCommand::SessionEnded, |s| {
            PersistCommand::SessionStarted(s.clone())
        }));
    }

    fn lap_recorded(&mut self, session: &ActiveSession, lap: &LapRecord) {
        self.send(PersistCommand::Lap {
            session_id: session.session_id,
            lap: lap.clone(),
        });
    }
}

// =============================================================================
// Queue diff
// =============================================================================

/// A row-level change to the stored queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    /// Remove a race (removed from the queue or promoted).
    Delete(RaceId),
    /// Rename a race.
    Rename {
        /// Race id.
        id: RaceId,
        /// New name.
        name: String,
    },
    /// Replace a race's roster.
    ReplaceRoster {
        /// Race id.
        id: RaceId,
        /// New roster.
        drivers: Vec<DriverAssignment>,
    },
    /// Add a new race.
    Insert(RaceQueueEntry),
}

/// Operations that turn the `previous` snapshot into `current`.
///
/// Deletes come first so a freed name can be reused by a rename or insert
/// in the same diff.
pub fn diff_queue(previous: &[RaceQueueEntry], current: &[RaceQueueEntry]) -> Vec<QueueOp> {
    let find = |entries: &[RaceQueueEntry], id: RaceId| entries.iter().find(|e| e.id == id).cloned();

    let mut deletes = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();

    for old in previous {
        if find(current, old.id).is_none() {
            deletes.push(QueueOp::Delete(old.id));
        }
    }

    for new in current {
        match find(previous, new.id) {
            None => inserts.push(QueueOp::Insert(new.clone())),
            Some(old) => {
                if old.name != new.name {
                    updates.push(QueueOp::Rename {
                        id: new.id,
                        name: new.name.clone(),
                    });
                }
                if old.drivers != new.drivers {
                    updates.push(QueueOp::ReplaceRoster {
                        id: new.id,
                        drivers: new.drivers.clone(),
                    });
                }
            }
        }
    }

    deletes.extend(updates);
    deletes.extend(inserts);
    deletes
}

// =============================================================================
// Persister task
// =============================================================================

/// Applies [`PersistCommand`]s to `PostgreSQL` and `Dragonfly`.
pub struct Persister {
    postgres: PostgresPool,
    dragonfly: DragonflyPool,
    queue: Vec<RaceQueueEntry>,
    session_id: Option<RaceId>,
}

impl Persister {
    /// Create a persister whose stored state currently matches `queue`
    /// and `session_id`.
    pub const fn new(
        postgres: PostgresPool,
        dragonfly: DragonflyPool,
        queue: Vec<RaceQueueEntry>,
        session_id: Option<RaceId>,
    ) -> Self {
        Self {
            postgres,
            dragonfly,
            queue,
            session_id,
        }
    }

    /// Apply commands until every sender is dropped, then close the
    /// connections.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PersistCommand>) {
        info!("Persister started");
        while let Some(command) = rx.recv().await {
            self.apply(command).await;
        }
        self.postgres.close().await;
        if let Err(e) = self.dragonfly.close().await {
            warn!(error = %e, "Failed to close Dragonfly connection");
        }
        info!("Persister stopped");
    }

    async fn apply(&mut self, command: PersistCommand) {
        match command {
            PersistCommand::Queue(queue) => self.write_queue(queue).await,
            PersistCommand::Status(status) => {
                if let Err(e) = self.dragonfly.save_status(&status).await {
                    warn!(error = %e, "Failed to persist race status");
                }
            }
            PersistCommand::SessionStarted(session) => {
                self.session_id = Some(session.session_id);
                if let Err(e) = LapStore::new(self.postgres.pool())
                    .begin_session(&session)
                    .await
                {
                    warn!(session_id = %session.session_id, error = %e, "Failed to archive session");
                }
                if let Err(e) = self.dragonfly.save_session(&session).await {
                    warn!(session_id = %session.session_id, error = %e, "Failed to persist session");
                }
            }
            PersistCommand::SessionEnded => {
                if let Some(id) = self.session_id.take()
                    && let Err(e) = LapStore::new(self.postgres.pool())
                        .end_session(id, Utc::now())
                        .await
                {
                    warn!(session_id = %id, error = %e, "Failed to close session archive");
                }
                if let Err(e) = self.dragonfly.clear_session().await {
                    warn!(error = %e, "Failed to clear session record");
                }
            }
            PersistCommand::Lap { session_id, lap } => {
                if let Err(e) = LapStore::new(self.postgres.pool())
                    .append(session_id, &lap)
                    .await
                {
                    warn!(
                        %session_id,
                        car_number = lap.car_number,
                        sequence = lap.sequence,
                        error = %e,
                        "Failed to archive lap"
                    );
                }
            }
        }
    }

    async fn write_queue(&mut self, queue: Vec<RaceQueueEntry>) {
        let ops = diff_queue(&self.queue, &queue);
        debug!(ops = ops.len(), "Persisting queue change");

        match self.apply_queue_ops(ops).await {
            Ok(()) => self.queue = queue,
            Err(e) => {
                warn!(error = %e, "Failed to persist queue change, reloading stored queue");
                // Diff the next change against what is really stored.
                self.queue = match QueueStore::new(self.postgres.pool()).load_all().await {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!(error = %e, "Failed to reload stored queue");
                        queue
                    }
                };
            }
        }
    }

    async fn apply_queue_ops(&self, ops: Vec<QueueOp>) -> Result<(), DbError> {
        let store = QueueStore::new(self.postgres.pool());
        for op in ops {
            match op {
                QueueOp::Delete(id) => store.delete(id).await?,
                QueueOp::Rename { id, name } => store.rename(id, &name).await?,
                QueueOp::ReplaceRoster { id, drivers } => {
                    store.replace_roster(id, &drivers).await?;
                }
                QueueOp::Insert(entry) => store.insert(&entry).await?,
            }
        }
        Ok(())
    }
}

/// Run `persister` on a background task.
pub fn spawn_persister(
    persister: Persister,
    rx: mpsc::UnboundedReceiver<PersistCommand>,
) -> JoinHandle<()> {
    tokio::spawn(persister.run(rx))
}
