//! The race session state machine.
//!
//! [`RaceControl`] is the single owned aggregate behind the control loop:
//! the queue, the active session, its lap ledger, and the countdown. Every
//! operation takes `&mut self`, applies fully or not at all, and publishes
//! the resulting events before returning. Nothing outside the control loop
//! ever holds a reference to it.
//!
//! ```text
//! Idle --start--> Running(Safe) <--set_mode--> Running(Hazard|Danger)
//!                      |                             |
//!                      +--set_mode(Finished)/expiry--+--> Finished
//!   any state --end--> Idle
//! ```

use chrono::{DateTime, Utc};
use raceway_types::{
    ActiveSession, CarLaps, DriverAssignment, LapRecord, LeaderboardRow, RaceEvent, RaceId,
    RaceQueueEntry, RaceStatus, ResyncBundle, SafetyMode, SubscriberRole,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::countdown::{Countdown, TickOutcome};
use crate::ledger::LapLedger;
use crate::queue::{QueueError, RaceQueue};
use crate::sink::StateSink;

/// Structural failures of session operations. State is unchanged when one
/// is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `start` was issued with an empty queue.
    #[error("no race is queued")]
    NoQueuedRace,

    /// The requested change is not allowed from the current mode.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// Mode at the time of the request (`danger` when idle).
        from: SafetyMode,
        /// Requested mode.
        to: SafetyMode,
    },

    /// No session is accepting laps.
    #[error("no race is running")]
    NotRunning,

    /// The car is not in the active roster.
    #[error("car {car_number} is not in the active roster")]
    UnknownCar {
        /// The rejected car number.
        car_number: u8,
    },
}

/// Owned state of the venue: queue, active session, ledger, countdown.
pub struct RaceControl {
    queue: RaceQueue,
    session: Option<ActiveSession>,
    ledger: Option<LapLedger>,
    countdown: Countdown,
    total_duration_seconds: u32,
    broadcaster: Broadcaster,
    sink: Box<dyn StateSink>,
}

impl core::fmt::Debug for RaceControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RaceControl")
            .field("queue", &self.queue)
            .field("session", &self.session)
            .field("countdown", &self.countdown)
            .field("total_duration_seconds", &self.total_duration_seconds)
            .finish_non_exhaustive()
    }
}

impl RaceControl {
    /// Create an idle controller over `queue`.
    pub fn new(
        queue: RaceQueue,
        total_duration_seconds: u32,
        broadcaster: Broadcaster,
        sink: Box<dyn StateSink>,
    ) -> Self {
        Self {
            queue,
            session: None,
            ledger: None,
            countdown: Countdown::stopped(),
            total_duration_seconds,
            broadcaster,
            sink,
        }
    }

    /// Reinstate a session that was in flight before a restart.
    ///
    /// The countdown resumes from the session's persisted remaining time
    /// unless it is `Finished`. `laps` rebuilds the ledger.
    pub fn restore_session(&mut self, session: ActiveSession, laps: Vec<LapRecord>) {
        let ledger = LapLedger::restore(&session.roster, session.started_at, laps);
        if session.running && !session.mode.is_finished() {
            self.countdown.start(session.remaining_seconds);
        } else {
            self.countdown.stop();
        }
        info!(
            session_id = %session.session_id,
            mode = %session.mode,
            remaining_seconds = session.remaining_seconds,
            "Session restored"
        );
        self.ledger = Some(ledger);
        self.session = Some(session);
    }

    // -----------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------

    /// Promote the head of the queue to the active session and start the
    /// countdown.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] while a session is active,
    /// [`SessionError::NoQueuedRace`] when the queue is empty.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<ActiveSession, SessionError> {
        if let Some(active) = &self.session {
            return Err(SessionError::InvalidTransition {
                from: active.mode,
                to: SafetyMode::Safe,
            });
        }
        let Ok(entry) = self.queue.dequeue_head() else {
            return Err(SessionError::NoQueuedRace);
        };

        let session = ActiveSession {
            session_id: entry.id,
            name: entry.name,
            roster: entry.drivers,
            mode: SafetyMode::Safe,
            running: true,
            remaining_seconds: self.total_duration_seconds,
            total_duration_seconds: self.total_duration_seconds,
            started_at: now,
        };
        self.ledger = Some(LapLedger::new(&session.roster, now));
        self.countdown.start(self.total_duration_seconds);
        self.session = Some(session.clone());

        info!(
            session_id = %session.session_id,
            name = %session.name,
            drivers = session.roster.len(),
            "Race started"
        );

        self.sink.session_changed(Some(&session));
        self.sink.status_changed(&session.status());
        self.broadcaster.publish(RaceEvent::SessionActivated {
            session: session.clone(),
        });
        self.publish_queue();
        Ok(session)
    }

    /// Change the safety mode of the running session.
    ///
    /// Setting `Finished` stops the countdown. Setting it again is a no-op
    /// that publishes nothing.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] when no session is active or
    /// when leaving `Finished`.
    pub fn set_mode(&mut self, mode: SafetyMode) -> Result<RaceStatus, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidTransition {
                from: SafetyMode::Danger,
                to: mode,
            });
        };

        if session.mode.is_finished() {
            if mode.is_finished() {
                return Ok(session.status());
            }
            return Err(SessionError::InvalidTransition {
                from: SafetyMode::Finished,
                to: mode,
            });
        }

        if mode.is_finished() {
            self.countdown.stop();
            session.remaining_seconds = self.countdown.remaining_seconds();
        }
        let from = session.mode;
        session.mode = mode;
        let status = session.status();
        info!(session_id = %session.session_id, %from, to = %mode, "Mode changed");

        self.publish_status(&status);
        Ok(status)
    }

    /// End the active session, if any, and return to idle.
    ///
    /// Always succeeds. The ledger is discarded and the queue is untouched.
    pub fn end(&mut self) -> RaceStatus {
        self.countdown.reset();
        self.ledger = None;
        match self.session.take() {
            Some(session) => info!(session_id = %session.session_id, "Session ended"),
            None => debug!("End requested while idle"),
        }

        let status = RaceStatus::idle(self.total_duration_seconds);
        self.sink.session_changed(None);
        self.sink.status_changed(&status);
        self.broadcaster.publish(RaceEvent::SessionCleared);
        status
    }

    /// Record a lap-line press.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotRunning`] when no session accepts laps,
    /// [`SessionError::UnknownCar`] when the car is not rostered.
    pub fn record_lap(
        &mut self,
        car_number: u8,
        pressed_at: DateTime<Utc>,
    ) -> Result<LapRecord, SessionError> {
        let (Some(session), Some(ledger)) = (self.session.as_ref(), self.ledger.as_mut()) else {
            return Err(SessionError::NotRunning);
        };
        if !session.running || session.mode.is_finished() {
            return Err(SessionError::NotRunning);
        }

        let lap = ledger.record(car_number, pressed_at)?;
        let lap_count = ledger.lap_count(car_number);
        let best = ledger.best_lap(car_number).unwrap_or(lap.lap_millis);
        debug!(
            session_id = %session.session_id,
            car_number,
            sequence = lap.sequence,
            lap_millis = lap.lap_millis,
            "Lap recorded"
        );

        self.sink.lap_recorded(session, &lap);
        self.broadcaster
            .publish(RaceEvent::lap_recorded(&lap, lap_count, best));
        Ok(lap)
    }

    /// Advance the countdown by one second.
    ///
    /// On expiry the session moves to `Finished` exactly as if an operator
    /// had set it.
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.countdown.tick();
        let Some(session) = self.session.as_mut() else {
            return outcome;
        };

        match outcome {
            TickOutcome::Idle => {}
            TickOutcome::Counting { remaining_seconds } => {
                session.remaining_seconds = remaining_seconds;
                let status = session.status();
                self.sink.status_changed(&status);
                self.broadcaster.publish(RaceEvent::tick(remaining_seconds));
            }
            TickOutcome::Expired => {
                session.remaining_seconds = 0;
                session.mode = SafetyMode::Finished;
                let status = session.status();
                info!(session_id = %session.session_id, "Race time expired");
                self.broadcaster.publish(RaceEvent::tick(0));
                self.publish_status(&status);
            }
        }
        outcome
    }

    /// Whether the countdown is consuming time.
    pub const fn timer_active(&self) -> bool {
        self.countdown.is_active()
    }

    // -----------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------

    /// Append a race to the queue.
    pub fn enqueue(
        &mut self,
        name: &str,
        roster: Vec<DriverAssignment>,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.queue.enqueue(name, roster)?;
        info!(race_id = %entry.id, name = %entry.name, "Race queued");
        self.publish_queue();
        Ok(entry)
    }

    /// Remove a queued race.
    pub fn remove_race(&mut self, id: RaceId) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.queue.remove(id)?;
        info!(race_id = %id, "Race removed from queue");
        self.publish_queue();
        Ok(entry)
    }

    /// Rename a queued race and/or replace its roster as one change.
    ///
    /// Publishes a single `queue-changed` when anything was applied.
    pub fn update_race(
        &mut self,
        id: RaceId,
        name: Option<&str>,
        roster: Option<Vec<DriverAssignment>>,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.queue.update(id, name, roster)?;
        self.publish_queue();
        Ok(entry)
    }

    /// Add one driver to a queued race.
    pub fn assign_driver(
        &mut self,
        id: RaceId,
        driver_name: &str,
        car_number: Option<u8>,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.queue.assign_driver(id, driver_name, car_number)?;
        self.publish_queue();
        Ok(entry)
    }

    /// Remove one driver from a queued race.
    pub fn unassign_driver(
        &mut self,
        id: RaceId,
        driver_name: &str,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.queue.unassign_driver(id, driver_name)?;
        self.publish_queue();
        Ok(entry)
    }

    /// The queue.
    pub const fn queue(&self) -> &RaceQueue {
        &self.queue
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// The active session, if any.
    pub const fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Current status record.
    pub fn status(&self) -> RaceStatus {
        self.session.as_ref().map_or_else(
            || RaceStatus::idle(self.total_duration_seconds),
            ActiveSession::status,
        )
    }

    /// Per-car lap summaries for the active session.
    pub fn laps(&self) -> Vec<CarLaps> {
        self.ledger
            .as_ref()
            .map(LapLedger::summaries)
            .unwrap_or_default()
    }

    /// Leaderboard for the active session.
    pub fn leaderboard(&self) -> Vec<LeaderboardRow> {
        self.ledger
            .as_ref()
            .map(LapLedger::leaderboard)
            .unwrap_or_default()
    }

    /// The active session's ledger.
    pub const fn ledger(&self) -> Option<&LapLedger> {
        self.ledger.as_ref()
    }

    /// Snapshot for a newly connected display with `role`.
    pub fn resync(&self, role: SubscriberRole) -> ResyncBundle {
        ResyncBundle {
            queue: self.queue.snapshot(),
            session: self.session.clone(),
            status: self.status(),
            laps: if role.receives_lap_history() {
                self.laps()
            } else {
                Vec::new()
            },
        }
    }

    /// Take a resync snapshot and subscribe in one step, so the receiver
    /// sees exactly the events that follow the snapshot.
    pub fn subscribe(
        &self,
        role: SubscriberRole,
    ) -> (ResyncBundle, broadcast::Receiver<RaceEvent>) {
        let rx = self.broadcaster.subscribe();
        (self.resync(role), rx)
    }

    fn publish_queue(&mut self) {
        let snapshot = self.queue.snapshot();
        self.sink.queue_changed(&snapshot);
        self.broadcaster
            .publish(RaceEvent::QueueChanged { queue: snapshot });
    }

    fn publish_status(&mut self, status: &RaceStatus) {
        self.sink.status_changed(status);
        self.broadcaster.publish(RaceEvent::session_updated(status));
    }
}
