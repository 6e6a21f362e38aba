//! The control loop: the single writer of race state.
//!
//! [`spawn_control_loop`] moves a [`RaceControl`] into a tokio task. Every
//! operator command, lap press, HTTP query, and countdown tick enters that
//! task through one `select!`, so operations apply strictly in arrival
//! order and no lock is needed. Callers talk to the loop through a
//! cloneable [`ControlHandle`]; each request carries a `oneshot` reply.
//!
//! Queued requests are served before a tick that falls due at the same
//! time. The countdown ticker is armed only while the countdown is
//! active. After every request or tick the loop re-checks
//! [`RaceControl::timer_active`], so `end` and `set_mode(Finished)` stop
//! ticking before their reply is sent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use raceway_types::{
    ActiveSession, CarLaps, DriverAssignment, LapRecord, LeaderboardRow, RaceEvent, RaceId,
    RaceQueueEntry, RaceStatus, ResyncBundle, SafetyMode, SubscriberRole,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::control::{RaceControl, SessionError};
use crate::countdown::Ticker;
use crate::queue::QueueError;

/// Requests that may wait in the loop's inbox before senders back off.
const REQUEST_CAPACITY: usize = 1024;

/// Errors returned through a [`ControlHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The control loop has stopped.
    #[error("race control is not running")]
    Unavailable,
}

/// The active session (if any) together with the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// The active session, or `None` when idle.
    pub session: Option<ActiveSession>,
    /// Current status record.
    pub status: RaceStatus,
}

/// What a new subscriber receives: its resync snapshot and the event
/// stream that continues from exactly that snapshot.
pub type Subscription = (ResyncBundle, broadcast::Receiver<RaceEvent>);

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

enum Request {
    Start {
        reply: Reply<ActiveSession>,
    },
    SetMode {
        mode: SafetyMode,
        reply: Reply<RaceStatus>,
    },
    End {
        reply: Reply<RaceStatus>,
    },
    RecordLap {
        car_number: u8,
        pressed_at: DateTime<Utc>,
        reply: Reply<LapRecord>,
    },
    Enqueue {
        name: String,
        roster: Vec<DriverAssignment>,
        reply: Reply<RaceQueueEntry>,
    },
    RemoveRace {
        id: RaceId,
        reply: Reply<RaceQueueEntry>,
    },
    UpdateRace {
        id: RaceId,
        name: Option<String>,
        roster: Option<Vec<DriverAssignment>>,
        reply: Reply<RaceQueueEntry>,
    },
    AssignDriver {
        id: RaceId,
        driver_name: String,
        car_number: Option<u8>,
        reply: Reply<RaceQueueEntry>,
    },
    UnassignDriver {
        id: RaceId,
        driver_name: String,
        reply: Reply<RaceQueueEntry>,
    },
    ListQueue {
        reply: Reply<Vec<RaceQueueEntry>>,
    },
    GetRace {
        id: RaceId,
        reply: Reply<RaceQueueEntry>,
    },
    PeekHead {
        reply: Reply<Option<RaceQueueEntry>>,
    },
    Session {
        reply: Reply<SessionView>,
    },
    Laps {
        reply: Reply<Vec<CarLaps>>,
    },
    Leaderboard {
        reply: Reply<Vec<LeaderboardRow>>,
    },
    Subscribe {
        role: SubscriberRole,
        reply: Reply<Subscription>,
    },
    Shutdown,
}

/// Cloneable handle to the control loop.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Request>,
}

impl ControlHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).await.is_err() {
            return Err(ControlError::Unavailable);
        }
        rx.await.unwrap_or(Err(ControlError::Unavailable))
    }

    /// Promote the head of the queue and start the countdown.
    pub async fn start(&self) -> Result<ActiveSession, ControlError> {
        self.call(|reply| Request::Start { reply }).await
    }

    /// Change the safety mode.
    pub async fn set_mode(&self, mode: SafetyMode) -> Result<RaceStatus, ControlError> {
        self.call(|reply| Request::SetMode { mode, reply }).await
    }

    /// End the active session.
    pub async fn end(&self) -> Result<RaceStatus, ControlError> {
        self.call(|reply| Request::End { reply }).await
    }

    /// Record a lap-line press. `None` means now.
    pub async fn record_lap(
        &self,
        car_number: u8,
        pressed_at: Option<DateTime<Utc>>,
    ) -> Result<LapRecord, ControlError> {
        let pressed_at = pressed_at.unwrap_or_else(Utc::now);
        self.call(|reply| Request::RecordLap {
            car_number,
            pressed_at,
            reply,
        })
        .await
    }

    /// Append a race to the queue.
    pub async fn enqueue(
        &self,
        name: String,
        roster: Vec<DriverAssignment>,
    ) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::Enqueue {
            name,
            roster,
            reply,
        })
        .await
    }

    /// Remove a queued race.
    pub async fn remove_race(&self, id: RaceId) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::RemoveRace { id, reply }).await
    }

    /// Rename a queued race and/or replace its roster in one request.
    pub async fn update_race(
        &self,
        id: RaceId,
        name: Option<String>,
        roster: Option<Vec<DriverAssignment>>,
    ) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::UpdateRace {
            id,
            name,
            roster,
            reply,
        })
        .await
    }

    /// Add a driver to a queued race. `None` picks the lowest free car.
    pub async fn assign_driver(
        &self,
        id: RaceId,
        driver_name: String,
        car_number: Option<u8>,
    ) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::AssignDriver {
            id,
            driver_name,
            car_number,
            reply,
        })
        .await
    }

    /// Remove a driver from a queued race.
    pub async fn unassign_driver(
        &self,
        id: RaceId,
        driver_name: String,
    ) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::UnassignDriver {
            id,
            driver_name,
            reply,
        })
        .await
    }

    /// The queue in FIFO order.
    pub async fn list_queue(&self) -> Result<Vec<RaceQueueEntry>, ControlError> {
        self.call(|reply| Request::ListQueue { reply }).await
    }

    /// One queued race.
    pub async fn get_race(&self, id: RaceId) -> Result<RaceQueueEntry, ControlError> {
        self.call(|reply| Request::GetRace { id, reply }).await
    }

    /// The race `start` would promote next.
    pub async fn peek_head(&self) -> Result<Option<RaceQueueEntry>, ControlError> {
        self.call(|reply| Request::PeekHead { reply }).await
    }

    /// The active session and status.
    pub async fn session(&self) -> Result<SessionView, ControlError> {
        self.call(|reply| Request::Session { reply }).await
    }

    /// Lap summaries for every rostered car.
    pub async fn laps(&self) -> Result<Vec<CarLaps>, ControlError> {
        self.call(|reply| Request::Laps { reply }).await
    }

    /// The leaderboard.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardRow>, ControlError> {
        self.call(|reply| Request::Leaderboard { reply }).await
    }

    /// Resync snapshot plus an event stream that starts right after it.
    pub async fn subscribe(&self, role: SubscriberRole) -> Result<Subscription, ControlError> {
        self.call(|reply| Request::Subscribe { role, reply }).await
    }

    /// Ask the loop to stop after the requests already queued.
    pub async fn shutdown(&self) {
        if self.tx.send(Request::Shutdown).await.is_err() {
            debug!("Control loop already stopped");
        }
    }
}

/// Move `control` into a new control-loop task.
///
/// The task ends on [`ControlHandle::shutdown`] or when every handle is
/// dropped, and yields the final state.
pub fn spawn_control_loop(
    control: RaceControl,
    tick_period: Duration,
) -> (ControlHandle, JoinHandle<RaceControl>) {
    let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
    let task = tokio::spawn(run_control_loop(control, rx, tick_period));
    (ControlHandle { tx }, task)
}

async fn run_control_loop(
    mut control: RaceControl,
    mut rx: mpsc::Receiver<Request>,
    tick_period: Duration,
) -> RaceControl {
    let mut ticker = Ticker::new(tick_period);
    sync_ticker(&control, &mut ticker);
    info!(tick_ms = tick_period.as_millis(), "Control loop started");

    loop {
        // Requests already in the inbox go before a due tick, so a press
        // sent before expiry is never rejected by the expiry it raced.
        tokio::select! {
            biased;
            request = rx.recv() => match request {
                Some(Request::Shutdown) | None => break,
                Some(request) => handle_request(&mut control, request),
            },
            () = ticker.tick() => {
                let _ = control.tick();
            }
        }
        sync_ticker(&control, &mut ticker);
    }

    info!("Control loop stopped");
    control
}

fn sync_ticker(control: &RaceControl, ticker: &mut Ticker) {
    if control.timer_active() {
        ticker.arm();
    } else {
        ticker.disarm();
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, ControlError>) {
    if reply.send(result).is_err() {
        debug!("Caller went away before the reply");
    }
}

fn handle_request(control: &mut RaceControl, request: Request) {
    match request {
        Request::Start { reply } => {
            respond(reply, control.start(Utc::now()).map_err(ControlError::from));
        }
        Request::SetMode { mode, reply } => {
            respond(reply, control.set_mode(mode).map_err(ControlError::from));
        }
        Request::End { reply } => respond(reply, Ok(control.end())),
        Request::RecordLap {
            car_number,
            pressed_at,
            reply,
        } => {
            let result = control.record_lap(car_number, pressed_at);
            if let Err(err) = &result {
                debug!(car_number, error = %err, "Lap rejected");
            }
            respond(reply, result.map_err(ControlError::from));
        }
        Request::Enqueue {
            name,
            roster,
            reply,
        } => respond(reply, control.enqueue(&name, roster).map_err(ControlError::from)),
        Request::RemoveRace { id, reply } => {
            respond(reply, control.remove_race(id).map_err(ControlError::from));
        }
        Request::UpdateRace {
            id,
            name,
            roster,
            reply,
        } => respond(
            reply,
            control
                .update_race(id, name.as_deref(), roster)
                .map_err(ControlError::from),
        ),
        Request::AssignDriver {
            id,
            driver_name,
            car_number,
            reply,
        } => respond(
            reply,
            control
                .assign_driver(id, &driver_name, car_number)
                .map_err(ControlError::from),
        ),
        Request::UnassignDriver {
            id,
            driver_name,
            reply,
        } => respond(
            reply,
            control
                .unassign_driver(id, &driver_name)
                .map_err(ControlError::from),
        ),
        Request::ListQueue { reply } => respond(reply, Ok(control.queue().snapshot())),
        Request::GetRace { id, reply } => respond(
            reply,
            control
                .queue()
                .get(id)
                .cloned()
                .ok_or(ControlError::Queue(QueueError::NotFound { id })),
        ),
        Request::PeekHead { reply } => {
            respond(reply, Ok(control.queue().peek_head().cloned()));
        }
        Request::Session { reply } => respond(
            reply,
            Ok(SessionView {
                session: control.session().cloned(),
                status: control.status(),
            }),
        ),
        Request::Laps { reply } => respond(reply, Ok(control.laps())),
        Request::Leaderboard { reply } => respond(reply, Ok(control.leaderboard())),
        Request::Subscribe { role, reply } => respond(reply, Ok(control.subscribe(role))),
        // Handled by the loop itself.
        Request::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::queue::RaceQueue;
    use crate::sink::NoOpSink;

    fn spawn(duration: u32) -> (ControlHandle, JoinHandle<RaceControl>) {
        let control = RaceControl::new(
            RaceQueue::new(),
            duration,
            Broadcaster::new(2048),
            Box::new(NoOpSink),
        );
        spawn_control_loop(control, Duration::from_secs(1))
    }

    async fn queue_heat(handle: &ControlHandle) {
        let roster = vec![
            DriverAssignment::new("Alice", 1),
            DriverAssignment::new("Bob", 2),
        ];
        assert!(handle.enqueue("Heat 1".to_owned(), roster).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_to_auto_finish() {
        let (handle, _task) = spawn(600);
        queue_heat(&handle).await;
        let (bundle, mut rx) = handle.subscribe(SubscriberRole::Spectator).await.unwrap();
        assert!(bundle.session.is_none());

        let begin = Instant::now();
        assert!(handle.start().await.is_ok());

        let mut ticks = Vec::new();
        loop {
            match rx.recv().await {
                Ok(RaceEvent::Tick {
                    remaining_seconds, ..
                }) => ticks.push(remaining_seconds),
                Ok(RaceEvent::SessionUpdated { mode, .. }) => {
                    assert_eq!(mode, SafetyMode::Finished);
                    break;
                }
                Ok(_) => {}
                Err(err) => panic!("receiver failed: {err}"),
            }
        }

        let expected: Vec<u32> = (0..600).rev().collect();
        assert_eq!(ticks, expected);
        assert_eq!(begin.elapsed(), Duration::from_secs(600));

        let view = handle.session().await.ok();
        assert_eq!(view.map(|v| v.status.mode), Some(SafetyMode::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_stops_ticks() {
        let (handle, _task) = spawn(600);
        queue_heat(&handle).await;
        assert!(handle.start().await.is_ok());
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(handle.set_mode(SafetyMode::Finished).await.is_ok());

        let (_, mut rx) = handle.subscribe(SubscriberRole::Spectator).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        let view = handle.session().await.ok();
        assert_eq!(view.map(|v| v.status.remaining_seconds), Some(597));
    }

    #[tokio::test(start_paused = true)]
    async fn end_mid_race_stops_timer_and_rejects_laps() {
        let (handle, _task) = spawn(600);
        queue_heat(&handle).await;
        assert!(handle.start().await.is_ok());
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let status = handle.end().await;
        assert_eq!(status, Ok(RaceStatus::idle(600)));

        let (_, mut rx) = handle.subscribe(SubscriberRole::Observer).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            handle.record_lap(1, None).await,
            Err(ControlError::Session(SessionError::NotRunning))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_laps_for_different_cars_all_land() {
        let (handle, _task) = spawn(600);
        queue_heat(&handle).await;
        assert!(handle.start().await.is_ok());

        let mut presses = Vec::new();
        for _ in 0..10 {
            for car in [1u8, 2] {
                let handle = handle.clone();
                presses.push(tokio::spawn(async move {
                    handle.record_lap(car, None).await.is_ok()
                }));
            }
        }
        for press in presses {
            assert_eq!(press.await.ok(), Some(true));
        }

        let laps = handle.laps().await.unwrap();
        let counts: Vec<u32> = laps.iter().map(|c| c.lap_count).collect();
        assert_eq!(counts, vec![10, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_queries_go_through_the_loop() {
        let (handle, _task) = spawn(600);
        queue_heat(&handle).await;
        assert_eq!(
            handle.peek_head().await.ok().flatten().map(|e| e.name),
            Some("Heat 1".to_owned())
        );
        assert!(handle.get_race(RaceId::FIRST).await.is_ok());
        assert_eq!(
            handle.get_race(RaceId(99)).await,
            Err(ControlError::Queue(QueueError::NotFound { id: RaceId(99) }))
        );
        assert_eq!(
            handle.start().await.map(|s| s.session_id),
            Ok(RaceId::FIRST)
        );
        assert_eq!(handle.list_queue().await.map(|q| q.len()), Ok(0));
        assert_eq!(
            handle.start().await.map(|s| s.session_id),
            Err(ControlError::Session(SessionError::InvalidTransition {
                from: SafetyMode::Safe,
                to: SafetyMode::Safe,
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restored_session_resumes_from_persisted_time() {
        let mut control = RaceControl::new(
            RaceQueue::new(),
            600,
            Broadcaster::new(64),
            Box::new(NoOpSink),
        );
        control.restore_session(
            ActiveSession {
                session_id: RaceId(3),
                name: "Heat 3".to_owned(),
                roster: vec![DriverAssignment::new("Alice", 1)],
                mode: SafetyMode::Danger,
                running: true,
                remaining_seconds: 3,
                total_duration_seconds: 600,
                started_at: Utc::now(),
            },
            Vec::new(),
        );
        let (handle, _task) = spawn_control_loop(control, Duration::from_secs(1));
        let (bundle, mut rx) = handle.subscribe(SubscriberRole::Spectator).await.unwrap();
        assert_eq!(bundle.status.remaining_seconds, 3);
        assert_eq!(bundle.laps.len(), 1);

        let mut seen = Vec::new();
        while let Ok(event) = rx.recv().await {
            let finished = matches!(
                event,
                RaceEvent::SessionUpdated {
                    mode: SafetyMode::Finished,
                    ..
                }
            );
            seen.push(event.kind());
            if finished {
                break;
            }
        }
        assert_eq!(seen, vec!["tick", "tick", "tick", "session-updated"]);
    }

    #[tokio::test(start_paused = true)]
    async fn press_queued_before_expiry_is_accepted() {
        let mut control = RaceControl::new(
            RaceQueue::new(),
            600,
            Broadcaster::new(64),
            Box::new(NoOpSink),
        );
        let t0 = Utc::now();
        control.restore_session(
            ActiveSession {
                session_id: RaceId(2),
                name: "Heat 2".to_owned(),
                roster: vec![DriverAssignment::new("Alice", 1)],
                mode: SafetyMode::Safe,
                running: true,
                remaining_seconds: 1,
                total_duration_seconds: 600,
                started_at: t0,
            },
            Vec::new(),
        );
        let (handle, _task) = spawn_control_loop(control, Duration::from_secs(1));
        assert!(handle.session().await.is_ok());

        // The press is waiting in the inbox when the last second runs out.
        let (reply, rx) = oneshot::channel();
        let press = Request::RecordLap {
            car_number: 1,
            pressed_at: t0
                .checked_add_signed(chrono::TimeDelta::milliseconds(59_000))
                .unwrap_or(t0),
            reply,
        };
        assert!(handle.tx.send(press).await.is_ok());
        tokio::time::advance(Duration::from_secs(1)).await;

        let lap = rx.await.unwrap();
        assert_eq!(lap.map(|l| l.lap_millis), Ok(59_000));
        let view = handle.session().await.unwrap();
        assert_eq!(view.status.mode, SafetyMode::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_state_and_closes_handle() {
        let (handle, task) = spawn(600);
        queue_heat(&handle).await;
        handle.shutdown().await;
        let control = task.await.ok();
        assert_eq!(control.map(|c| c.queue().len()), Some(1));
        assert_eq!(handle.start().await, Err(ControlError::Unavailable));
    }
}
