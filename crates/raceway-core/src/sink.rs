//! Durable-state reporting.
//!
//! The control loop reports every durable change to a [`StateSink`]. The
//! sink is synchronous and must not block: the engine's implementation
//! forwards to a background persister task, and tests use [`NoOpSink`] or
//! a recording sink.

use raceway_types::{ActiveSession, LapRecord, RaceQueueEntry, RaceStatus};

/// Receiver of durable state changes, called from inside the control loop.
pub trait StateSink: Send {
    /// The queue changed. `queue` is the full queue in FIFO order.
    fn queue_changed(&mut self, queue: &[RaceQueueEntry]);

    /// The status record changed (every tick and every transition).
    fn status_changed(&mut self, status: &RaceStatus);

    /// A session was activated (`Some`) or cleared (`None`).
    fn session_changed(&mut self, session: Option<&ActiveSession>);

    /// A lap was accepted for `session`.
    fn lap_recorded(&mut self, session: &ActiveSession, lap: &LapRecord);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl StateSink for NoOpSink {
    fn queue_changed(&mut self, _queue: &[RaceQueueEntry]) {}

    fn status_changed(&mut self, _status: &RaceStatus) {}

    fn session_changed(&mut self, _session: Option<&ActiveSession>) {}

    fn lap_recorded(&mut self, _session: &ActiveSession, _lap: &LapRecord) {}
}
