//! Core entity structs: queue entries, the active session, and laps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::SafetyMode;
use crate::ids::RaceId;

/// Maximum number of drivers (and cars) in a single race.
pub const MAX_DRIVERS_PER_RACE: usize = 8;

/// Lowest valid car number.
pub const MIN_CAR_NUMBER: u8 = 1;

/// Highest valid car number.
pub const MAX_CAR_NUMBER: u8 = 8;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// One driver paired with the car they will drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DriverAssignment {
    /// Driver display name, unique within a race.
    pub driver_name: String,
    /// Car number in `1..=8`, unique within a race.
    pub car_number: u8,
}

impl DriverAssignment {
    /// Build an assignment from a name and car number.
    pub fn new(driver_name: impl Into<String>, car_number: u8) -> Self {
        Self {
            driver_name: driver_name.into(),
            car_number,
        }
    }
}

/// A not-yet-run race waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RaceQueueEntry {
    /// Monotonically assigned race id.
    pub id: RaceId,
    /// Race name, unique across the queue.
    pub name: String,
    /// Ordered roster of at most eight drivers.
    pub drivers: Vec<DriverAssignment>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The flag, timer, and running state of the venue.
///
/// This is the record written to the durable status store on every tick
/// and every transition. When no race is active it holds the idle values
/// (`running = false`, `Danger`, zero seconds remaining).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RaceStatus {
    /// Whether a session is active.
    pub running: bool,
    /// Current safety mode.
    pub mode: SafetyMode,
    /// Seconds left on the countdown.
    pub remaining_seconds: u32,
    /// Configured race length in seconds.
    pub total_duration_seconds: u32,
}

impl RaceStatus {
    /// The status reported when no race is active.
    pub const fn idle(total_duration_seconds: u32) -> Self {
        Self {
            running: false,
            mode: SafetyMode::Danger,
            remaining_seconds: 0,
            total_duration_seconds,
        }
    }

    /// Whether the snapshot is internally consistent.
    ///
    /// Remaining time can never exceed the race length, and an idle
    /// status must be in `Danger` with no time left.
    pub fn is_consistent(&self) -> bool {
        if self.remaining_seconds > self.total_duration_seconds {
            return false;
        }
        self.running || (self.mode == SafetyMode::Danger && self.remaining_seconds == 0)
    }
}

/// The single race currently in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActiveSession {
    /// Id of the queue entry this session was promoted from.
    pub session_id: RaceId,
    /// Race name carried over from the queue entry.
    pub name: String,
    /// Roster frozen at promotion time.
    pub roster: Vec<DriverAssignment>,
    /// Current safety mode.
    pub mode: SafetyMode,
    /// Stays `true` from start until the session is ended, including
    /// while `Finished`.
    pub running: bool,
    /// Seconds left on the countdown.
    pub remaining_seconds: u32,
    /// Configured race length in seconds.
    pub total_duration_seconds: u32,
    /// Wall-clock start of the session. First laps are measured from here.
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    /// Project the session onto the persisted status record.
    pub const fn status(&self) -> RaceStatus {
        RaceStatus {
            running: self.running,
            mode: self.mode,
            remaining_seconds: self.remaining_seconds,
            total_duration_seconds: self.total_duration_seconds,
        }
    }
}

// ---------------------------------------------------------------------------
// Laps
// ---------------------------------------------------------------------------

/// One recorded lap for one car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LapRecord {
    /// Car that completed the lap.
    pub car_number: u8,
    /// 1-based lap number, strictly increasing per car.
    pub sequence: u32,
    /// Lap duration in milliseconds, as the raw press-to-press delta.
    #[ts(type = "number")]
    pub lap_millis: i64,
    /// When the lap-line press happened.
    pub recorded_at: DateTime<Utc>,
}

/// Per-car summary of the lap ledger, as sent to late-joining displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CarLaps {
    /// Car number.
    pub car_number: u8,
    /// Driver assigned to the car.
    pub driver_name: String,
    /// Number of recorded laps.
    pub lap_count: u32,
    /// Most recent lap in milliseconds.
    #[ts(type = "number | null")]
    pub last_lap_millis: Option<i64>,
    /// Fastest lap in milliseconds.
    #[ts(type = "number | null")]
    pub best_lap_millis: Option<i64>,
    /// Every lap in recording order.
    pub laps: Vec<LapRecord>,
}

/// One row of the spectator leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LeaderboardRow {
    /// 1-based position, ordered by best lap.
    pub position: u32,
    /// Car number.
    pub car_number: u8,
    /// Driver assigned to the car.
    pub driver_name: String,
    /// Number of recorded laps.
    pub lap_count: u32,
    /// Most recent lap in milliseconds.
    #[ts(type = "number | null")]
    pub last_lap_millis: Option<i64>,
    /// Fastest lap in milliseconds.
    #[ts(type = "number | null")]
    pub best_lap_millis: Option<i64>,
    /// Most recent lap as `M:SS:mmm`.
    pub formatted_last: Option<String>,
    /// Fastest lap as `M:SS:mmm`.
    pub formatted_best: Option<String>,
}
