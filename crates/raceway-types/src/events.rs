//! Push-channel message types.
//!
//! Every state change in the race controller is published as exactly one
//! [`RaceEvent`]. Events form a closed set so every display can match on
//! them exhaustively. Connection-level frames (the resync bundle and
//! command replies) live in [`ControlFrame`]; [`ServerFrame`] is the union
//! of both as it appears on the wire.
//!
//! Displays talk back with [`ClientCommand`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{RejectionKind, SafetyMode};
use crate::structs::{ActiveSession, CarLaps, LapRecord, RaceQueueEntry, RaceStatus};
use crate::time::{format_countdown, format_lap_time};

// ---------------------------------------------------------------------------
// Broadcast events
// ---------------------------------------------------------------------------

/// A state change published to every connected display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum RaceEvent {
    /// The race queue changed; carries the full queue in FIFO order.
    QueueChanged {
        /// Snapshot of every queued race.
        queue: Vec<RaceQueueEntry>,
    },
    /// A race was promoted from the queue and is now running.
    SessionActivated {
        /// The new session.
        session: ActiveSession,
    },
    /// The flag or running state changed.
    SessionUpdated {
        /// Current safety mode.
        mode: SafetyMode,
        /// Whether a session is active.
        running: bool,
        /// Seconds left on the countdown.
        remaining_seconds: u32,
    },
    /// One countdown second elapsed.
    Tick {
        /// Seconds left on the countdown.
        remaining_seconds: u32,
        /// Remaining time as `M:SS`.
        formatted: String,
    },
    /// A lap was recorded for a car.
    LapRecorded {
        /// Car that crossed the line.
        car_number: u8,
        /// Lap duration in milliseconds.
        #[ts(type = "number")]
        lap_millis: i64,
        /// Lap duration as `M:SS:mmm`.
        formatted_lap: String,
        /// Laps recorded for this car so far.
        lap_count: u32,
        /// Fastest lap for this car in milliseconds.
        #[ts(type = "number")]
        best_lap_millis: i64,
        /// Fastest lap as `M:SS:mmm`.
        formatted_best: String,
    },
    /// The active session was ended and its laps discarded.
    SessionCleared,
}

impl RaceEvent {
    /// Build a `session-updated` event from a status record.
    pub const fn session_updated(status: &RaceStatus) -> Self {
        Self::SessionUpdated {
            mode: status.mode,
            running: status.running,
            remaining_seconds: status.remaining_seconds,
        }
    }

    /// Build a `tick` event with its display string.
    pub fn tick(remaining_seconds: u32) -> Self {
        Self::Tick {
            remaining_seconds,
            formatted: format_countdown(remaining_seconds),
        }
    }

    /// Build a `lap-recorded` event for `lap`, given the car's current
    /// lap count and best lap.
    pub fn lap_recorded(lap: &LapRecord, lap_count: u32, best_lap_millis: i64) -> Self {
        Self::LapRecorded {
            car_number: lap.car_number,
            lap_millis: lap.lap_millis,
            formatted_lap: format_lap_time(lap.lap_millis),
            lap_count,
            best_lap_millis,
            formatted_best: format_lap_time(best_lap_millis),
        }
    }

    /// Short name used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueueChanged { .. } => "queue-changed",
            Self::SessionActivated { .. } => "session-activated",
            Self::SessionUpdated { .. } => "session-updated",
            Self::Tick { .. } => "tick",
            Self::LapRecorded { .. } => "lap-recorded",
            Self::SessionCleared => "session-cleared",
        }
    }
}

// ---------------------------------------------------------------------------
// Connection frames
// ---------------------------------------------------------------------------

/// Everything a newly connected display needs to reach parity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResyncBundle {
    /// The race queue in FIFO order.
    pub queue: Vec<RaceQueueEntry>,
    /// The active session, or `None` when idle.
    pub session: Option<ActiveSession>,
    /// Current status (the idle status when no session is active).
    pub status: RaceStatus,
    /// Lap ledger for every rostered car. Empty for roles that do not
    /// receive lap history.
    pub laps: Vec<CarLaps>,
}

/// Per-connection frames that are not broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum ControlFrame {
    /// Snapshot sent as the first frame of every connection.
    Resync(ResyncBundle),
    /// The connection's last command was applied.
    CommandOk {
        /// Name of the command.
        command: String,
    },
    /// The connection's last command was rejected. State is unchanged.
    CommandRejected {
        /// Name of the command, or `unknown` when it could not be parsed.
        command: String,
        /// Machine-readable reason.
        kind: RejectionKind,
        /// Human-readable reason.
        reason: String,
    },
}

/// Any frame the server writes to a push-channel connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum ServerFrame {
    /// A broadcast event.
    Event(RaceEvent),
    /// A connection-level frame.
    Control(ControlFrame),
}

impl From<RaceEvent> for ServerFrame {
    fn from(event: RaceEvent) -> Self {
        Self::Event(event)
    }
}

impl From<ControlFrame> for ServerFrame {
    fn from(frame: ControlFrame) -> Self {
        Self::Control(frame)
    }
}

// ---------------------------------------------------------------------------
// Client commands
// ---------------------------------------------------------------------------

/// A command sent by a display over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum ClientCommand {
    /// Promote the head of the queue and start the countdown.
    Start,
    /// Change the safety mode of the running session.
    SetMode {
        /// The requested mode.
        mode: SafetyMode,
    },
    /// End the active session (or abort it early).
    End,
    /// Record a lap-line press for a car.
    RecordLap {
        /// Car that crossed the line.
        car_number: u8,
        /// Press time in epoch milliseconds. Server receive time when absent.
        #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
        #[ts(type = "number | null")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl ClientCommand {
    /// Whether only controller-role connections may issue this command.
    pub const fn requires_control(&self) -> bool {
        !matches!(self, Self::RecordLap { .. })
    }

    /// Wire name of the command.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SetMode { .. } => "set-mode",
            Self::End => "end",
            Self::RecordLap { .. } => "record-lap",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(RaceEvent::tick(65)).ok();
        assert_eq!(
            json,
            Some(serde_json::json!({
                "type": "tick",
                "remaining_seconds": 65,
                "formatted": "1:05",
            }))
        );
    }

    #[test]
    fn session_cleared_is_a_bare_tag() {
        let json = serde_json::to_string(&RaceEvent::SessionCleared).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"session-cleared"}"#));
    }

    #[test]
    fn lap_recorded_formats_both_durations() {
        let lap = LapRecord {
            car_number: 1,
            sequence: 2,
            lap_millis: 11_000,
            recorded_at: Utc::now(),
        };
        let event = RaceEvent::lap_recorded(&lap, 2, 11_000);
        assert_eq!(
            event,
            RaceEvent::LapRecorded {
                car_number: 1,
                lap_millis: 11_000,
                formatted_lap: "0:11:000".to_owned(),
                lap_count: 2,
                best_lap_millis: 11_000,
                formatted_best: "0:11:000".to_owned(),
            }
        );
    }

    #[test]
    fn record_lap_accepts_epoch_millis() {
        let cmd: Result<ClientCommand, _> = serde_json::from_str(
            r#"{"type":"record-lap","car_number":3,"timestamp":1700000012000}"#,
        );
        let expected = DateTime::from_timestamp_millis(1_700_000_012_000);
        assert!(expected.is_some());
        assert_eq!(
            cmd.ok(),
            Some(ClientCommand::RecordLap {
                car_number: 3,
                timestamp: expected,
            })
        );
    }

    #[test]
    fn record_lap_timestamp_is_optional() {
        let cmd: Result<ClientCommand, _> =
            serde_json::from_str(r#"{"type":"record-lap","car_number":1}"#);
        assert!(matches!(
            cmd,
            Ok(ClientCommand::RecordLap {
                timestamp: None,
                ..
            })
        ));
    }

    #[test]
    fn set_mode_parses() {
        let cmd: Result<ClientCommand, _> =
            serde_json::from_str(r#"{"type":"set-mode","mode":"Finished"}"#);
        assert_eq!(
            cmd.ok(),
            Some(ClientCommand::SetMode {
                mode: SafetyMode::Finished
            })
        );
    }

    #[test]
    fn only_record_lap_is_open_to_every_role() {
        assert!(ClientCommand::Start.requires_control());
        assert!(ClientCommand::End.requires_control());
        assert!(
            !ClientCommand::RecordLap {
                car_number: 1,
                timestamp: None
            }
            .requires_control()
        );
    }

    #[test]
    fn server_frame_is_untagged_on_the_wire() {
        let frame = ServerFrame::from(ControlFrame::CommandOk {
            command: "start".to_owned(),
        });
        let json = serde_json::to_value(&frame).ok();
        assert_eq!(
            json,
            Some(serde_json::json!({"type": "command-ok", "command": "start"}))
        );
    }
}
