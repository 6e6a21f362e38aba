//! Enumeration types shared by the race controller and its displays.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Safety mode
// ---------------------------------------------------------------------------

/// The flag state shown to drivers and spectators.
///
/// `Safe`, `Hazard`, and `Danger` are operator-selectable while a race is
/// running. `Finished` is terminal for a session: once set, the countdown
/// is stopped and lap recording is disabled until the session is ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum SafetyMode {
    /// Green flag: normal racing.
    Safe,
    /// Yellow flag: slow down, hazard on track.
    Hazard,
    /// Red flag: stop. Also the resting mode when no race is running.
    Danger,
    /// Chequered flag: the race is over.
    Finished,
}

impl SafetyMode {
    /// Whether this is the terminal `Finished` mode.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Stable lowercase name used in logs and storage keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Hazard => "hazard",
            Self::Danger => "danger",
            Self::Finished => "finished",
        }
    }
}

impl core::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Subscriber role
// ---------------------------------------------------------------------------

/// The kind of display attached to the push channel.
///
/// Every role receives every broadcast. The role only decides which
/// commands a connection may issue and how much lap history it gets in
/// its resync bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum SubscriberRole {
    /// Lap-line observer pressing the per-car lap buttons.
    Observer,
    /// Race control: starts races, sets flags, ends sessions.
    Controller,
    /// Public leaderboard.
    #[default]
    Spectator,
    /// Paddock and flag screens facing the drivers.
    DriverDisplay,
}

impl SubscriberRole {
    /// Whether this role may issue `start`, `set-mode`, and `end`.
    pub const fn can_control(self) -> bool {
        matches!(self, Self::Controller)
    }

    /// Whether the resync bundle for this role carries the full lap ledger.
    pub const fn receives_lap_history(self) -> bool {
        matches!(self, Self::Spectator | Self::Observer)
    }
}

// ---------------------------------------------------------------------------
// Rejection kind
// ---------------------------------------------------------------------------

/// Machine-readable reason attached to a rejected push-channel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum RejectionKind {
    /// The connection's role may not issue this command.
    Forbidden,
    /// The frame could not be parsed as a command.
    Malformed,
    /// `start` was issued with an empty queue.
    NoQueuedRace,
    /// The requested mode change is not allowed from the current state.
    InvalidTransition,
    /// No race is accepting laps.
    NotRunning,
    /// The car is not part of the active roster.
    UnknownCar,
    /// A queue operation failed validation or lookup.
    Queue,
    /// The control loop is not running.
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_controller_can_control() {
        assert!(SubscriberRole::Controller.can_control());
        assert!(!SubscriberRole::Observer.can_control());
        assert!(!SubscriberRole::Spectator.can_control());
        assert!(!SubscriberRole::DriverDisplay.can_control());
    }

    #[test]
    fn role_parses_kebab_case() {
        let role: Result<SubscriberRole, _> = serde_json::from_str("\"driver-display\"");
        assert_eq!(role.ok(), Some(SubscriberRole::DriverDisplay));
    }

    #[test]
    fn mode_serializes_with_display_names() {
        let json = serde_json::to_string(&SafetyMode::Hazard).ok();
        assert_eq!(json.as_deref(), Some("\"Hazard\""));
    }
}
