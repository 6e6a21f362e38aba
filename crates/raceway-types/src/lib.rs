//! Shared type definitions for the Raceway race control system.
//!
//! This crate is the single source of truth for the types exchanged
//! between the race controller and its displays (lap-line observer, race
//! control, leaderboard, paddock screens). Types defined here flow
//! downstream to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Race identifier
//! - [`enums`] -- Safety mode, subscriber role, rejection kind
//! - [`structs`] -- Queue entries, the active session, laps, leaderboard rows
//! - [`events`] -- Broadcast events, connection frames, client commands
//! - [`time`] -- Lap/countdown formatting and display-side interpolation

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;
pub mod time;

// Re-export all public types at crate root for convenience.
pub use enums::{RejectionKind, SafetyMode, SubscriberRole};
pub use events::{ClientCommand, ControlFrame, RaceEvent, ResyncBundle, ServerFrame};
pub use ids::RaceId;
pub use structs::{
    ActiveSession, CarLaps, DriverAssignment, LapRecord, LeaderboardRow, MAX_CAR_NUMBER,
    MAX_DRIVERS_PER_RACE, MIN_CAR_NUMBER, RaceQueueEntry, RaceStatus,
};
pub use time::{format_countdown, format_lap_time, interpolate_remaining};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs generates TypeScript bindings when types with
        // #[ts(export)] are used. The files are written to the
        // `bindings/` directory relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::RaceId::export_all();

        let _ = crate::enums::SafetyMode::export_all();
        let _ = crate::enums::SubscriberRole::export_all();
        let _ = crate::enums::RejectionKind::export_all();

        let _ = crate::structs::DriverAssignment::export_all();
        let _ = crate::structs::RaceQueueEntry::export_all();
        let _ = crate::structs::RaceStatus::export_all();
        let _ = crate::structs::ActiveSession::export_all();
        let _ = crate::structs::LapRecord::export_all();
        let _ = crate::structs::CarLaps::export_all();
        let _ = crate::structs::LeaderboardRow::export_all();

        let _ = crate::events::RaceEvent::export_all();
        let _ = crate::events::ResyncBundle::export_all();
        let _ = crate::events::ControlFrame::export_all();
        let _ = crate::events::ServerFrame::export_all();
        let _ = crate::events::ClientCommand::export_all();
    }
}
