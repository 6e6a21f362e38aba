//! Display formatting for lap times and the countdown, plus the
//! interpolation displays run between authoritative server ticks.
//!
//! The formats are part of the display contract and must match across
//! every screen:
//!
//! - lap durations: `M:SS:mmm` (minutes unbounded)
//! - countdown: `M:SS` (minutes unbounded)

use std::time::Duration;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60_000;
const SECONDS_PER_MINUTE: u32 = 60;

/// Format a lap duration in milliseconds as `M:SS:mmm`.
///
/// Negative durations (a press registered before the car's previous one)
/// are formatted from their magnitude with a leading `-`.
pub fn format_lap_time(lap_millis: i64) -> String {
    let magnitude = lap_millis.unsigned_abs();
    let minutes = magnitude / MILLIS_PER_MINUTE;
    let seconds = (magnitude % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
    let millis = magnitude % MILLIS_PER_SECOND;
    let sign = if lap_millis < 0 { "-" } else { "" };
    format!("{sign}{minutes}:{seconds:02}:{millis:03}")
}

/// Format a countdown in seconds as `M:SS`.
pub fn format_countdown(remaining_seconds: u32) -> String {
    let minutes = remaining_seconds / SECONDS_PER_MINUTE;
    let seconds = remaining_seconds % SECONDS_PER_MINUTE;
    format!("{minutes}:{seconds:02}")
}

/// Seconds a display should show, given the last server tick and the time
/// elapsed locally since it arrived.
///
/// The server tick is authoritative: the result never exceeds it and never
/// drops below zero, so a display that misses ticks runs down to `0:00`
/// and waits instead of inventing time.
pub fn interpolate_remaining(server_remaining_seconds: u32, elapsed_since_tick: Duration) -> u32 {
    let elapsed = u32::try_from(elapsed_since_tick.as_secs()).unwrap_or(u32::MAX);
    server_remaining_seconds.saturating_sub(elapsed)
}
