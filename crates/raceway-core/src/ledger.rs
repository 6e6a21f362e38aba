//! The lap ledger: per-car append-only lap history for the active session.
//!
//! A ledger is created from the session's frozen roster and dropped with
//! the session. Lap duration is the raw delta between a car's press and
//! its previous press (or the session start for its first lap). Clock
//! skew is not corrected, so a lap can be zero or negative.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use raceway_types::{CarLaps, DriverAssignment, LapRecord, LeaderboardRow, format_lap_time};

use crate::control::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CarLedger {
    driver_name: String,
    laps: Vec<LapRecord>,
    last_press: Option<DateTime<Utc>>,
    best_lap_millis: Option<i64>,
}

impl CarLedger {
    const fn new(driver_name: String) -> Self {
        Self {
            driver_name,
            laps: Vec::new(),
            last_press: None,
            best_lap_millis: None,
        }
    }

    fn lap_count(&self) -> u32 {
        u32::try_from(self.laps.len()).unwrap_or(u32::MAX)
    }

    fn last_lap_millis(&self) -> Option<i64> {
        self.laps.last().map(|l| l.lap_millis)
    }

    /// Append a lap. The best lap is replaced only by a strictly faster
    /// one, so ties keep the earliest.
    fn push(&mut self, lap: LapRecord) {
        if self.best_lap_millis.is_none_or(|best| lap.lap_millis < best) {
            self.best_lap_millis = Some(lap.lap_millis);
        }
        self.last_press = Some(lap.recorded_at);
        self.laps.push(lap);
    }

    fn summary(&self, car_number: u8) -> CarLaps {
        CarLaps {
            car_number,
            driver_name: self.driver_name.clone(),
            lap_count: self.lap_count(),
            last_lap_millis: self.last_lap_millis(),
            best_lap_millis: self.best_lap_millis,
            laps: self.laps.clone(),
        }
    }
}

/// Lap history for every car in the active roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapLedger {
    started_at: DateTime<Utc>,
    cars: BTreeMap<u8, CarLedger>,
}

impl LapLedger {
    /// Create an empty ledger for `roster`, timing first laps from
    /// `started_at`.
    pub fn new(roster: &[DriverAssignment], started_at: DateTime<Utc>) -> Self {
        let cars = roster
            .iter()
            .map(|d| (d.car_number, CarLedger::new(d.driver_name.clone())))
            .collect();
        Self { started_at, cars }
    }

    /// Rebuild a ledger from archived laps.
    ///
    /// Laps are replayed per car in sequence order. Laps for cars outside
    /// the roster are skipped.
    pub fn restore(
        roster: &[DriverAssignment],
        started_at: DateTime<Utc>,
        mut laps: Vec<LapRecord>,
    ) -> Self {
        let mut ledger = Self::new(roster, started_at);
        laps.sort_by_key(|l| (l.car_number, l.sequence));
        for lap in laps {
            match ledger.cars.get_mut(&lap.car_number) {
                Some(car) => car.push(lap),
                None => {
                    tracing::warn!(
                        car_number = lap.car_number,
                        sequence = lap.sequence,
                        "Skipping archived lap for car outside the roster"
                    );
                }
            }
        }
        ledger
    }

    /// Record a lap-line press for `car_number` at `pressed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownCar`] if the car is not rostered.
    pub fn record(
        &mut self,
        car_number: u8,
        pressed_at: DateTime<Utc>,
    ) -> Result<LapRecord, SessionError> {
        let started_at = self.started_at;
        let car = self
            .cars
            .get_mut(&car_number)
            .ok_or(SessionError::UnknownCar { car_number })?;

        let previous = car.last_press.unwrap_or(started_at);
        let lap = LapRecord {
            car_number,
            sequence: car.lap_count().saturating_add(1),
            lap_millis: pressed_at.signed_duration_since(previous).num_milliseconds(),
            recorded_at: pressed_at,
        };
        car.push(lap.clone());
        Ok(lap)
    }

    /// Laps for one car in recording order. Empty for unknown cars.
    pub fn laps(&self, car_number: u8) -> impl Iterator<Item = &LapRecord> {
        self.cars
            .get(&car_number)
            .into_iter()
            .flat_map(|c| c.laps.iter())
    }

    /// Fastest lap for one car.
    pub fn best_lap(&self, car_number: u8) -> Option<i64> {
        self.cars.get(&car_number).and_then(|c| c.best_lap_millis)
    }

    /// Most recent lap for one car.
    pub fn last_lap(&self, car_number: u8) -> Option<i64> {
        self.cars.get(&car_number).and_then(CarLedger::last_lap_millis)
    }

    /// Number of laps recorded for one car.
    pub fn lap_count(&self, car_number: u8) -> u32 {
        self.cars.get(&car_number).map_or(0, CarLedger::lap_count)
    }

    /// Per-car summaries in car-number order, including cars with no laps.
    pub fn summaries(&self) -> Vec<CarLaps> {
        self.cars
            .iter()
            .map(|(car_number, car)| car.summary(*car_number))
            .collect()
    }

    /// Leaderboard ordered by best lap. Cars without a lap come last and
    /// ties break on car number.
    pub fn leaderboard(&self) -> Vec<LeaderboardRow> {
        let mut ranked: Vec<(u8, &CarLedger)> =
            self.cars.iter().map(|(n, c)| (*n, c)).collect();
        ranked.sort_by_key(|(n, c)| (c.best_lap_millis.is_none(), c.best_lap_millis, *n));

        (1u32..)
            .zip(ranked)
            .map(|(position, (car_number, car))| {
                let last = car.last_lap_millis();
                LeaderboardRow {
                    position,
                    car_number,
                    driver_name: car.driver_name.clone(),
                    lap_count: car.lap_count(),
                    last_lap_millis: last,
                    best_lap_millis: car.best_lap_millis,
                    formatted_last: last.map(format_lap_time),
                    formatted_best: car.best_lap_millis.map(format_lap_time),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn roster() -> Vec<DriverAssignment> {
        vec![
            DriverAssignment::new("Alice", 1),
            DriverAssignment::new("Bob", 2),
            DriverAssignment::new("Carol", 3),
        ]
    }

    fn at(start: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
        start
            .checked_add_signed(TimeDelta::milliseconds(millis))
            .unwrap_or(start)
    }

    #[test]
    fn first_lap_is_timed_from_session_start() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);

        let first = ledger.record(1, at(t0, 12_000));
        assert_eq!(first.as_ref().map(|l| l.lap_millis), Ok(12_000));
        assert_eq!(first.map(|l| l.sequence), Ok(1));

        let second = ledger.record(1, at(t0, 23_000));
        assert_eq!(second.map(|l| l.lap_millis), Ok(11_000));
        assert_eq!(ledger.last_lap(1), Some(11_000));
        assert_eq!(ledger.best_lap(1), Some(11_000));
        assert_eq!(ledger.lap_count(1), 2);
    }

    #[test]
    fn best_is_minimum_and_count_matches() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);
        let presses = [30_000, 55_000, 90_000, 110_000, 150_000];
        for press in presses {
            assert!(ledger.record(2, at(t0, press)).is_ok());
        }
        // Laps: 30000, 25000, 35000, 20000, 40000
        assert_eq!(ledger.best_lap(2), Some(20_000));
        assert_eq!(ledger.lap_count(2), 5);
        let sequences: Vec<u32> = ledger.laps(2).map(|l| l.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn cars_are_independent() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);
        let _ = ledger.record(1, at(t0, 10_000));
        let _ = ledger.record(2, at(t0, 15_000));
        let _ = ledger.record(1, at(t0, 21_000));
        assert_eq!(ledger.last_lap(1), Some(11_000));
        assert_eq!(ledger.last_lap(2), Some(15_000));
        assert_eq!(ledger.lap_count(3), 0);
        assert_eq!(ledger.best_lap(3), None);
    }

    #[test]
    fn unknown_car_is_rejected() {
        let mut ledger = LapLedger::new(&roster(), Utc::now());
        assert_eq!(
            ledger.record(7, Utc::now()),
            Err(SessionError::UnknownCar { car_number: 7 })
        );
        assert_eq!(ledger.laps(7).count(), 0);
    }

    #[test]
    fn skewed_press_keeps_raw_delta() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);
        let _ = ledger.record(1, at(t0, 20_000));
        let skewed = ledger.record(1, at(t0, 18_500));
        assert_eq!(skewed.map(|l| l.lap_millis), Ok(-1_500));
        assert_eq!(ledger.best_lap(1), Some(-1_500));
        assert_eq!(ledger.lap_count(1), 2);
    }

    #[test]
    fn leaderboard_orders_by_best_then_car() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);
        let _ = ledger.record(2, at(t0, 14_000));
        let _ = ledger.record(1, at(t0, 14_000));

        let board = ledger.leaderboard();
        let order: Vec<(u32, u8)> = board.iter().map(|r| (r.position, r.car_number)).collect();
        assert_eq!(order, vec![(1, 1), (2, 2), (3, 3)]);
        assert_eq!(
            board.first().and_then(|r| r.formatted_best.clone()),
            Some("0:14:000".to_owned())
        );
        assert_eq!(board.last().and_then(|r| r.best_lap_millis), None);
    }

    #[test]
    fn summaries_cover_every_rostered_car() {
        let t0 = Utc::now();
        let mut ledger = LapLedger::new(&roster(), t0);
        let _ = ledger.record(3, at(t0, 9_000));
        let summaries = ledger.summaries();
        assert_eq!(summaries.len(), 3);
        let carol = summaries.iter().find(|s| s.car_number == 3);
        assert_eq!(carol.map(|s| s.lap_count), Some(1));
        assert_eq!(carol.map(|s| s.driver_name.as_str()), Some("Carol"));
    }

    #[test]
    fn restore_replays_archived_laps() {
        let t0 = Utc::now();
        let mut live = LapLedger::new(&roster(), t0);
        let _ = live.record(1, at(t0, 12_000));
        let _ = live.record(1, at(t0, 23_000));
        let _ = live.record(2, at(t0, 13_000));

        let mut archived: Vec<LapRecord> = live.summaries().into_iter().flat_map(|s| s.laps).collect();
        archived.reverse();
        let mut restored = LapLedger::restore(&roster(), t0, archived);
        assert_eq!(restored, live);

        // The next lap is timed from the last archived press.
        let next = restored.record(1, at(t0, 33_000));
        assert_eq!(next.map(|l| (l.sequence, l.lap_millis)), Ok((3, 10_000)));
    }
}
