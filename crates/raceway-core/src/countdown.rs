//! The race countdown.
//!
//! [`Countdown`] is the pure second counter owned by the session state
//! machine. [`Ticker`] is the clock that feeds it: a tokio interval that is
//! armed only while the countdown is active, so an idle control loop does
//! not wake up once a second for nothing.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// What a single tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The countdown is not active; nothing changed.
    Idle,
    /// One second elapsed and time remains.
    Counting {
        /// Seconds left after this tick.
        remaining_seconds: u32,
    },
    /// This tick consumed the last second. The countdown is now stopped.
    Expired,
}

/// Second counter for the active race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining_seconds: u32,
    active: bool,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::stopped()
    }
}

impl Countdown {
    /// A countdown with no time and no ticking.
    pub const fn stopped() -> Self {
        Self {
            remaining_seconds: 0,
            active: false,
        }
    }

    /// Start (or resume) counting down from `seconds`.
    ///
    /// Starting from zero leaves the countdown inactive.
    pub const fn start(&mut self, seconds: u32) {
        self.remaining_seconds = seconds;
        self.active = seconds > 0;
    }

    /// Stop ticking, keeping the remaining seconds.
    pub const fn stop(&mut self) {
        self.active = false;
    }

    /// Stop ticking and clear the remaining seconds.
    pub const fn reset(&mut self) {
        *self = Self::stopped();
    }

    /// Consume one second.
    pub const fn tick(&mut self) -> TickOutcome {
        if !self.active {
            return TickOutcome::Idle;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.active = false;
            TickOutcome::Expired
        } else {
            TickOutcome::Counting {
                remaining_seconds: self.remaining_seconds,
            }
        }
    }

    /// Seconds left.
    pub const fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Whether ticks currently consume time.
    pub const fn is_active(&self) -> bool {
        self.active
    }
}

/// Periodic wake-up source for the control loop.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    interval: Option<Interval>,
}

impl Ticker {
    /// Create a disarmed ticker with the given period.
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start ticking. The first tick fires one full period from now.
    /// Arming an armed ticker keeps its phase.
    pub fn arm(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let now = Instant::now();
        let first = now.checked_add(self.period).unwrap_or(now);
        let mut interval = tokio::time::interval_at(first, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Stop ticking.
    pub fn disarm(&mut self) {
        self.interval = None;
    }

    /// Whether the ticker is running.
    pub const fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Never completes while disarmed.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_to_expiry() {
        let mut countdown = Countdown::stopped();
        countdown.start(3);
        assert_eq!(
            countdown.tick(),
            TickOutcome::Counting {
                remaining_seconds: 2
            }
        );
        assert_eq!(
            countdown.tick(),
            TickOutcome::Counting {
                remaining_seconds: 1
            }
        );
        assert_eq!(countdown.tick(), TickOutcome::Expired);
        assert!(!countdown.is_active());
        assert_eq!(countdown.tick(), TickOutcome::Idle);
    }

    #[test]
    fn full_race_is_exactly_six_hundred_ticks() {
        let mut countdown = Countdown::stopped();
        countdown.start(600);
        let mut ticks = 0u32;
        let mut last = 600u32;
        loop {
            ticks = ticks.saturating_add(1);
            match countdown.tick() {
                TickOutcome::Counting { remaining_seconds } => {
                    assert_eq!(remaining_seconds, last.saturating_sub(1));
                    last = remaining_seconds;
                }
                TickOutcome::Expired => break,
                TickOutcome::Idle => break,
            }
        }
        assert_eq!(ticks, 600);
        assert_eq!(countdown.remaining_seconds(), 0);
    }

    #[test]
    fn stop_keeps_remaining() {
        let mut countdown = Countdown::stopped();
        countdown.start(10);
        let _ = countdown.tick();
        countdown.stop();
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining_seconds(), 9);
        countdown.reset();
        assert_eq!(countdown.remaining_seconds(), 0);
    }

    #[test]
    fn starting_from_zero_stays_inactive() {
        let mut countdown = Countdown::stopped();
        countdown.start(0);
        assert!(!countdown.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_once_per_period() {
        let mut ticker = Ticker::new(Duration::from_secs(1));
        ticker.arm();
        let begin = Instant::now();
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(begin.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_ticker_never_fires() {
        let mut ticker = Ticker::new(Duration::from_secs(1));
        assert!(!ticker.is_armed());
        let fired = tokio::time::timeout(Duration::from_secs(5), ticker.tick()).await;
        assert!(fired.is_err());
    }
}
