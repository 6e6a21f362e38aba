//! Type-safe identifier wrappers.
//!
//! Races are identified by a monotonically assigned integer. The queue
//! hands out ids in creation order and never reuses one, so a [`RaceId`]
//! also identifies the session that runs when the race is promoted.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Unique identifier for a race (queued entry or promoted session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct RaceId(#[ts(type = "number")] pub u64);

impl RaceId {
    /// The first id handed out by an empty queue.
    pub const FIRST: Self = Self(1);

    /// Return the inner integer value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// The id that follows this one, or `None` on overflow.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }
}

impl core::fmt::Display for RaceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RaceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RaceId> for u64 {
    fn from(id: RaceId) -> Self {
        id.0
    }
}
