//! The race queue: ordered not-yet-run races and their rosters.
//!
//! The queue is FIFO by creation order. Ids come from a counter that only
//! moves forward, so an id is never handed out twice, even after entries
//! are removed or promoted to a session.

use std::collections::{BTreeSet, VecDeque};

use raceway_types::{
    DriverAssignment, MAX_CAR_NUMBER, MAX_DRIVERS_PER_RACE, MIN_CAR_NUMBER, RaceId, RaceQueueEntry,
};

/// Roster validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    /// More than eight drivers in one race.
    #[error("a race holds at most {MAX_DRIVERS_PER_RACE} drivers, got {count}")]
    TooManyDrivers {
        /// Number of drivers submitted.
        count: usize,
    },

    /// Two drivers share a name.
    #[error("driver {name:?} appears more than once")]
    DuplicateDriver {
        /// The repeated name.
        name: String,
    },

    /// Two drivers share a car.
    #[error("car {car_number} is assigned more than once")]
    DuplicateCar {
        /// The repeated car number.
        car_number: u8,
    },

    /// Car number outside `1..=8`.
    #[error("car number {car_number} is outside {MIN_CAR_NUMBER}..={MAX_CAR_NUMBER}")]
    InvalidCarNumber {
        /// The rejected car number.
        car_number: u8,
    },

    /// A driver name was empty after trimming.
    #[error("driver name must not be empty")]
    EmptyDriverName,
}

/// Queue operation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Another queued race already has this name.
    #[error("a race named {name:?} is already queued")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// A race name was empty after trimming.
    #[error("race name must not be empty")]
    EmptyName,

    /// The roster failed validation.
    #[error("invalid roster: {source}")]
    Roster {
        /// The underlying roster error.
        #[from]
        source: RosterError,
    },

    /// No queued race has this id.
    #[error("race {id} not found")]
    NotFound {
        /// The missing id.
        id: RaceId,
    },

    /// The race has no driver with this name.
    #[error("driver {driver_name:?} is not in race {id}")]
    DriverNotFound {
        /// The race that was searched.
        id: RaceId,
        /// The missing driver.
        driver_name: String,
    },

    /// The queue has no races.
    #[error("the race queue is empty")]
    Empty,

    /// The id counter reached `u64::MAX`.
    #[error("race ids exhausted")]
    IdsExhausted,
}

/// Ordered collection of not-yet-run races.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceQueue {
    entries: VecDeque<RaceQueueEntry>,
    next_id: RaceId,
}

impl Default for RaceQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RaceQueue {
    /// Create an empty queue whose first id is [`RaceId::FIRST`].
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: RaceId::FIRST,
        }
    }

    /// Rebuild a queue from durable storage.
    ///
    /// `entries` must already be in FIFO order. The id counter resumes
    /// after the largest of the loaded ids and `next_id_hint`.
    pub fn restore(entries: Vec<RaceQueueEntry>, next_id_hint: RaceId) -> Self {
        let after_loaded = entries
            .iter()
            .map(|e| e.id)
            .max()
            .and_then(RaceId::next)
            .unwrap_or(RaceId::FIRST);
        Self {
            entries: entries.into(),
            next_id: after_loaded.max(next_id_hint).max(RaceId::FIRST),
        }
    }

    /// Append a new race to the back of the queue.
    pub fn enqueue(
        &mut self,
        name: &str,
        roster: Vec<DriverAssignment>,
    ) -> Result<RaceQueueEntry, QueueError> {
        let name = self.check_name(name, None)?;
        let drivers = validate_roster(roster)?;
        let id = self.next_id;
        self.next_id = id.next().ok_or(QueueError::IdsExhausted)?;

        let entry = RaceQueueEntry { id, name, drivers };
        self.entries.push_back(entry.clone());
        Ok(entry)
    }

    /// Remove and return the race at the head of the queue.
    pub fn dequeue_head(&mut self) -> Result<RaceQueueEntry, QueueError> {
        self.entries.pop_front().ok_or(QueueError::Empty)
    }

    /// Remove a race by id.
    pub fn remove(&mut self, id: RaceId) -> Result<RaceQueueEntry, QueueError> {
        let index = self.position(id)?;
        self.entries.remove(index).ok_or(QueueError::NotFound { id })
    }

    /// Rename a queued race, replace its roster, or both.
    ///
    /// The new name and roster are both validated before either is
    /// written, so a failed update leaves the race untouched.
    pub fn update(
        &mut self,
        id: RaceId,
        name: Option<&str>,
        roster: Option<Vec<DriverAssignment>>,
    ) -> Result<RaceQueueEntry, QueueError> {
        self.position(id)?;
        let name = name.map(|n| self.check_name(n, Some(id))).transpose()?;
        let drivers = roster.map(validate_roster).transpose()?;

        let entry = self.get_mut(id)?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(drivers) = drivers {
            entry.drivers = drivers;
        }
        Ok(entry.clone())
    }

    /// Add one driver to a queued race.
    ///
    /// When `car_number` is `None` the lowest free car is used.
    pub fn assign_driver(
        &mut self,
        id: RaceId,
        driver_name: &str,
        car_number: Option<u8>,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.get_mut(id)?;
        let car_number = match car_number {
            Some(n) => n,
            None => lowest_free_car(&entry.drivers).ok_or(RosterError::TooManyDrivers {
                count: entry.drivers.len().saturating_add(1),
            })?,
        };

        let mut roster = entry.drivers.clone();
        roster.push(DriverAssignment::new(driver_name, car_number));
        entry.drivers = validate_roster(roster)?;
        Ok(entry.clone())
    }

    /// Remove one driver from a queued race.
    pub fn unassign_driver(
        &mut self,
        id: RaceId,
        driver_name: &str,
    ) -> Result<RaceQueueEntry, QueueError> {
        let entry = self.get_mut(id)?;
        let wanted = driver_name.trim();
        let before = entry.drivers.len();
        entry.drivers.retain(|d| d.driver_name != wanted);
        if entry.drivers.len() == before {
            return Err(QueueError::DriverNotFound {
                id,
                driver_name: wanted.to_owned(),
            });
        }
        Ok(entry.clone())
    }

    /// Look up a queued race.
    pub fn get(&self, id: RaceId) -> Option<&RaceQueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// The race that `start` would promote next.
    pub fn peek_head(&self) -> Option<&RaceQueueEntry> {
        self.entries.front()
    }

    /// Iterate races in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &RaceQueueEntry> {
        self.entries.iter()
    }

    /// Owned copy of the queue in FIFO order.
    pub fn snapshot(&self) -> Vec<RaceQueueEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of queued races.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The id the next `enqueue` will assign.
    pub const fn next_id(&self) -> RaceId {
        self.next_id
    }

    fn position(&self, id: RaceId) -> Result<usize, QueueError> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(QueueError::NotFound { id })
    }

    fn get_mut(&mut self, id: RaceId) -> Result<&mut RaceQueueEntry, QueueError> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(QueueError::NotFound { id })
    }

    /// Trim `name` and check it is non-empty and unique, ignoring the
    /// race being renamed.
    fn check_name(&self, name: &str, except: Option<RaceId>) -> Result<String, QueueError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QueueError::EmptyName);
        }
        let taken = self
            .entries
            .iter()
            .any(|e| e.name == name && Some(e.id) != except);
        if taken {
            return Err(QueueError::DuplicateName {
                name: name.to_owned(),
            });
        }
        Ok(name.to_owned())
    }
}

/// Validate a roster and normalise its driver names.
///
/// Names are trimmed. Order is preserved.
pub fn validate_roster(
    roster: Vec<DriverAssignment>,
) -> Result<Vec<DriverAssignment>, RosterError> {
    if roster.len() > MAX_DRIVERS_PER_RACE {
        return Err(RosterError::TooManyDrivers {
            count: roster.len(),
        });
    }

    let mut names = BTreeSet::new();
    let mut cars = BTreeSet::new();
    let mut validated = Vec::with_capacity(roster.len());

    for assignment in roster {
        let driver_name = assignment.driver_name.trim().to_owned();
        if driver_name.is_empty() {
            return Err(RosterError::EmptyDriverName);
        }
        if !(MIN_CAR_NUMBER..=MAX_CAR_NUMBER).contains(&assignment.car_number) {
            return Err(RosterError::InvalidCarNumber {
                car_number: assignment.car_number,
            });
        }
        if !cars.insert(assignment.car_number) {
            return Err(RosterError::DuplicateCar {
                car_number: assignment.car_number,
            });
        }
        if !names.insert(driver_name.clone()) {
            return Err(RosterError::DuplicateDriver { name: driver_name });
        }
        validated.push(DriverAssignment {
            driver_name,
            car_number: assignment.car_number,
        });
    }

    Ok(validated)
}

fn lowest_free_car(drivers: &[DriverAssignment]) -> Option<u8> {
    (MIN_CAR_NUMBER..=MAX_CAR_NUMBER).find(|n| drivers.iter().all(|d| d.car_number != *n))
}
