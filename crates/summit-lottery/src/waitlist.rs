//! Waitlist — a trip's on-trip set plus its ordered FIFO overflow queue.
//!
//! All roster mutation goes through this type so the invariants hold after
//! every operation:
//! - the on-trip count never exceeds capacity
//! - a participant appears at most once across on-trip and waitlist
//! - a pair is promoted, placed, or waitlisted as one unit
//! - waitlisted units keep their relative order except on explicit removal
//!   or reorder

use summit_core::{ParticipantId, TripId};
use summit_state::{Candidate, TripRoster, WaitlistEntry};
use tracing::debug;

use crate::error::WaitlistError;

/// Where a withdrawn participant was listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    OnTrip,
    Waitlist { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waitlist {
    roster: TripRoster,
}

impl Waitlist {
    pub fn new(trip: TripId, capacity: u32) -> Self {
        Self {
            roster: TripRoster::empty(trip, capacity),
        }
    }

    pub fn from_roster(roster: TripRoster) -> Self {
        Self { roster }
    }

    pub fn roster(&self) -> &TripRoster {
        &self.roster
    }

    pub fn into_roster(self) -> TripRoster {
        self.roster
    }

    pub fn trip(&self) -> TripId {
        self.roster.trip_id
    }

    pub fn capacity(&self) -> u32 {
        self.roster.capacity
    }

    /// Change capacity. Placed units are never evicted; a reduction below
    /// the on-trip count simply leaves no free slots.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.roster.capacity = capacity;
    }

    pub fn free_slots(&self) -> u32 {
        self.roster.capacity.saturating_sub(self.roster.on_trip_count())
    }

    pub fn len(&self) -> usize {
        self.roster.waitlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.waitlist.is_empty()
    }

    pub fn is_listed(&self, participant: ParticipantId) -> bool {
        self.roster.is_on_trip(participant) || self.roster.is_waitlisted(participant)
    }

    /// Zero-based waitlist index of the unit containing `participant`.
    pub fn position(&self, participant: ParticipantId) -> Option<usize> {
        self.roster
            .waitlist
            .iter()
            .position(|e| e.unit.contains(participant))
    }

    fn ensure_unlisted(&self, unit: &Candidate) -> Result<(), WaitlistError> {
        match unit.members().into_iter().find(|&p| self.is_listed(p)) {
            Some(participant) => Err(WaitlistError::AlreadyListed {
                trip: self.trip(),
                participant,
            }),
            None => Ok(()),
        }
    }

    /// Put a unit straight onto the trip.
    pub fn place(&mut self, unit: Candidate) -> Result<(), WaitlistError> {
        self.ensure_unlisted(&unit)?;
        if unit.size() > self.free_slots() {
            return Err(WaitlistError::NoRoom {
                trip: self.trip(),
                needed: unit.size(),
            });
        }
        self.roster.on_trip.push(unit);
        Ok(())
    }

    /// Append a single participant to the tail. Returns the zero-based position.
    pub fn enqueue(&mut self, participant: ParticipantId) -> Result<usize, WaitlistError> {
        self.enqueue_unit(Candidate::single(participant))
    }

    /// Append a unit to the tail. Returns the zero-based position.
    pub fn enqueue_unit(&mut self, unit: Candidate) -> Result<usize, WaitlistError> {
        self.ensure_unlisted(&unit)?;
        let seq = self.roster.next_seq;
        self.roster.next_seq += 1;
        self.roster.waitlist.push(WaitlistEntry { unit, seq });
        Ok(self.roster.waitlist.len() - 1)
    }

    /// Move the head of the waitlist onto the trip if it fits.
    ///
    /// A pair at the head stays waitlisted when only one slot is free, and
    /// nothing behind it is promoted.
    pub fn promote(&mut self) -> Option<Candidate> {
        let head = self.roster.waitlist.first()?;
        if head.unit.size() > self.free_slots() {
            debug!(trip = %self.trip(), unit = ?head.unit, "head of waitlist does not fit");
            return None;
        }
        let entry = self.roster.waitlist.remove(0);
        self.roster.on_trip.push(entry.unit);
        Some(entry.unit)
    }

    /// Promote from the head until it no longer fits.
    pub fn promote_all(&mut self) -> Vec<Candidate> {
        std::iter::from_fn(|| self.promote()).collect()
    }

    /// Remove a waitlisted participant. A pair partner stays behind as a
    /// single in the same position.
    pub fn remove(&mut self, participant: ParticipantId) -> Result<usize, WaitlistError> {
        let idx = self.position(participant).ok_or(WaitlistError::NotWaitlisted {
            trip: self.trip(),
            participant,
        })?;
        match self.roster.waitlist[idx].unit.without(participant) {
            Some(rest) => self.roster.waitlist[idx].unit = rest,
            None => {
                self.roster.waitlist.remove(idx);
            }
        }
        Ok(idx)
    }

    /// Remove a participant from wherever they are listed. Does not promote.
    pub fn withdraw(&mut self, participant: ParticipantId) -> Option<Removed> {
        if let Some(idx) = self.roster.on_trip.iter().position(|u| u.contains(participant)) {
            match self.roster.on_trip[idx].without(participant) {
                Some(rest) => self.roster.on_trip[idx] = rest,
                None => {
                    self.roster.on_trip.remove(idx);
                }
            }
            self.roster.drivers.retain(|&d| d != participant);
            return Some(Removed::OnTrip);
        }
        self.remove(participant)
            .ok()
            .map(|position| Removed::Waitlist { position })
    }

    /// Move a waitlisted participant's unit to `new_rank` (zero-based,
    /// clamped to the tail). Other entries keep their relative order.
    pub fn reorder(&mut self, participant: ParticipantId, new_rank: usize) -> Result<usize, WaitlistError> {
        let idx = self.position(participant).ok_or(WaitlistError::NotWaitlisted {
            trip: self.trip(),
            participant,
        })?;
        let entry = self.roster.waitlist.remove(idx);
        let target = new_rank.min(self.roster.waitlist.len());
        self.roster.waitlist.insert(target, entry);
        Ok(target)
    }

    /// Recompute the drivers among on-trip participants.
    pub fn refresh_drivers(&mut self, is_driver: impl Fn(ParticipantId) -> bool) {
        self.roster.drivers = self
            .roster
            .on_trip_participants()
            .into_iter()
            .filter(|&p| is_driver(p))
            .collect();
    }

    pub fn touch(&mut self, now: u64) {
        self.roster.updated_at = now;
    }
}
