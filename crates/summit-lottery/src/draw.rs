//! The result of drawing one trip, before it is committed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use summit_core::{Algorithm, ParticipantId, TripId};
use summit_state::{Candidate, TripRoster};
use tracing::debug;

use crate::waitlist::Waitlist;

/// Lifecycle of a trip's draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DrawState {
    #[default]
    Pending,
    Drawing,
    Resolved,
    Failed { reason: String },
}

impl DrawState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DrawState::Resolved | DrawState::Failed { .. })
    }
}

/// What a run decided for one participant on one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    OnTrip,
    /// 1-based waitlist position.
    Waitlisted { position: usize },
    /// The participant's preferences never reached this trip.
    NotConsidered,
    /// Excluded by a trip rule, e.g. no driver on a car-dependent trip.
    Ineligible,
}

#[derive(Debug, Clone)]
pub struct TripDraw {
    pub trip: TripId,
    pub algorithm: Algorithm,
    /// Shuffle seed; `None` for first-come-first-served trips.
    pub seed: Option<u64>,
    pub state: DrawState,
    /// Every unit considered, in the order it was considered.
    pub shuffled: Vec<Candidate>,
    pub roster: TripRoster,
    pub outcomes: BTreeMap<ParticipantId, Outcome>,
    signed_up: Vec<ParticipantId>,
}

impl TripDraw {
    pub fn new(
        trip: TripId,
        algorithm: Algorithm,
        capacity: u32,
        seed: Option<u64>,
        signed_up: Vec<ParticipantId>,
    ) -> Self {
        Self {
            trip,
            algorithm,
            seed,
            state: DrawState::Pending,
            shuffled: Vec::new(),
            roster: TripRoster::empty(trip, capacity),
            outcomes: BTreeMap::new(),
            signed_up,
        }
    }

    pub fn begin(&mut self) {
        self.state = DrawState::Drawing;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = DrawState::Failed {
            reason: reason.into(),
        };
    }

    pub fn is_resolved(&self) -> bool {
        self.state == DrawState::Resolved
    }

    pub fn capacity(&self) -> u32 {
        self.roster.capacity
    }

    pub fn free_slots(&self) -> u32 {
        self.roster.capacity.saturating_sub(self.roster.on_trip_count())
    }

    pub fn outcome(&self, participant: ParticipantId) -> Option<Outcome> {
        self.outcomes.get(&participant).copied()
    }

    pub fn mark_ineligible(&mut self, unit: Candidate) {
        for member in unit.members() {
            self.outcomes.insert(member, Outcome::Ineligible);
        }
    }

    /// Place units in order while they fit, waitlisting the rest.
    ///
    /// Units with a member in `blocked` are waitlisted even when they would
    /// fit. Returns the units that were placed.
    pub fn fill(&mut self, units: &[Candidate], blocked: &BTreeSet<ParticipantId>) -> Vec<Candidate> {
        let mut waitlist = Waitlist::from_roster(std::mem::take(&mut self.roster));
        let mut placed = Vec::new();
        for &unit in units {
            let members = unit.members();
            if members.iter().any(|&m| waitlist.is_listed(m)) {
                continue;
            }
            let free = members.iter().all(|m| !blocked.contains(m));
            if free && unit.size() <= waitlist.free_slots() && waitlist.place(unit).is_ok() {
                debug!(trip = %self.trip, unit = ?unit, "placed");
                placed.push(unit);
            } else if let Ok(position) = waitlist.enqueue_unit(unit) {
                debug!(trip = %self.trip, unit = ?unit, position, "waitlisted");
            }
        }
        self.shuffled.extend_from_slice(units);
        self.roster = waitlist.into_roster();
        placed
    }

    /// Check the roster and settle per-participant outcomes.
    pub fn resolve(&mut self, is_driver: impl Fn(ParticipantId) -> bool) {
        if let Err(reason) = self.roster.check() {
            self.fail(reason);
            return;
        }
        let mut waitlist = Waitlist::from_roster(std::mem::take(&mut self.roster));
        waitlist.refresh_drivers(is_driver);
        self.roster = waitlist.into_roster();

        for &participant in &self.signed_up {
            let outcome = if self.roster.is_on_trip(participant) {
                Outcome::OnTrip
            } else if let Some(idx) = self
                .roster
                .waitlist
                .iter()
                .position(|e| e.unit.contains(participant))
            {
                Outcome::Waitlisted { position: idx + 1 }
            } else if self.outcomes.get(&participant) == Some(&Outcome::Ineligible) {
                Outcome::Ineligible
            } else {
                Outcome::NotConsidered
            };
            self.outcomes.insert(participant, outcome);
        }
        self.state = DrawState::Resolved;
    }

    /// The same draw with `cancelled` participants dropped from the considered
    /// sequence. A pair losing a member continues as a single. The roster is
    /// left as drawn; call `refill` to recompute it.
    pub fn without(&self, cancelled: &BTreeSet<ParticipantId>) -> TripDraw {
        let mut next = self.clone();
        next.shuffled = self
            .shuffled
            .iter()
            .filter_map(|&unit| {
                cancelled
                    .iter()
                    .try_fold(unit, |unit, &p| if unit.contains(p) { unit.without(p) } else { Some(unit) })
            })
            .collect();
        next.signed_up.retain(|p| !cancelled.contains(p));
        next.outcomes.retain(|p, _| !cancelled.contains(p));
        next
    }

    /// Replay the same considered sequence against a new capacity.
    ///
    /// Used after a concurrent capacity edit or cancellation. Participants
    /// placed on other trips of the same batch are passed as `blocked` so
    /// the replay cannot double-book them.
    pub fn refill(
        &self,
        capacity: u32,
        blocked: &BTreeSet<ParticipantId>,
        is_driver: impl Fn(ParticipantId) -> bool,
    ) -> TripDraw {
        let mut next = TripDraw::new(self.trip, self.algorithm, capacity, self.seed, self.signed_up.clone());
        next.roster.updated_at = self.roster.updated_at;
        next.outcomes = self
            .outcomes
            .iter()
            .filter(|(_, o)| **o == Outcome::Ineligible)
            .map(|(&p, &o)| (p, o))
            .collect();
        next.begin();
        next.fill(&self.shuffled, blocked);
        next.resolve(is_driver);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u64) -> ParticipantId {
        ParticipantId(n)
    }

    fn singles(ids: &[u64]) -> Vec<Candidate> {
        ids.iter().map(|&n| Candidate::single(p(n))).collect()
    }

    #[test]
    fn fill_places_in_order_then_waitlists() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 2, Some(1), vec![p(1), p(2), p(3), p(4)]);
        draw.begin();
        let placed = draw.fill(&singles(&[3, 1, 4]), &BTreeSet::new());
        draw.resolve(|_| false);

        assert_eq!(placed, singles(&[3, 1]));
        assert!(draw.is_resolved());
        assert_eq!(draw.outcome(p(3)), Some(Outcome::OnTrip));
        assert_eq!(draw.outcome(p(4)), Some(Outcome::Waitlisted { position: 1 }));
        assert_eq!(draw.outcome(p(2)), Some(Outcome::NotConsidered));
    }

    #[test]
    fn pair_that_does_not_fit_is_waitlisted_whole() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 2, Some(1), vec![p(1), p(2), p(3)]);
        draw.begin();
        draw.fill(&[Candidate::single(p(3)), Candidate::pair(p(1), p(2))], &BTreeSet::new());
        draw.resolve(|_| false);

        assert_eq!(draw.outcome(p(1)), Some(Outcome::Waitlisted { position: 1 }));
        assert_eq!(draw.outcome(p(2)), Some(Outcome::Waitlisted { position: 1 }));
        assert_eq!(draw.roster.on_trip_count(), 1);
    }

    #[test]
    fn drivers_recorded_on_resolve() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Fcfs, 2, None, vec![p(1), p(2), p(3)]);
        draw.begin();
        draw.fill(&singles(&[1, 2, 3]), &BTreeSet::new());
        draw.resolve(|id| id != p(2));
        assert_eq!(draw.roster.drivers, vec![p(1)]);
    }

    #[test]
    fn refill_replays_sequence_with_new_capacity() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 5, Some(9), (1..=6).map(p).collect());
        draw.begin();
        draw.fill(&singles(&[6, 2, 4, 1, 5, 3]), &BTreeSet::new());
        draw.resolve(|_| false);
        assert_eq!(draw.roster.on_trip_count(), 5);

        let redrawn = draw.refill(3, &BTreeSet::new(), |_| false);
        assert!(redrawn.is_resolved());
        assert_eq!(redrawn.roster.on_trip_participants(), vec![p(6), p(2), p(4)]);
        assert_eq!(redrawn.roster.waitlisted_participants(), vec![p(1), p(5), p(3)]);
        assert_eq!(redrawn.shuffled, draw.shuffled);
    }

    #[test]
    fn without_drops_cancelled_and_splits_pairs() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 2, Some(3), (1..=4).map(p).collect());
        draw.begin();
        draw.fill(
            &[Candidate::single(p(1)), Candidate::pair(p(2), p(3)), Candidate::single(p(4))],
            &BTreeSet::new(),
        );
        draw.resolve(|_| false);
        assert_eq!(draw.roster.on_trip_participants(), vec![p(1), p(4)]);

        let cancelled = BTreeSet::from([p(1), p(3)]);
        let redrawn = draw.without(&cancelled).refill(2, &BTreeSet::new(), |_| false);
        assert_eq!(redrawn.shuffled, singles(&[2, 4]));
        assert_eq!(redrawn.roster.on_trip_participants(), vec![p(2), p(4)]);
        assert_eq!(redrawn.outcome(p(1)), None);
        assert!(redrawn.roster.check().is_ok());
    }

    #[test]
    fn refill_keeps_blocked_participants_off_the_trip() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 1, Some(9), vec![p(1), p(2)]);
        draw.begin();
        draw.fill(&singles(&[1, 2]), &BTreeSet::new());
        draw.resolve(|_| false);

        let blocked = BTreeSet::from([p(2)]);
        let redrawn = draw.refill(2, &blocked, |_| false);
        assert_eq!(redrawn.roster.on_trip_participants(), vec![p(1)]);
        assert_eq!(redrawn.outcome(p(2)), Some(Outcome::Waitlisted { position: 1 }));
    }

    #[test]
    fn ineligible_survives_resolve_and_refill() {
        let mut draw = TripDraw::new(TripId(1), Algorithm::Lottery, 2, Some(1), vec![p(1), p(2)]);
        draw.begin();
        draw.mark_ineligible(Candidate::single(p(2)));
        draw.fill(&singles(&[1]), &BTreeSet::new());
        draw.resolve(|_| true);
        assert_eq!(draw.outcome(p(2)), Some(Outcome::Ineligible));

        let redrawn = draw.refill(2, &BTreeSet::new(), |_| true);
        assert_eq!(redrawn.outcome(p(2)), Some(Outcome::Ineligible));
    }
}
