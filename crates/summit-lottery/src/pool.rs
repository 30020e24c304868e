//! Candidate pool for one trip-date batch.
//!
//! The pool is an arena of placement units indexed by participant. Placing
//! a unit on a trip flips its `consumed` flag instead of removing it from
//! any list, so the order in which trips were processed can be replayed
//! from the draws alone.

use std::collections::{BTreeMap, BTreeSet};

use summit_core::{ParticipantId, TripId};
use summit_state::{Candidate, Signup};

use crate::pairing::PairingOutcome;

/// A participant's trips in preference order.
///
/// Ranked signups come first by `order`; unranked ones follow by creation
/// time. Trip id breaks any remaining tie so the list is always total.
pub fn ranked_preferences(signups: &[Signup]) -> Vec<TripId> {
    let mut sorted: Vec<&Signup> = signups.iter().collect();
    sorted.sort_by_key(|s| (s.order.is_none(), s.order, s.created_at, s.trip));
    sorted.into_iter().map(|s| s.trip).collect()
}

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub unit: Candidate,
    /// Trips this unit may be drawn for, most preferred first.
    pub prefs: Vec<TripId>,
    /// At least one member owns or rents a car.
    pub has_driver: bool,
    consumed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    entries: Vec<PoolEntry>,
    by_participant: BTreeMap<ParticipantId, usize>,
}

impl CandidatePool {
    /// Build units from the batch's signups.
    ///
    /// A resolved pair becomes one unit ranked by its lead's list, limited to
    /// trips both members signed up for. A paired participant whose partner
    /// has no signup in the batch gets an empty list and is never drawn.
    pub fn build(
        signups: &[Signup],
        pairing: &PairingOutcome,
        is_driver: impl Fn(ParticipantId) -> bool,
    ) -> Self {
        let mut by_member: BTreeMap<ParticipantId, Vec<Signup>> = BTreeMap::new();
        for s in signups {
            by_member.entry(s.participant).or_default().push(s.clone());
        }

        let mut pool = CandidatePool::default();
        for (&participant, own) in &by_member {
            if pool.by_participant.contains_key(&participant) {
                continue;
            }
            let (unit, prefs) = match pairing.pair_of(participant) {
                Some(pair) => {
                    let partner = pair.partner_of(participant).unwrap_or(participant);
                    match by_member.get(&partner) {
                        Some(theirs) => {
                            let shared: BTreeSet<TripId> = own
                                .iter()
                                .map(|s| s.trip)
                                .filter(|t| theirs.iter().any(|o| o.trip == *t))
                                .collect();
                            let lead = if pair.lead == participant { own } else { theirs };
                            let prefs = ranked_preferences(lead)
                                .into_iter()
                                .filter(|t| shared.contains(t))
                                .collect();
                            (pair.unit(), prefs)
                        }
                        None => (Candidate::single(participant), Vec::new()),
                    }
                }
                None => (Candidate::single(participant), ranked_preferences(own)),
            };
            pool.insert(unit, prefs, &is_driver);
        }
        pool
    }

    fn insert(&mut self, unit: Candidate, prefs: Vec<TripId>, is_driver: &impl Fn(ParticipantId) -> bool) {
        let idx = self.entries.len();
        for member in unit.members() {
            self.by_participant.insert(member, idx);
        }
        self.entries.push(PoolEntry {
            unit,
            has_driver: unit.members().into_iter().any(is_driver),
            prefs,
            consumed: false,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: usize) -> &PoolEntry {
        &self.entries[idx]
    }

    pub fn index_of(&self, participant: ParticipantId) -> Option<usize> {
        self.by_participant.get(&participant).copied()
    }

    pub fn is_consumed(&self, idx: usize) -> bool {
        self.entries[idx].consumed
    }

    pub fn consume(&mut self, idx: usize) {
        self.entries[idx].consumed = true;
    }

    pub fn release(&mut self, idx: usize) {
        self.entries[idx].consumed = false;
    }

    /// First preference not yet processed.
    pub fn top_remaining(&self, idx: usize, processed: &BTreeSet<TripId>) -> Option<TripId> {
        self.entries[idx]
            .prefs
            .iter()
            .copied()
            .find(|t| !processed.contains(t))
    }

    /// Unconsumed units whose top remaining preference is `trip`.
    pub fn candidates_for(&self, trip: TripId, processed: &BTreeSet<TripId>) -> Vec<usize> {
        (0..self.entries.len())
            .filter(|&i| !self.entries[i].consumed)
            .filter(|&i| self.top_remaining(i, processed) == Some(trip))
            .collect()
    }

    /// Unconsumed units that list `trip` anywhere in their preferences.
    pub fn wanting(&self, trip: TripId) -> Vec<usize> {
        (0..self.entries.len())
            .filter(|&i| !self.entries[i].consumed && self.entries[i].prefs.contains(&trip))
            .collect()
    }

    /// Seats requested for `trip`, counting pairs as two.
    pub fn demand(&self, trip: TripId) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.prefs.contains(&trip))
            .map(|e| e.unit.size())
            .sum()
    }
}
