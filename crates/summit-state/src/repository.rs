//! The boundary between the assignment engine and persisted records.
//!
//! The runner reads trips, signups, and pairing requests through this trait
//! and commits one roster per trip. [`StateStore`] is the production
//! implementation; tests wrap it to inject concurrent edits.

use std::collections::BTreeSet;

use summit_core::{ParticipantId, TripId, Window};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

pub trait SignupRepository: Send + Sync {
    /// Trips dated inside the scheduling window.
    fn load_open_trips(&self, window: &Window) -> StateResult<Vec<Trip>>;

    fn load_trip(&self, trip: TripId) -> StateResult<Option<Trip>>;

    /// Every signup for the trip, with rank and creation timestamp.
    fn load_signups(&self, trip: TripId) -> StateResult<Vec<Signup>>;

    /// Participant records for the given ids. Unknown ids are skipped.
    fn load_participants(&self, ids: &BTreeSet<ParticipantId>) -> StateResult<Vec<Participant>>;

    /// Pair requests made by any member of the pool.
    fn load_pair_requests(&self, pool: &BTreeSet<ParticipantId>) -> StateResult<Vec<PairRequest>>;

    fn load_roster(&self, trip: TripId) -> StateResult<Option<TripRoster>>;

    /// Record a new signup. Fails with `AlreadyExists` for a repeat.
    fn create_signup(&self, signup: &Signup) -> StateResult<()>;

    fn delete_signup(&self, trip: TripId, participant: ParticipantId) -> StateResult<bool>;

    /// Replace the trip's roster in one transaction. Fails with
    /// `CapacityConflict` if the trip's capacity differs from `roster.capacity`.
    fn commit_placements(&self, roster: &TripRoster) -> StateResult<()>;

    /// Like `commit_placements`, for a roster drawn from signups loaded
    /// earlier. Fails with `SignupsChanged` if a listed participant's
    /// signup has since been deleted.
    fn commit_drawn_placements(&self, roster: &TripRoster) -> StateResult<()>;

    /// Commit a roster and a signup change as one transaction. Returns
    /// whether the edited signup existed beforehand.
    fn commit_placements_with_signup(&self, roster: &TripRoster, edit: &SignupEdit) -> StateResult<bool>;

    fn acquire_run_lock(&self, window: &Window, holder: &str, now: u64, ttl_secs: u64) -> StateResult<RunLock>;

    fn release_run_lock(&self, window: &Window, holder: &str) -> StateResult<bool>;
}

impl SignupRepository for StateStore {
    fn load_open_trips(&self, window: &Window) -> StateResult<Vec<Trip>> {
        self.list_trips_in_window(window)
    }

    fn load_trip(&self, trip: TripId) -> StateResult<Option<Trip>> {
        self.get_trip(trip)
    }

    fn load_signups(&self, trip: TripId) -> StateResult<Vec<Signup>> {
        self.list_signups_for_trip(trip)
    }

    fn load_participants(&self, ids: &BTreeSet<ParticipantId>) -> StateResult<Vec<Participant>> {
        let mut all = self.list_participants()?;
        all.retain(|p| ids.contains(&p.id));
        Ok(all)
    }

    fn load_pair_requests(&self, pool: &BTreeSet<ParticipantId>) -> StateResult<Vec<PairRequest>> {
        let mut all = self.list_pair_requests()?;
        all.retain(|r| pool.contains(&r.requester));
        Ok(all)
    }

    fn load_roster(&self, trip: TripId) -> StateResult<Option<TripRoster>> {
        self.get_roster(trip)
    }

    fn create_signup(&self, signup: &Signup) -> StateResult<()> {
        StateStore::create_signup(self, signup)
    }

    fn delete_signup(&self, trip: TripId, participant: ParticipantId) -> StateResult<bool> {
        StateStore::delete_signup(self, trip, participant)
    }

    fn commit_placements(&self, roster: &TripRoster) -> StateResult<()> {
        self.commit_roster(roster)
    }

    fn commit_drawn_placements(&self, roster: &TripRoster) -> StateResult<()> {
        self.commit_drawn_roster(roster)
    }

    fn commit_placements_with_signup(&self, roster: &TripRoster, edit: &SignupEdit) -> StateResult<bool> {
        self.commit_roster_with_signup(roster, edit)
    }

    fn acquire_run_lock(&self, window: &Window, holder: &str, now: u64, ttl_secs: u64) -> StateResult<RunLock> {
        StateStore::acquire_run_lock(self, &window.key(), holder, now, ttl_secs)
    }

    fn release_run_lock(&self, window: &Window, holder: &str) -> StateResult<bool> {
        StateStore::release_run_lock(self, &window.key(), holder)
    }
}
