//! WaitlistManager — serialized roster edits against the repository.
//!
//! Every operation that mutates a committed roster takes the trip's lock
//! first, so cancellation-driven promotion, manual waitlist edits, and run
//! commits for one trip never interleave. Unrelated trips proceed in
//! parallel.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use summit_core::{Algorithm, ParticipantId, TripId};
use summit_lottery::{PairingResolver, Removed, Waitlist, WaitlistError};
use summit_state::{Candidate, Signup, SignupEdit, SignupRepository, Trip, TripRoster};
use tracing::{debug, info};

use crate::error::{RunnerError, RunnerResult};
use crate::runner::epoch_secs;

/// Where a signup-time placement put the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    OnTrip,
    /// Zero-based waitlist position.
    Waitlisted { position: usize },
    /// Paired, and the partner has not signed up yet or is already listed.
    Held,
}

#[derive(Clone)]
pub struct WaitlistManager {
    repo: Arc<dyn SignupRepository>,
    locks: Arc<Mutex<HashMap<TripId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl WaitlistManager {
    pub fn new(repo: Arc<dyn SignupRepository>) -> Self {
        Self {
            repo,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn trip_lock(&self, trip: TripId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(trip).or_default().clone()
    }

    fn load(&self, trip: TripId) -> RunnerResult<(Trip, Waitlist)> {
        let record = self.repo.load_trip(trip)?.ok_or(RunnerError::TripNotFound(trip))?;
        let roster = self
            .repo
            .load_roster(trip)?
            .unwrap_or_else(|| TripRoster::empty(trip, record.capacity));
        let mut waitlist = Waitlist::from_roster(roster);
        waitlist.set_capacity(record.capacity);
        Ok((record, waitlist))
    }

    /// Final roster for a write: drivers recomputed, timestamp bumped.
    fn finish(&self, mut waitlist: Waitlist) -> RunnerResult<TripRoster> {
        let members: BTreeSet<ParticipantId> = waitlist.roster().on_trip_participants().into_iter().collect();
        let drivers: BTreeSet<ParticipantId> = self
            .repo
            .load_participants(&members)?
            .into_iter()
            .filter(|p| p.car_status.is_driver())
            .map(|p| p.id)
            .collect();
        waitlist.refresh_drivers(|p| drivers.contains(&p));
        waitlist.touch(epoch_secs());
        Ok(waitlist.into_roster())
    }

    fn save(&self, waitlist: Waitlist) -> RunnerResult<TripRoster> {
        let roster = self.finish(waitlist)?;
        self.repo.commit_placements(&roster)?;
        Ok(roster)
    }

    /// Commit a roster drawn by a run, under the trip's lock.
    ///
    /// Fails with `SignupsChanged` when someone on the roster cancelled
    /// after the run loaded its signups.
    pub async fn commit(&self, roster: &TripRoster) -> RunnerResult<()> {
        let lock = self.trip_lock(roster.trip_id);
        let _guard = lock.lock().await;
        self.repo.commit_drawn_placements(roster)?;
        Ok(())
    }

    pub async fn roster(&self, trip: TripId) -> RunnerResult<TripRoster> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (_, waitlist) = self.load(trip)?;
        Ok(waitlist.into_roster())
    }

    /// Append a participant to the tail of the trip's waitlist.
    pub async fn enqueue(&self, trip: TripId, participant: ParticipantId) -> RunnerResult<usize> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (_, mut waitlist) = self.load(trip)?;
        let position = waitlist.enqueue(participant)?;
        self.save(waitlist)?;
        debug!(%trip, %participant, position, "enqueued");
        Ok(position)
    }

    /// Promote the head of the waitlist if it fits in the free slots.
    pub async fn promote_from_waitlist(&self, trip: TripId) -> RunnerResult<Option<Candidate>> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (_, mut waitlist) = self.load(trip)?;
        let Some(unit) = waitlist.promote() else {
            debug!(%trip, "nothing to promote");
            return Ok(None);
        };
        self.save(waitlist)?;
        info!(%trip, unit = ?unit, "promoted from waitlist");
        Ok(Some(unit))
    }

    pub async fn remove(&self, trip: TripId, participant: ParticipantId) -> RunnerResult<usize> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (_, mut waitlist) = self.load(trip)?;
        let position = waitlist.remove(participant)?;
        self.save(waitlist)?;
        debug!(%trip, %participant, position, "removed from waitlist");
        Ok(position)
    }

    /// Move a waitlisted participant to `new_rank`. Only allowed while the
    /// trip's signups are open.
    pub async fn reorder(
        &self,
        trip: TripId,
        participant: ParticipantId,
        new_rank: usize,
        now: u64,
    ) -> RunnerResult<usize> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (record, mut waitlist) = self.load(trip)?;
        if now >= record.signups_close_at {
            return Err(RunnerError::SignupsClosed(trip));
        }
        let position = waitlist.reorder(participant, new_rank)?;
        self.save(waitlist)?;
        debug!(%trip, %participant, position, "waitlist reordered");
        Ok(position)
    }

    /// Drop a participant from the trip and promote into any freed slots.
    ///
    /// The signup is deleted in the same transaction as the roster write so
    /// later runs do not put them back. Returns the units promoted.
    pub async fn cancel(&self, trip: TripId, participant: ParticipantId) -> RunnerResult<Vec<Candidate>> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (_, mut waitlist) = self.load(trip)?;

        let Some(removed) = waitlist.withdraw(participant) else {
            if !self.repo.delete_signup(trip, participant)? {
                return Err(WaitlistError::NotWaitlisted { trip, participant }.into());
            }
            info!(%trip, %participant, "unplaced signup cancelled");
            return Ok(Vec::new());
        };

        let promoted = match removed {
            Removed::OnTrip => waitlist.promote_all(),
            Removed::Waitlist { .. } => Vec::new(),
        };
        let roster = self.finish(waitlist)?;
        self.repo
            .commit_placements_with_signup(&roster, &SignupEdit::Delete { trip, participant })?;
        info!(%trip, %participant, removed = ?removed, promoted = promoted.len(), "signup cancelled");
        Ok(promoted)
    }

    /// Sign up for an open first-come-first-served trip and take a seat if
    /// one is free, otherwise join the waitlist.
    pub async fn trip_or_wait(&self, trip: TripId, participant: ParticipantId, now: u64) -> RunnerResult<Placement> {
        let lock = self.trip_lock(trip);
        let _guard = lock.lock().await;
        let (record, mut waitlist) = self.load(trip)?;
        if record.algorithm != Algorithm::Fcfs {
            return Err(RunnerError::NotFcfs(trip));
        }
        if !record.signups_open(now) {
            return Err(RunnerError::SignupsClosed(trip));
        }
        if waitlist.is_listed(participant) {
            return Err(WaitlistError::AlreadyListed { trip, participant }.into());
        }

        let signup = Signup {
            participant,
            trip,
            order: None,
            created_at: now,
        };
        let unit = match self.partner_of(participant)? {
            Some(partner) => {
                let signed = self
                    .repo
                    .load_signups(trip)?
                    .iter()
                    .any(|s| s.participant == partner);
                if !signed || waitlist.is_listed(partner) {
                    self.repo.create_signup(&signup)?;
                    debug!(%trip, %participant, %partner, "holding until partner can join");
                    return Ok(Placement::Held);
                }
                Candidate::pair(participant, partner)
            }
            None => Candidate::single(participant),
        };

        let placement = if unit.size() <= waitlist.free_slots() {
            waitlist.place(unit)?;
            Placement::OnTrip
        } else {
            Placement::Waitlisted {
                position: waitlist.enqueue_unit(unit)?,
            }
        };
        let roster = self.finish(waitlist)?;
        self.repo
            .commit_placements_with_signup(&roster, &SignupEdit::Create(signup))?;
        info!(%trip, %participant, placement = ?placement, "signup placed");
        Ok(placement)
    }

    /// Resolved partner of `participant`, looking only at requests that
    /// involve them.
    fn partner_of(&self, participant: ParticipantId) -> RunnerResult<Option<ParticipantId>> {
        let own = self.repo.load_pair_requests(&BTreeSet::from([participant]))?;
        let mut cohort: BTreeSet<ParticipantId> = own.iter().map(|r| r.requested).collect();
        cohort.insert(participant);
        let requests: Vec<_> = self
            .repo
            .load_pair_requests(&cohort)?
            .into_iter()
            .filter(|r| r.requester != r.requested)
            .collect();
        let outcome = PairingResolver::resolve(&requests)?;
        Ok(outcome.partner_of(participant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use summit_core::{Activity, CarStatus, Window};
    use summit_state::{PairRequest, Participant, RunLock, StateResult, StateStore};

    fn p(n: u64) -> ParticipantId {
        ParticipantId(n)
    }

    fn test_trip(id: u64, capacity: u32, algorithm: Algorithm) -> Trip {
        Trip {
            id: TripId(id),
            name: format!("Test Trip #{id}"),
            activity: Activity::Hiking,
            trip_date: NaiveDate::from_ymd_opt(2025, 6, 7).unwrap(),
            capacity,
            algorithm,
            signups_open_at: 100,
            signups_close_at: 200,
            leaders: vec![],
            car_dependent: false,
            updated_at: 0,
        }
    }

    fn participant(id: u64, car_status: CarStatus) -> Participant {
        Participant {
            id: p(id),
            name: format!("Test Participant {id}"),
            email: format!("participant{id}@example.com"),
            car_status,
            number_of_passengers: None,
            updated_at: 0,
        }
    }

    fn setup(trip: Trip) -> (StateStore, WaitlistManager) {
        let store = StateStore::open_in_memory().unwrap();
        store.put_trip(&trip).unwrap();
        let manager = WaitlistManager::new(Arc::new(store.clone()));
        (store, manager)
    }

    /// Reports one more seat than stored, as if capacity were edited
    /// between the manager's read and its write.
    struct StaleCapacity(StateStore);

    impl SignupRepository for StaleCapacity {
        fn load_open_trips(&self, window: &Window) -> StateResult<Vec<Trip>> {
            self.0.load_open_trips(window)
        }

        fn load_trip(&self, trip: TripId) -> StateResult<Option<Trip>> {
            Ok(self.0.load_trip(trip)?.map(|mut t| {
                t.capacity += 1;
                t
            }))
        }

        fn load_signups(&self, trip: TripId) -> StateResult<Vec<Signup>> {
            self.0.load_signups(trip)
        }

        fn load_participants(&self, ids: &BTreeSet<ParticipantId>) -> StateResult<Vec<Participant>> {
            self.0.load_participants(ids)
        }

        fn load_pair_requests(&self, pool: &BTreeSet<ParticipantId>) -> StateResult<Vec<PairRequest>> {
            self.0.load_pair_requests(pool)
        }

        fn load_roster(&self, trip: TripId) -> StateResult<Option<TripRoster>> {
            self.0.load_roster(trip)
        }

        fn create_signup(&self, signup: &Signup) -> StateResult<()> {
            SignupRepository::create_signup(&self.0, signup)
        }

        fn delete_signup(&self, trip: TripId, participant: ParticipantId) -> StateResult<bool> {
            SignupRepository::delete_signup(&self.0, trip, participant)
        }

        fn commit_placements(&self, roster: &TripRoster) -> StateResult<()> {
            self.0.commit_placements(roster)
        }

        fn commit_drawn_placements(&self, roster: &TripRoster) -> StateResult<()> {
            self.0.commit_drawn_placements(roster)
        }

        fn commit_placements_with_signup(&self, roster: &TripRoster, edit: &SignupEdit) -> StateResult<bool> {
            self.0.commit_placements_with_signup(roster, edit)
        }

        fn acquire_run_lock(&self, window: &Window, holder: &str, now: u64, ttl_secs: u64) -> StateResult<RunLock> {
            SignupRepository::acquire_run_lock(&self.0, window, holder, now, ttl_secs)
        }

        fn release_run_lock(&self, window: &Window, holder: &str) -> StateResult<bool> {
            SignupRepository::release_run_lock(&self.0, window, holder)
        }
    }

    fn sign_up(store: &StateStore, trip: TripId, n: u64) {
        store
            .create_signup(&Signup { participant: p(n), trip, order: None, created_at: 100 + n })
            .unwrap();
    }

    fn seed_roster(store: &StateStore, trip: TripId, capacity: u32, on_trip: &[u64], waiting: &[u64]) {
        let mut waitlist = Waitlist::new(trip, capacity);
        for &n in on_trip {
            waitlist.place(Candidate::single(p(n))).unwrap();
        }
        for &n in waiting {
            waitlist.enqueue(p(n)).unwrap();
        }
        store.commit_roster(waitlist.roster()).unwrap();
    }

    #[tokio::test]
    async fn promote_takes_waitlist_head() {
        let (store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 2, &[1], &[2, 3, 4]);

        let promoted = manager.promote_from_waitlist(TripId(1)).await.unwrap();
        assert_eq!(promoted, Some(Candidate::single(p(2))));

        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.waitlisted_participants(), vec![p(3), p(4)]);
        assert_eq!(manager.promote_from_waitlist(TripId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_trip_is_reported() {
        let (_store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        let err = manager.promote_from_waitlist(TripId(99)).await.unwrap_err();
        assert!(matches!(err, RunnerError::TripNotFound(TripId(99))));
    }

    #[tokio::test]
    async fn enqueue_rejects_participant_already_on_trip() {
        let (store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 2, &[1], &[]);

        assert_eq!(manager.enqueue(TripId(1), p(2)).await.unwrap(), 0);
        let err = manager.enqueue(TripId(1), p(1)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Waitlist(WaitlistError::AlreadyListed { .. })));
    }

    #[tokio::test]
    async fn cancel_on_trip_promotes_until_full() {
        let (store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 2, &[1, 2], &[3, 4]);
        store.put_participant(&participant(3, CarStatus::Own)).unwrap();

        let promoted = manager.cancel(TripId(1), p(1)).await.unwrap();
        assert_eq!(promoted, vec![Candidate::single(p(3))]);

        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.on_trip_participants(), vec![p(2), p(3)]);
        assert_eq!(roster.waitlisted_participants(), vec![p(4)]);
        assert_eq!(roster.drivers, vec![p(3)]);
    }

    #[tokio::test]
    async fn cancel_leaves_seat_free_when_pair_heads_waitlist() {
        let (store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        let mut waitlist = Waitlist::new(TripId(1), 2);
        waitlist.place(Candidate::single(p(1))).unwrap();
        waitlist.place(Candidate::single(p(2))).unwrap();
        waitlist.enqueue_unit(Candidate::pair(p(3), p(4))).unwrap();
        waitlist.enqueue(p(5)).unwrap();
        store.commit_roster(waitlist.roster()).unwrap();

        assert!(manager.cancel(TripId(1), p(1)).await.unwrap().is_empty());
        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.on_trip_participants(), vec![p(2)]);
        assert_eq!(roster.waitlisted_participants(), vec![p(3), p(4), p(5)]);
    }

    #[tokio::test]
    async fn cancel_keeps_signup_when_roster_write_fails() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_trip(&test_trip(1, 2, Algorithm::Lottery)).unwrap();
        seed_roster(&store, TripId(1), 2, &[1, 2], &[3]);
        sign_up(&store, TripId(1), 1);
        let manager = WaitlistManager::new(Arc::new(StaleCapacity(store.clone())));

        let err = manager.cancel(TripId(1), p(1)).await.unwrap_err();
        assert!(matches!(err, RunnerError::CapacityConflict { .. }));
        assert!(store.get_signup(TripId(1), p(1)).unwrap().is_some());
        assert!(store.get_roster(TripId(1)).unwrap().unwrap().is_on_trip(p(1)));
    }

    #[tokio::test]
    async fn trip_or_wait_leaves_no_signup_when_roster_write_fails() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_trip(&test_trip(1, 2, Algorithm::Fcfs)).unwrap();
        let manager = WaitlistManager::new(Arc::new(StaleCapacity(store.clone())));

        let err = manager.trip_or_wait(TripId(1), p(1), 120).await.unwrap_err();
        assert!(matches!(err, RunnerError::CapacityConflict { .. }));
        assert!(store.get_signup(TripId(1), p(1)).unwrap().is_none());
        assert!(store.get_roster(TripId(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_rejects_roster_with_cancelled_participant() {
        let (store, manager) = setup(test_trip(1, 2, Algorithm::Lottery));
        sign_up(&store, TripId(1), 1);
        sign_up(&store, TripId(1), 2);
        let mut waitlist = Waitlist::new(TripId(1), 2);
        waitlist.place(Candidate::single(p(1))).unwrap();
        waitlist.place(Candidate::single(p(2))).unwrap();

        manager.cancel(TripId(1), p(2)).await.unwrap();
        let err = manager.commit(waitlist.roster()).await.unwrap_err();
        assert!(matches!(err, RunnerError::SignupsChanged { ref cancelled, .. } if cancelled == &vec![p(2)]));
        assert!(store.get_roster(TripId(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_from_waitlist_does_not_promote() {
        let (store, manager) = setup(test_trip(1, 1, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 1, &[1], &[2, 3]);

        assert!(manager.cancel(TripId(1), p(2)).await.unwrap().is_empty());
        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.waitlisted_participants(), vec![p(3)]);
    }

    #[tokio::test]
    async fn cancel_unknown_participant_fails() {
        let (_store, manager) = setup(test_trip(1, 1, Algorithm::Lottery));
        let err = manager.cancel(TripId(1), p(5)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Waitlist(WaitlistError::NotWaitlisted { .. })));
    }

    #[tokio::test]
    async fn reorder_rejected_after_signups_close() {
        let (store, manager) = setup(test_trip(1, 0, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 0, &[], &[1, 2, 3]);

        assert_eq!(manager.reorder(TripId(1), p(3), 0, 150).await.unwrap(), 0);
        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.waitlisted_participants(), vec![p(3), p(1), p(2)]);

        let err = manager.reorder(TripId(1), p(1), 0, 200).await.unwrap_err();
        assert!(matches!(err, RunnerError::SignupsClosed(_)));
    }

    #[tokio::test]
    async fn remove_closes_the_gap() {
        let (store, manager) = setup(test_trip(1, 0, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 0, &[], &[1, 2, 3]);
        assert_eq!(manager.remove(TripId(1), p(2)).await.unwrap(), 1);
        let roster = manager.roster(TripId(1)).await.unwrap();
        assert_eq!(roster.waitlisted_participants(), vec![p(1), p(3)]);
    }

    #[tokio::test]
    async fn trip_or_wait_fills_then_waitlists() {
        let (store, manager) = setup(test_trip(1, 1, Algorithm::Fcfs));

        assert_eq!(manager.trip_or_wait(TripId(1), p(1), 120).await.unwrap(), Placement::OnTrip);
        assert_eq!(
            manager.trip_or_wait(TripId(1), p(2), 130).await.unwrap(),
            Placement::Waitlisted { position: 0 }
        );
        assert!(store.get_signup(TripId(1), p(2)).unwrap().is_some());
        let err = manager.trip_or_wait(TripId(1), p(2), 140).await.unwrap_err();
        assert!(matches!(err, RunnerError::Waitlist(WaitlistError::AlreadyListed { .. })));
    }

    #[tokio::test]
    async fn trip_or_wait_rejects_lottery_and_closed_trips() {
        let (store, manager) = setup(test_trip(1, 4, Algorithm::Lottery));
        store.put_trip(&test_trip(2, 4, Algorithm::Fcfs)).unwrap();

        let err = manager.trip_or_wait(TripId(1), p(1), 120).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFcfs(_)));
        let err = manager.trip_or_wait(TripId(2), p(1), 250).await.unwrap_err();
        assert!(matches!(err, RunnerError::SignupsClosed(_)));
    }

    #[tokio::test]
    async fn trip_or_wait_holds_first_pair_member_until_partner_signs_up() {
        let (store, manager) = setup(test_trip(1, 4, Algorithm::Fcfs));
        for (a, b) in [(1, 2), (2, 1)] {
            store
                .put_pair_request(&PairRequest { requester: p(a), requested: p(b), updated_at: 1 })
                .unwrap();
        }

        assert_eq!(manager.trip_or_wait(TripId(1), p(1), 120).await.unwrap(), Placement::Held);
        assert_eq!(manager.trip_or_wait(TripId(1), p(2), 125).await.unwrap(), Placement::OnTrip);

        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.on_trip, vec![Candidate::pair(p(1), p(2))]);
    }

    #[tokio::test]
    async fn operations_on_one_trip_are_serialized() {
        let (store, manager) = setup(test_trip(1, 0, Algorithm::Lottery));
        seed_roster(&store, TripId(1), 0, &[], &[]);

        let mut handles = Vec::new();
        for n in 1..=16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.enqueue(TripId(1), p(n)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let roster = store.get_roster(TripId(1)).unwrap().unwrap();
        assert_eq!(roster.waitlist.len(), 16);
        assert!(roster.check().is_ok());
    }
}
