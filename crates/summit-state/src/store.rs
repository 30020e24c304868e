//! StateStore — redb-backed persistence for Summit.
//!
//! Provides typed CRUD operations over participants, trips, signups,
//! pairing requests, rosters, and run locks. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use summit_core::{Algorithm, ParticipantId, TripId, Window};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [PARTICIPANTS, TRIPS, SIGNUPS, PAIR_REQUESTS, ROSTERS, RUN_LOCKS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove_key(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Participants ───────────────────────────────────────────────

    /// Insert or update a participant.
    pub fn put_participant(&self, participant: &Participant) -> StateResult<()> {
        self.put_json(PARTICIPANTS, &participant.table_key(), participant)?;
        debug!(participant = %participant.id, "participant stored");
        Ok(())
    }

    pub fn get_participant(&self, id: ParticipantId) -> StateResult<Option<Participant>> {
        self.get_json(PARTICIPANTS, &id_key(id.0))
    }

    pub fn list_participants(&self) -> StateResult<Vec<Participant>> {
        self.scan_json(PARTICIPANTS, "")
    }

    // ── Trips ──────────────────────────────────────────────────────

    /// Insert or update a trip. Capacity edits go through here.
    pub fn put_trip(&self, trip: &Trip) -> StateResult<()> {
        self.put_json(TRIPS, &trip.table_key(), trip)?;
        debug!(trip = %trip.id, capacity = trip.capacity, "trip stored");
        Ok(())
    }

    pub fn get_trip(&self, id: TripId) -> StateResult<Option<Trip>> {
        self.get_json(TRIPS, &id_key(id.0))
    }

    pub fn list_trips(&self) -> StateResult<Vec<Trip>> {
        self.scan_json(TRIPS, "")
    }

    /// Trips dated inside the window, in id order.
    pub fn list_trips_in_window(&self, window: &Window) -> StateResult<Vec<Trip>> {
        let mut trips = self.list_trips()?;
        trips.retain(|t| window.contains(t.trip_date));
        Ok(trips)
    }

    /// Delete a trip together with its signups and roster.
    pub fn delete_trip(&self, id: TripId) -> StateResult<bool> {
        let trip_key = id_key(id.0);
        let prefix = format!("{trip_key}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut trips = txn.open_table(TRIPS).map_err(map_err!(Table))?;
            existed = trips.remove(trip_key.as_str()).map_err(map_err!(Write))?.is_some();

            let mut signups = txn.open_table(SIGNUPS).map_err(map_err!(Table))?;
            let keys: Vec<String> = signups
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect();
            for key in &keys {
                signups.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut rosters = txn.open_table(ROSTERS).map_err(map_err!(Table))?;
            rosters.remove(trip_key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(trip = %id, existed, "trip deleted");
        Ok(existed)
    }

    // ── Signups ────────────────────────────────────────────────────

    /// Create a signup. A participant has at most one signup per trip.
    pub fn create_signup(&self, signup: &Signup) -> StateResult<()> {
        let key = signup.table_key();
        let value = serde_json::to_vec(signup).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SIGNUPS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!(
                    "{} already signed up for {}",
                    signup.participant, signup.trip
                )));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(trip = %signup.trip, participant = %signup.participant, "signup created");
        Ok(())
    }

    /// Insert or update a signup (rank edits).
    pub fn put_signup(&self, signup: &Signup) -> StateResult<()> {
        self.put_json(SIGNUPS, &signup.table_key(), signup)
    }

    pub fn get_signup(&self, trip: TripId, participant: ParticipantId) -> StateResult<Option<Signup>> {
        self.get_json(SIGNUPS, &Signup::key(trip, participant))
    }

    /// All signups for a trip, in participant id order.
    pub fn list_signups_for_trip(&self, trip: TripId) -> StateResult<Vec<Signup>> {
        self.scan_json(SIGNUPS, &format!("{}:", id_key(trip.0)))
    }

    pub fn list_signups_for_participant(&self, participant: ParticipantId) -> StateResult<Vec<Signup>> {
        let mut signups: Vec<Signup> = self.scan_json(SIGNUPS, "")?;
        signups.retain(|s| s.participant == participant);
        Ok(signups)
    }

    pub fn delete_signup(&self, trip: TripId, participant: ParticipantId) -> StateResult<bool> {
        self.remove_key(SIGNUPS, &Signup::key(trip, participant))
    }

    /// Copy `from`'s lottery ranks onto `to`'s signups for the same trips.
    ///
    /// Returns the lottery trips `from` ranked that `to` has not signed up for.
    pub fn sync_pair_ranks(&self, from: ParticipantId, to: ParticipantId) -> StateResult<Vec<TripId>> {
        let ranked = self.list_signups_for_participant(from)?;
        let mut missing = Vec::new();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let trips = txn.open_table(TRIPS).map_err(map_err!(Table))?;
            let mut signups = txn.open_table(SIGNUPS).map_err(map_err!(Table))?;
            for signup in &ranked {
                let is_lottery = match trips.get(id_key(signup.trip.0).as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let trip: Trip =
                            serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                        trip.algorithm == Algorithm::Lottery
                    }
                    None => false,
                };
                if !is_lottery {
                    continue;
                }

                let key = Signup::key(signup.trip, to);
                let partner = match signups.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice::<Signup>(guard.value())
                            .map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
                let Some(mut partner) = partner else {
                    missing.push(signup.trip);
                    continue;
                };
                partner.order = signup.order;
                let value = serde_json::to_vec(&partner).map_err(map_err!(Serialize))?;
                signups
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !missing.is_empty() {
            warn!(%from, %to, missing = missing.len(), "partner has not signed up for every ranked trip");
        }
        Ok(missing)
    }

    // ── Pair requests ──────────────────────────────────────────────

    pub fn put_pair_request(&self, request: &PairRequest) -> StateResult<()> {
        self.put_json(PAIR_REQUESTS, &request.table_key(), request)?;
        debug!(requester = %request.requester, requested = %request.requested, "pair request stored");
        Ok(())
    }

    pub fn list_pair_requests(&self) -> StateResult<Vec<PairRequest>> {
        self.scan_json(PAIR_REQUESTS, "")
    }

    /// Requests made by `requester`.
    pub fn list_pair_requests_by(&self, requester: ParticipantId) -> StateResult<Vec<PairRequest>> {
        self.scan_json(PAIR_REQUESTS, &format!("{}:", id_key(requester.0)))
    }

    /// Requests naming `requested` as the desired partner.
    pub fn list_pair_requests_for(&self, requested: ParticipantId) -> StateResult<Vec<PairRequest>> {
        let mut all = self.list_pair_requests()?;
        all.retain(|r| r.requested == requested);
        Ok(all)
    }

    pub fn delete_pair_request(&self, requester: ParticipantId, requested: ParticipantId) -> StateResult<bool> {
        let key = format!("{}:{}", id_key(requester.0), id_key(requested.0));
        self.remove_key(PAIR_REQUESTS, &key)
    }

    // ── Rosters ────────────────────────────────────────────────────

    pub fn get_roster(&self, trip: TripId) -> StateResult<Option<TripRoster>> {
        self.get_json(ROSTERS, &id_key(trip.0))
    }

    /// Atomically replace a trip's roster.
    ///
    /// Inside one write transaction the trip's current capacity is re-read
    /// and compared with `roster.capacity`; a mismatch aborts with
    /// [`StateError::CapacityConflict`] and nothing is written.
    pub fn commit_roster(&self, roster: &TripRoster) -> StateResult<()> {
        self.write_roster(roster, None, false).map(|_| ())
    }

    /// Replace a roster computed from signups loaded earlier.
    ///
    /// Besides the capacity check, every listed participant must still have
    /// a signup for the trip; otherwise the commit aborts with
    /// [`StateError::SignupsChanged`] naming the cancelled participants.
    pub fn commit_drawn_roster(&self, roster: &TripRoster) -> StateResult<()> {
        self.write_roster(roster, None, true).map(|_| ())
    }

    /// Replace a roster and apply a signup change in the same transaction.
    ///
    /// Returns whether the edited signup existed before the change. Creating
    /// a signup that already exists aborts with [`StateError::AlreadyExists`].
    pub fn commit_roster_with_signup(&self, roster: &TripRoster, edit: &SignupEdit) -> StateResult<bool> {
        self.write_roster(roster, Some(edit), false)
    }

    fn write_roster(
        &self,
        roster: &TripRoster,
        edit: Option<&SignupEdit>,
        require_signups: bool,
    ) -> StateResult<bool> {
        roster.check().map_err(|reason| StateError::InvalidRoster {
            trip: roster.trip_id,
            reason,
        })?;
        let key = roster.table_key();
        let value = serde_json::to_vec(roster).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let trips = txn.open_table(TRIPS).map_err(map_err!(Table))?;
            let trip: Trip = match trips.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(roster.trip_id.to_string())),
            };
            if trip.capacity != roster.capacity {
                return Err(StateError::CapacityConflict {
                    trip: roster.trip_id,
                    expected: roster.capacity,
                    actual: trip.capacity,
                });
            }

            let mut signups = txn.open_table(SIGNUPS).map_err(map_err!(Table))?;
            existed = match edit {
                Some(SignupEdit::Create(signup)) => {
                    let signup_key = signup.table_key();
                    if signups.get(signup_key.as_str()).map_err(map_err!(Read))?.is_some() {
                        return Err(StateError::AlreadyExists(format!(
                            "{} already signed up for {}",
                            signup.participant, signup.trip
                        )));
                    }
                    let signup_value = serde_json::to_vec(signup).map_err(map_err!(Serialize))?;
                    signups
                        .insert(signup_key.as_str(), signup_value.as_slice())
                        .map_err(map_err!(Write))?;
                    false
                }
                Some(SignupEdit::Delete { trip, participant }) => signups
                    .remove(Signup::key(*trip, *participant).as_str())
                    .map_err(map_err!(Write))?
                    .is_some(),
                None => false,
            };

            if require_signups {
                let mut cancelled = Vec::new();
                for participant in roster
                    .on_trip_participants()
                    .into_iter()
                    .chain(roster.waitlisted_participants())
                {
                    let signup_key = Signup::key(roster.trip_id, participant);
                    if signups.get(signup_key.as_str()).map_err(map_err!(Read))?.is_none() {
                        cancelled.push(participant);
                    }
                }
                if !cancelled.is_empty() {
                    warn!(trip = %roster.trip_id, ?cancelled, "roster lists cancelled signups");
                    return Err(StateError::SignupsChanged {
                        trip: roster.trip_id,
                        cancelled,
                    });
                }
            }

            let mut rosters = txn.open_table(ROSTERS).map_err(map_err!(Table))?;
            rosters
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            trip = %roster.trip_id,
            on_trip = roster.on_trip_count(),
            waitlisted = roster.waitlisted_count(),
            "roster committed"
        );
        Ok(existed)
    }

    // ── Run locks ──────────────────────────────────────────────────

    /// Take the run lease for `window`. Fails fast while another unexpired
    /// lease exists; an expired lease is taken over.
    pub fn acquire_run_lock(&self, window: &str, holder: &str, now: u64, ttl_secs: u64) -> StateResult<RunLock> {
        let lock = RunLock {
            window: window.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now.saturating_add(ttl_secs),
        };
        let value = serde_json::to_vec(&lock).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUN_LOCKS).map_err(map_err!(Table))?;
            let existing = match table.get(window).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<RunLock>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            if let Some(existing) = existing {
                if existing.expires_at > now {
                    return Err(StateError::RunLockHeld {
                        window: window.to_string(),
                        holder: existing.holder,
                    });
                }
                info!(%window, stale_holder = %existing.holder, "taking over expired run lock");
            }
            table
                .insert(window, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%window, %holder, "run lock acquired");
        Ok(lock)
    }

    /// Release the lease if `holder` still owns it. Returns true if removed.
    pub fn release_run_lock(&self, window: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(RUN_LOCKS).map_err(map_err!(Table))?;
            let owned = match table.get(window).map_err(map_err!(Read))? {
                Some(guard) => {
                    let lock: RunLock =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    lock.holder == holder
                }
                None => false,
            };
            released = owned && table.remove(window).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%window, %holder, released, "run lock released");
        Ok(released)
    }
}
