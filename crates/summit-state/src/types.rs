//! Domain types for the Summit state store.
//!
//! These types represent the persisted state of participants, trips,
//! signups, pairing requests, committed rosters, and run locks. All types
//! are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use summit_core::{Activity, Algorithm, CarStatus, ParticipantId, TripId};

use crate::tables::id_key;

// ── Participant ───────────────────────────────────────────────────

/// A club member as seen by the assignment engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub email: String,
    pub car_status: CarStatus,
    /// Seats offered besides the driver. Only meaningful for drivers.
    pub number_of_passengers: Option<u32>,
    /// Unix timestamp (seconds) of the last profile change.
    pub updated_at: u64,
}

impl Participant {
    pub fn table_key(&self) -> String {
        id_key(self.id.0)
    }

    /// Update car status, clearing the passenger count for non-drivers.
    pub fn set_car_status(&mut self, status: CarStatus, passengers: Option<u32>) {
        self.car_status = status;
        self.number_of_passengers = if status == CarStatus::None {
            None
        } else {
            passengers
        };
    }
}

// ── Trip ──────────────────────────────────────────────────────────

/// A scheduled trip with a fixed number of participant slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: TripId,
    pub name: String,
    pub activity: Activity,
    pub trip_date: NaiveDate,
    /// Maximum number of participants (leaders excluded).
    pub capacity: u32,
    pub algorithm: Algorithm,
    /// Unix timestamp (seconds) when signups open.
    pub signups_open_at: u64,
    /// Unix timestamp (seconds) when signups close.
    pub signups_close_at: u64,
    pub leaders: Vec<ParticipantId>,
    /// Only units with at least one driver may be placed.
    pub car_dependent: bool,
    pub updated_at: u64,
}

impl Trip {
    pub fn table_key(&self) -> String {
        id_key(self.id.0)
    }

    /// Whether signups are accepted at `now` (half-open window).
    pub fn signups_open(&self, now: u64) -> bool {
        self.signups_open_at <= now && now < self.signups_close_at
    }
}

// ── Signup ────────────────────────────────────────────────────────

/// A participant's request to go on a trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signup {
    pub participant: ParticipantId,
    pub trip: TripId,
    /// Lottery rank among the participant's signups (lower is preferred).
    pub order: Option<u32>,
    /// Unix timestamp (seconds) when the signup was created.
    pub created_at: u64,
}

impl Signup {
    pub fn table_key(&self) -> String {
        Self::key(self.trip, self.participant)
    }

    pub fn key(trip: TripId, participant: ParticipantId) -> String {
        format!("{}:{}", id_key(trip.0), id_key(participant.0))
    }
}

/// A signup change written in the same transaction as a roster.
#[derive(Debug, Clone, PartialEq)]
pub enum SignupEdit {
    Create(Signup),
    Delete { trip: TripId, participant: ParticipantId },
}

// ── Pairing ───────────────────────────────────────────────────────

/// A directed request from `requester` to be placed together with `requested`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairRequest {
    pub requester: ParticipantId,
    pub requested: ParticipantId,
    /// Unix timestamp (seconds) of the last edit to this request.
    pub updated_at: u64,
}

impl PairRequest {
    pub fn table_key(&self) -> String {
        format!("{}:{}", id_key(self.requester.0), id_key(self.requested.0))
    }
}

// ── Candidates ────────────────────────────────────────────────────

/// A placement unit: one participant, or a resolved pair placed atomically.
///
/// Pair members are stored with the lower id first so that the same pair
/// always compares equal regardless of which member it was built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Candidate {
    Single { participant: ParticipantId },
    Pair { first: ParticipantId, second: ParticipantId },
}

impl Candidate {
    pub fn single(participant: ParticipantId) -> Self {
        Candidate::Single { participant }
    }

    pub fn pair(a: ParticipantId, b: ParticipantId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Candidate::Pair { first, second }
    }

    /// Number of trip slots this unit occupies.
    pub fn size(&self) -> u32 {
        match self {
            Candidate::Single { .. } => 1,
            Candidate::Pair { .. } => 2,
        }
    }

    pub fn members(&self) -> Vec<ParticipantId> {
        match *self {
            Candidate::Single { participant } => vec![participant],
            Candidate::Pair { first, second } => vec![first, second],
        }
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        match *self {
            Candidate::Single { participant: p } => p == participant,
            Candidate::Pair { first, second } => first == participant || second == participant,
        }
    }

    /// Lowest member id, used only to canonicalize unit order before shuffling.
    pub fn anchor(&self) -> ParticipantId {
        match *self {
            Candidate::Single { participant } => participant,
            Candidate::Pair { first, .. } => first,
        }
    }

    /// The unit left behind when `participant` withdraws from it.
    pub fn without(&self, participant: ParticipantId) -> Option<Candidate> {
        match *self {
            Candidate::Single { .. } => None,
            Candidate::Pair { first, second } if first == participant => {
                Some(Candidate::single(second))
            }
            Candidate::Pair { first, second } if second == participant => {
                Some(Candidate::single(first))
            }
            Candidate::Pair { .. } => Some(*self),
        }
    }
}

// ── Roster ────────────────────────────────────────────────────────

/// A waitlisted unit with its insertion sequence number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitlistEntry {
    pub unit: Candidate,
    /// Monotonic per-trip insertion counter. Position is the index in the
    /// waitlist, not this value.
    pub seq: u64,
}

/// The committed outcome for one trip: who is going and who is waiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TripRoster {
    pub trip_id: TripId,
    /// Trip capacity this roster was computed against.
    pub capacity: u32,
    pub on_trip: Vec<Candidate>,
    pub waitlist: Vec<WaitlistEntry>,
    /// On-trip participants who own or rent a car.
    pub drivers: Vec<ParticipantId>,
    pub next_seq: u64,
    pub updated_at: u64,
}

impl TripRoster {
    pub fn empty(trip_id: TripId, capacity: u32) -> Self {
        Self {
            trip_id,
            capacity,
            ..Self::default()
        }
    }

    pub fn table_key(&self) -> String {
        id_key(self.trip_id.0)
    }

    pub fn on_trip_count(&self) -> u32 {
        self.on_trip.iter().map(Candidate::size).sum()
    }

    pub fn waitlisted_count(&self) -> u32 {
        self.waitlist.iter().map(|e| e.unit.size()).sum()
    }

    pub fn is_on_trip(&self, participant: ParticipantId) -> bool {
        self.on_trip.iter().any(|u| u.contains(participant))
    }

    pub fn is_waitlisted(&self, participant: ParticipantId) -> bool {
        self.waitlist.iter().any(|e| e.unit.contains(participant))
    }

    /// Every participant on the trip, in unit order.
    pub fn on_trip_participants(&self) -> Vec<ParticipantId> {
        self.on_trip.iter().flat_map(Candidate::members).collect()
    }

    /// Every waitlisted participant, in waitlist order.
    pub fn waitlisted_participants(&self) -> Vec<ParticipantId> {
        self.waitlist.iter().flat_map(|e| e.unit.members()).collect()
    }

    /// Check the roster invariants: capacity bound and no participant
    /// listed twice across the on-trip set and the waitlist.
    pub fn check(&self) -> Result<(), String> {
        if self.on_trip_count() > self.capacity {
            return Err(format!(
                "{} on trip exceeds capacity {}",
                self.on_trip_count(),
                self.capacity
            ));
        }
        let mut seen = BTreeSet::new();
        for p in self
            .on_trip_participants()
            .into_iter()
            .chain(self.waitlisted_participants())
        {
            if !seen.insert(p) {
                return Err(format!("{p} listed more than once"));
            }
        }
        Ok(())
    }
}

// ── Run lock ──────────────────────────────────────────────────────

/// Lease held by an assignment run over a scheduling window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLock {
    pub window: String,
    pub holder: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}
