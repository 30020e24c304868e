//! Input checks run before anything is drawn.
//!
//! Errors are attributed to trips. An offending trip is left out of the
//! run; every other trip proceeds.

use std::collections::{BTreeMap, BTreeSet};

use summit_core::{ParticipantId, TripId};
use summit_state::{PairRequest, Signup};
use tracing::warn;

use crate::error::ValidationError;

/// Map each offending trip to the first error found against it.
///
/// - a participant signed up twice for one trip fails that trip
/// - two signups of one participant sharing a rank fail every trip the
///   participant signed up for
/// - a self-pairing request does the same
pub fn validate_inputs(signups: &[Signup], requests: &[PairRequest]) -> BTreeMap<TripId, ValidationError> {
    let mut failures = BTreeMap::new();
    let mut trips_of: BTreeMap<ParticipantId, BTreeSet<TripId>> = BTreeMap::new();
    let mut seen = BTreeSet::new();

    for s in signups {
        trips_of.entry(s.participant).or_default().insert(s.trip);
        if !seen.insert((s.participant, s.trip)) {
            failures.entry(s.trip).or_insert(ValidationError::DuplicateSignup {
                participant: s.participant,
                trip: s.trip,
            });
        }
    }

    let mut participant_errors: Vec<(ParticipantId, ValidationError)> = Vec::new();

    let mut ranks: BTreeMap<ParticipantId, BTreeSet<u32>> = BTreeMap::new();
    for s in signups {
        let Some(order) = s.order else { continue };
        if !ranks.entry(s.participant).or_default().insert(order) {
            participant_errors.push((
                s.participant,
                ValidationError::DuplicateRank {
                    participant: s.participant,
                    order,
                },
            ));
        }
    }

    for r in requests.iter().filter(|r| r.requester == r.requested) {
        participant_errors.push((r.requester, ValidationError::SelfPairing(r.requester)));
    }

    for (participant, error) in participant_errors {
        for &trip in trips_of.get(&participant).into_iter().flatten() {
            failures.entry(trip).or_insert_with(|| error.clone());
        }
    }

    for (trip, error) in &failures {
        warn!(%trip, %error, "trip excluded from run");
    }
    failures
}
