//! First-come-first-served placement.
//!
//! Units are ordered by signup time, earliest first, with no shuffling. A
//! pair's time is the later of its two signups.

use std::collections::{BTreeMap, BTreeSet};

use summit_core::{Algorithm, ParticipantId};
use summit_state::{Candidate, Signup, Trip};
use tracing::{debug, info};

use crate::draw::TripDraw;
use crate::pairing::PairingOutcome;

pub struct FcfsAssigner;

impl FcfsAssigner {
    /// Units in placement order, with the effective timestamp of each.
    ///
    /// A paired participant whose partner did not sign up for this trip is
    /// returned separately; they cannot be placed without their partner.
    pub fn order_units(
        signups: &[Signup],
        pairing: &PairingOutcome,
    ) -> (Vec<(u64, Candidate)>, Vec<ParticipantId>) {
        let signed: BTreeMap<ParticipantId, u64> = signups
            .iter()
            .map(|s| (s.participant, s.created_at))
            .collect();

        let mut seen = BTreeSet::new();
        let mut units = Vec::new();
        let mut unmatched = Vec::new();
        for (&participant, &at) in &signed {
            if !seen.insert(participant) {
                continue;
            }
            match pairing.partner_of(participant) {
                Some(partner) => match signed.get(&partner) {
                    Some(&partner_at) => {
                        seen.insert(partner);
                        units.push((at.max(partner_at), Candidate::pair(participant, partner)));
                    }
                    None => unmatched.push(participant),
                },
                None => units.push((at, Candidate::single(participant))),
            }
        }
        units.sort_by_key(|&(at, unit)| (at, unit.anchor()));
        (units, unmatched)
    }

    /// Build the full roster for an FCFS trip from its signups.
    pub fn assign(
        trip: &Trip,
        signups: &[Signup],
        pairing: &PairingOutcome,
        is_driver: impl Fn(ParticipantId) -> bool,
    ) -> TripDraw {
        let mut signed_up: Vec<ParticipantId> = signups.iter().map(|s| s.participant).collect();
        signed_up.sort();
        signed_up.dedup();

        let mut draw = TripDraw::new(trip.id, Algorithm::Fcfs, trip.capacity, None, signed_up);
        draw.begin();

        let (ordered, unmatched) = Self::order_units(signups, pairing);
        for participant in unmatched {
            debug!(trip = %trip.id, %participant, "partner has not signed up");
            draw.mark_ineligible(Candidate::single(participant));
        }

        let mut units = Vec::with_capacity(ordered.len());
        for (_, unit) in ordered {
            if trip.car_dependent && !unit.members().into_iter().any(&is_driver) {
                debug!(trip = %trip.id, unit = ?unit, "no driver for car-dependent trip");
                draw.mark_ineligible(unit);
                continue;
            }
            units.push(unit);
        }

        draw.fill(&units, &BTreeSet::new());
        draw.resolve(is_driver);
        info!(
            trip = %trip.id,
            on_trip = draw.roster.on_trip_count(),
            waitlisted = draw.roster.waitlisted_count(),
            "fcfs trip assigned"
        );
        draw
    }
}
