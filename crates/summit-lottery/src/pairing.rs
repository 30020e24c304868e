//! Pair resolution — turns directed pair requests into placement units.
//!
//! A pair exists only when both participants asked for each other. When one
//! participant is reciprocally paired with several others, the mutual pair
//! whose most recent request is newest wins; remaining conflicts are broken
//! by the lower participant ids. Losing relationships decay to one-sided
//! requests and are reported as ambiguities.

use std::collections::{BTreeMap, BTreeSet};

use summit_core::ParticipantId;
use summit_state::{Candidate, PairRequest};
use tracing::{debug, warn};

use crate::error::ValidationError;

/// Two participants who asked for each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPair {
    pub first: ParticipantId,
    pub second: ParticipantId,
    /// Member whose own request was edited last. Their ranking is the
    /// pair's ranking in the lottery.
    pub lead: ParticipantId,
}

impl ResolvedPair {
    pub fn partner_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if participant == self.first {
            Some(self.second)
        } else if participant == self.second {
            Some(self.first)
        } else {
            None
        }
    }

    pub fn unit(&self) -> Candidate {
        Candidate::pair(self.first, self.second)
    }
}

/// A reciprocal relationship dropped because a member was already paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingAmbiguity {
    pub dropped: (ParticipantId, ParticipantId),
    /// The pair that claimed one of the dropped members first.
    pub kept: ResolvedPair,
}

impl std::fmt::Display for PairingAmbiguity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mutual pairing {}<->{} dropped in favour of {}<->{}",
            self.dropped.0, self.dropped.1, self.kept.first, self.kept.second
        )
    }
}

/// Result of resolving a cohort's pair requests.
#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    partners: BTreeMap<ParticipantId, ResolvedPair>,
    /// Requests that did not end up in a resolved pair. Informational only.
    pub one_sided: Vec<PairRequest>,
    pub ambiguities: Vec<PairingAmbiguity>,
}

impl PairingOutcome {
    pub fn pair_of(&self, participant: ParticipantId) -> Option<&ResolvedPair> {
        self.partners.get(&participant)
    }

    pub fn partner_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        self.pair_of(participant)?.partner_of(participant)
    }

    /// The unit a participant is placed as, ignoring whether the partner
    /// signed up for any particular trip.
    pub fn unit_for(&self, participant: ParticipantId) -> Candidate {
        match self.pair_of(participant) {
            Some(pair) => pair.unit(),
            None => Candidate::single(participant),
        }
    }

    /// Each resolved pair once, ordered by first member.
    pub fn pairs(&self) -> Vec<ResolvedPair> {
        let mut seen = BTreeSet::new();
        self.partners
            .values()
            .filter(|p| seen.insert(p.first))
            .copied()
            .collect()
    }
}

pub struct PairingResolver;

impl PairingResolver {
    /// Resolve a cohort's requests. Self-pairing is rejected outright.
    pub fn resolve(requests: &[PairRequest]) -> Result<PairingOutcome, ValidationError> {
        if let Some(bad) = requests.iter().find(|r| r.requester == r.requested) {
            return Err(ValidationError::SelfPairing(bad.requester));
        }

        // Latest edit per directed edge.
        let mut directed: BTreeMap<(ParticipantId, ParticipantId), u64> = BTreeMap::new();
        for r in requests {
            let at = directed.entry((r.requester, r.requested)).or_insert(r.updated_at);
            *at = (*at).max(r.updated_at);
        }

        // Mutual edges, weighted by their most recent request.
        let mut mutual: Vec<(u64, ParticipantId, ParticipantId)> = directed
            .iter()
            .filter(|((a, b), _)| a < b)
            .filter_map(|(&(a, b), &ab)| {
                let ba = *directed.get(&(b, a))?;
                Some((ab.max(ba), a, b))
            })
            .collect();
        mutual.sort_by(|x, y| y.0.cmp(&x.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let mut outcome = PairingOutcome::default();
        for (_, a, b) in mutual {
            let claimed = outcome
                .partners
                .get(&a)
                .or_else(|| outcome.partners.get(&b))
                .copied();
            if let Some(kept) = claimed {
                let ambiguity = PairingAmbiguity { dropped: (a, b), kept };
                warn!(%ambiguity, "pairing ambiguity resolved");
                outcome.ambiguities.push(ambiguity);
                continue;
            }

            let (ab, ba) = (directed[&(a, b)], directed[&(b, a)]);
            let lead = if ba > ab { b } else { a };
            let pair = ResolvedPair { first: a, second: b, lead };
            outcome.partners.insert(a, pair);
            outcome.partners.insert(b, pair);
            debug!(first = %a, second = %b, %lead, "pair resolved");
        }

        outcome.one_sided = requests
            .iter()
            .filter(|r| outcome.partner_of(r.requester) != Some(r.requested))
            .cloned()
            .collect();

        Ok(outcome)
    }
}
