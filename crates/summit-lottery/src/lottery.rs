//! Seeded lottery draw over one trip-date batch.
//!
//! Trips in a batch share one candidate pool. They are drawn one at a time
//! in fairness order (scarcest seats first), and each draw only sees units
//! whose top remaining preference is that trip. A unit placed on one trip
//! is consumed and cannot be drawn again in the batch. Trips with seats
//! left over afterwards are topped up from anyone who still wants them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use summit_core::{Algorithm, ParticipantId, TripId};
use summit_state::{Candidate, Signup, Trip};
use tracing::{debug, info, warn};

use crate::draw::TripDraw;
use crate::pairing::PairingOutcome;
use crate::pool::CandidatePool;
use crate::seed::{STREAM_DRAW, STREAM_LEFTOVER, derive_seed, shuffle_units};

/// Input for one trip-date batch.
#[derive(Debug, Clone)]
pub struct LotteryBatch {
    pub date: NaiveDate,
    pub trips: Vec<Trip>,
    /// Signups for `trips` only.
    pub signups: Vec<Signup>,
    /// Participants who own or rent a car.
    pub drivers: BTreeSet<ParticipantId>,
    /// Resolved once per run and shared by every batch.
    pub pairing: Arc<PairingOutcome>,
}

impl LotteryBatch {
    pub fn is_driver(&self, participant: ParticipantId) -> bool {
        self.drivers.contains(&participant)
    }
}

/// The draws of one batch.
#[derive(Debug, Clone)]
pub struct BatchDraw {
    pub date: NaiveDate,
    /// Trip ids in the order they were drawn.
    pub order: Vec<TripId>,
    pub draws: BTreeMap<TripId, TripDraw>,
}

impl BatchDraw {
    /// On-trip participants of each resolved draw, keyed by trip.
    pub fn placements(&self) -> BTreeMap<TripId, BTreeSet<ParticipantId>> {
        self.draws
            .values()
            .filter(|d| d.is_resolved())
            .map(|d| (d.trip, d.roster.on_trip_participants().into_iter().collect()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LotteryEngine {
    run_seed: u64,
}

impl LotteryEngine {
    pub fn new(run_seed: u64) -> Self {
        Self { run_seed }
    }

    pub fn run_seed(&self) -> u64 {
        self.run_seed
    }

    /// Trips ordered by ascending capacity-to-demand ratio.
    ///
    /// Ratios are compared by cross-multiplication. Trips nobody asked for
    /// go last, and trip id breaks ties.
    pub fn fairness_order(trips: &[Trip], pool: &CandidatePool) -> Vec<TripId> {
        let mut keyed: Vec<(TripId, u64, u64)> = trips
            .iter()
            .map(|t| (t.id, u64::from(t.capacity), u64::from(pool.demand(t.id))))
            .collect();
        keyed.sort_by(|a, b| {
            let by_ratio = match (a.2, b.2) {
                (0, 0) => Ordering::Equal,
                (0, _) => Ordering::Greater,
                (_, 0) => Ordering::Less,
                _ => (a.1 * b.2).cmp(&(b.1 * a.2)),
            };
            by_ratio.then(a.0.cmp(&b.0))
        });
        keyed.into_iter().map(|(id, _, _)| id).collect()
    }

    pub fn draw_batch(&self, batch: &LotteryBatch) -> BatchDraw {
        let mut pool = CandidatePool::build(&batch.signups, &batch.pairing, |p| batch.is_driver(p));
        let order = Self::fairness_order(&batch.trips, &pool);
        let trips: BTreeMap<TripId, &Trip> = batch.trips.iter().map(|t| (t.id, t)).collect();

        let mut draws: BTreeMap<TripId, TripDraw> = BTreeMap::new();
        for trip in &batch.trips {
            let mut signed_up: Vec<ParticipantId> = batch
                .signups
                .iter()
                .filter(|s| s.trip == trip.id)
                .map(|s| s.participant)
                .collect();
            signed_up.sort();
            signed_up.dedup();
            let seed = derive_seed(self.run_seed, trip.id, STREAM_DRAW);
            draws.insert(
                trip.id,
                TripDraw::new(trip.id, Algorithm::Lottery, trip.capacity, Some(seed), signed_up),
            );
        }

        let mut processed = BTreeSet::new();
        for &trip_id in &order {
            let (Some(trip), Some(draw)) = (trips.get(&trip_id), draws.get_mut(&trip_id)) else {
                continue;
            };
            draw.begin();
            let candidates = pool.candidates_for(trip_id, &processed);
            processed.insert(trip_id);

            let units = eligible_units(draw, trip, &pool, candidates);
            let mut shuffled = units;
            if let Some(seed) = draw.seed {
                shuffle_units(&mut shuffled, seed);
            }
            let placed = draw.fill(&shuffled, &BTreeSet::new());
            consume(&mut pool, &placed);

            if let Err(reason) = draw.roster.check() {
                warn!(trip = %trip_id, %reason, "draw failed; releasing its placements");
                release(&mut pool, &placed);
                draw.fail(reason);
                continue;
            }
            debug!(
                trip = %trip_id,
                candidates = shuffled.len(),
                placed = placed.len(),
                "trip drawn"
            );
        }

        for &trip_id in &order {
            let (Some(trip), Some(draw)) = (trips.get(&trip_id), draws.get_mut(&trip_id)) else {
                continue;
            };
            if draw.state.is_terminal() || draw.free_slots() == 0 {
                continue;
            }
            let wanting: Vec<usize> = pool
                .wanting(trip_id)
                .into_iter()
                .filter(|&i| {
                    pool.entry(i)
                        .unit
                        .members()
                        .iter()
                        .all(|&m| !draw.roster.is_on_trip(m) && !draw.roster.is_waitlisted(m))
                })
                .collect();
            let mut leftovers = eligible_units(draw, trip, &pool, wanting);
            if leftovers.is_empty() {
                continue;
            }
            shuffle_units(&mut leftovers, derive_seed(self.run_seed, trip_id, STREAM_LEFTOVER));
            let placed = draw.fill(&leftovers, &BTreeSet::new());
            consume(&mut pool, &placed);
            debug!(trip = %trip_id, placed = placed.len(), "leftover seats filled");
        }

        for draw in draws.values_mut() {
            if !draw.state.is_terminal() {
                draw.resolve(|p| batch.is_driver(p));
            }
        }

        let placed: u32 = draws.values().map(|d| d.roster.on_trip_count()).sum();
        info!(date = %batch.date, trips = order.len(), placed, "batch drawn");

        BatchDraw {
            date: batch.date,
            order,
            draws,
        }
    }
}

/// Units for `trip` from the given pool indices. On car-dependent trips,
/// units without a driver are marked ineligible and dropped.
fn eligible_units(draw: &mut TripDraw, trip: &Trip, pool: &CandidatePool, indices: Vec<usize>) -> Vec<Candidate> {
    let mut units = Vec::with_capacity(indices.len());
    for idx in indices {
        let entry = pool.entry(idx);
        if trip.car_dependent && !entry.has_driver {
            debug!(trip = %trip.id, unit = ?entry.unit, "no driver for car-dependent trip");
            draw.mark_ineligible(entry.unit);
            continue;
        }
        units.push(entry.unit);
    }
    units
}

fn consume(pool: &mut CandidatePool, placed: &[Candidate]) {
    for unit in placed {
        if let Some(idx) = pool.index_of(unit.anchor()) {
            pool.consume(idx);
        }
    }
}

fn release(pool: &mut CandidatePool, placed: &[Candidate]) {
    for unit in placed {
        if let Some(idx) = pool.index_of(unit.anchor()) {
            pool.release(idx);
        }
    }
}
