//! AssignmentRunner — one scheduled assignment run over a window.
//!
//! A run:
//! - takes the window's run lock (fails fast if another run holds it)
//! - loads trips, signups, pair requests, and participants
//! - excludes trips with invalid input
//! - resolves pairs once for the whole cohort
//! - draws lottery batches (one per trip date) and FCFS trips in parallel
//! - commits each trip on its own, retrying after a capacity conflict

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use summit_core::config::LotteryConfig;
use summit_core::{Algorithm, ParticipantId, TripId, Window};
use summit_lottery::{
    BatchDraw, DrawState, FcfsAssigner, LotteryBatch, LotteryEngine, PairingResolver, TripDraw,
    validate_inputs,
};
use summit_state::{Candidate, Signup, SignupRepository, Trip, TripRoster};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::manager::WaitlistManager;
use crate::report::RunReport;

static RUNNER_SEQ: AtomicU64 = AtomicU64::new(0);

enum Drawn {
    Batch(BatchDraw),
    Fcfs(TripDraw),
}

pub struct AssignmentRunner {
    repo: Arc<dyn SignupRepository>,
    waitlists: WaitlistManager,
    config: LotteryConfig,
    holder: String,
}

impl AssignmentRunner {
    pub fn new(repo: Arc<dyn SignupRepository>, config: LotteryConfig) -> Self {
        Self {
            waitlists: WaitlistManager::new(repo.clone()),
            repo,
            config,
            holder: format!(
                "summitd-{}-{}",
                std::process::id(),
                RUNNER_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
        }
    }

    /// Identify this runner in run-lock records.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn waitlists(&self) -> &WaitlistManager {
        &self.waitlists
    }

    /// Compute and commit rosters for every trip dated inside `window`.
    pub async fn run_assignment(&self, window: &Window) -> RunnerResult<RunReport> {
        let now = epoch_secs();
        if let Err(e) = self
            .repo
            .acquire_run_lock(window, &self.holder, now, self.config.lock_ttl_secs)
        {
            let e = RunnerError::from(e);
            warn!(%window, error = %e, "assignment run rejected");
            return Err(e);
        }

        let result = self.run_locked(window, now).await;

        match self.repo.release_run_lock(window, &self.holder) {
            Ok(true) => debug!(%window, "run lock released"),
            Ok(false) => warn!(%window, holder = %self.holder, "run lock was taken over during the run"),
            Err(e) => error!(%window, error = %e, "failed to release run lock"),
        }
        result
    }

    /// Promote from a trip's waitlist after a vacancy.
    pub async fn promote_from_waitlist(&self, trip: TripId) -> RunnerResult<Option<Candidate>> {
        self.waitlists.promote_from_waitlist(trip).await
    }

    async fn run_locked(&self, window: &Window, now: u64) -> RunnerResult<RunReport> {
        let seed = self.config.seed.unwrap_or(now);
        let mut report = RunReport::new(*window, seed);

        let trips = self.repo.load_open_trips(window)?;
        let mut signups: BTreeMap<TripId, Vec<Signup>> = BTreeMap::new();
        for trip in &trips {
            signups.insert(trip.id, self.repo.load_signups(trip.id)?);
        }
        let all_signups: Vec<Signup> = signups.values().flatten().cloned().collect();
        let cohort: BTreeSet<ParticipantId> = all_signups.iter().map(|s| s.participant).collect();
        let requests = self.repo.load_pair_requests(&cohort)?;
        info!(
            %window,
            seed,
            trips = trips.len(),
            signups = all_signups.len(),
            pair_requests = requests.len(),
            "assignment run started"
        );

        let invalid = validate_inputs(&all_signups, &requests);
        for trip in &trips {
            if let Some(e) = invalid.get(&trip.id) {
                report.record_failed(trip.id, trip.algorithm, 0, e.to_string());
            }
        }

        // Self-pairing already excluded the offending trips above.
        let requests: Vec<_> = requests
            .into_iter()
            .filter(|r| r.requester != r.requested)
            .collect();
        let pairing = Arc::new(PairingResolver::resolve(&requests)?);
        report.pairing_warnings = pairing.ambiguities.iter().map(|a| a.to_string()).collect();

        let drivers: Arc<BTreeSet<ParticipantId>> = Arc::new(
            self.repo
                .load_participants(&cohort)?
                .into_iter()
                .filter(|p| p.car_status.is_driver())
                .map(|p| p.id)
                .collect(),
        );

        let mut batches: BTreeMap<NaiveDate, LotteryBatch> = BTreeMap::new();
        let mut fcfs: Vec<Trip> = Vec::new();
        for trip in trips.into_iter().filter(|t| !invalid.contains_key(&t.id)) {
            match trip.algorithm {
                Algorithm::Lottery => {
                    let batch = batches.entry(trip.trip_date).or_insert_with(|| LotteryBatch {
                        date: trip.trip_date,
                        trips: Vec::new(),
                        signups: Vec::new(),
                        drivers: drivers.as_ref().clone(),
                        pairing: pairing.clone(),
                    });
                    batch.signups.extend(signups.remove(&trip.id).unwrap_or_default());
                    batch.trips.push(trip);
                }
                Algorithm::Fcfs => fcfs.push(trip),
            }
        }

        let engine = LotteryEngine::new(seed);
        let mut tasks = JoinSet::new();
        for batch in batches.into_values() {
            tasks.spawn_blocking(move || Drawn::Batch(engine.draw_batch(&batch)));
        }
        for trip in fcfs {
            let trip_signups = signups.remove(&trip.id).unwrap_or_default();
            let pairing = pairing.clone();
            let drivers = drivers.clone();
            tasks.spawn_blocking(move || {
                Drawn::Fcfs(FcfsAssigner::assign(&trip, &trip_signups, &pairing, |p| drivers.contains(&p)))
            });
        }

        let mut drawn = Vec::new();
        while let Some(result) = tasks.join_next().await {
            drawn.push(result?);
        }

        for item in drawn {
            match item {
                Drawn::Batch(batch) => {
                    // Drawn placements until a trip commits, then what it committed.
                    let mut placed = batch.placements();
                    for trip in &batch.order {
                        let Some(draw) = batch.draws.get(trip) else { continue };
                        let blocked: BTreeSet<ParticipantId> = placed
                            .iter()
                            .filter(|(other, _)| *other != trip)
                            .flat_map(|(_, members)| members.iter().copied())
                            .collect();
                        let committed = self.commit_draw(draw, &blocked, &drivers, now, &mut report).await;
                        let members: BTreeSet<ParticipantId> = committed
                            .map(|roster| roster.on_trip_participants().into_iter().collect())
                            .unwrap_or_default();
                        placed.insert(*trip, members);
                    }
                }
                Drawn::Fcfs(draw) => {
                    self.commit_draw(&draw, &BTreeSet::new(), &drivers, now, &mut report)
                        .await;
                }
            }
        }

        info!(
            %window,
            committed = report.committed().len(),
            failed = report.failures.len(),
            "assignment run finished"
        );
        Ok(report)
    }

    /// Commit one trip's draw. A capacity conflict reloads the trip and
    /// replays the draw against the new capacity, up to the configured
    /// number of retries. Cancellations made since the signups were loaded
    /// are dropped from the draw before replaying it. Failures are
    /// recorded, never propagated. Returns the committed roster.
    async fn commit_draw(
        &self,
        draw: &TripDraw,
        blocked: &BTreeSet<ParticipantId>,
        drivers: &BTreeSet<ParticipantId>,
        now: u64,
        report: &mut RunReport,
    ) -> Option<TripRoster> {
        if let DrawState::Failed { reason } = &draw.state {
            error!(trip = %draw.trip, %reason, "draw failed");
            report.record_failed(draw.trip, draw.algorithm, 0, reason.clone());
            return None;
        }

        let mut attempt = draw.clone();
        let mut attempts = 1;
        let mut conflicts = 0;
        loop {
            attempt.roster.updated_at = now;
            match self.waitlists.commit(&attempt.roster).await {
                Ok(()) => {
                    info!(
                        trip = %attempt.trip,
                        on_trip = attempt.roster.on_trip_count(),
                        waitlisted = attempt.roster.waitlisted_count(),
                        attempts,
                        "trip committed"
                    );
                    report.record_committed(attempt.algorithm, &attempt.roster, attempts);
                    return Some(attempt.roster);
                }
                Err(RunnerError::SignupsChanged { trip, cancelled }) => {
                    warn!(%trip, cancelled = cancelled.len(), attempts, "signups cancelled during run; redrawing");
                    let cancelled: BTreeSet<ParticipantId> = cancelled.into_iter().collect();
                    let capacity = attempt.capacity();
                    attempt = attempt
                        .without(&cancelled)
                        .refill(capacity, blocked, |p| drivers.contains(&p));
                    attempts += 1;
                }
                Err(RunnerError::CapacityConflict { trip, expected, actual })
                    if conflicts < self.config.capacity_retries =>
                {
                    warn!(%trip, expected, actual, attempts, "capacity changed during run; redrawing");
                    let capacity = match self.repo.load_trip(trip) {
                        Ok(Some(fresh)) => fresh.capacity,
                        Ok(None) => {
                            let e = RunnerError::TripNotFound(trip);
                            error!(%trip, error = %e, "trip vanished during run");
                            report.record_failed(trip, attempt.algorithm, attempts, e.to_string());
                            return None;
                        }
                        Err(e) => {
                            error!(%trip, error = %e, "failed to reload trip");
                            report.record_failed(trip, attempt.algorithm, attempts, e.to_string());
                            return None;
                        }
                    };
                    attempt = attempt.refill(capacity, blocked, |p| drivers.contains(&p));
                    attempts += 1;
                    conflicts += 1;
                }
                Err(e) => {
                    error!(trip = %draw.trip, error = %e, attempts, "trip commit failed");
                    report.record_failed(draw.trip, draw.algorithm, attempts, e.to_string());
                    return None;
                }
            }
        }
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
