//! Run reports returned to the orchestration layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use summit_core::{Algorithm, TripId, Window};
use summit_state::TripRoster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripReport {
    pub status: TripStatus,
    pub algorithm: Algorithm,
    pub on_trip_count: u32,
    pub waitlisted_count: u32,
    /// Commit attempts made; more than one after a capacity conflict.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one assignment run over a scheduling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub window: Window,
    pub seed: u64,
    pub per_trip: BTreeMap<TripId, TripReport>,
    pub failures: Vec<TripId>,
    #[serde(default)]
    pub pairing_warnings: Vec<String>,
}

impl RunReport {
    pub fn new(window: Window, seed: u64) -> Self {
        Self {
            window,
            seed,
            per_trip: BTreeMap::new(),
            failures: Vec::new(),
            pairing_warnings: Vec::new(),
        }
    }

    pub fn record_committed(&mut self, algorithm: Algorithm, roster: &TripRoster, attempts: u32) {
        self.per_trip.insert(
            roster.trip_id,
            TripReport {
                status: TripStatus::Committed,
                algorithm,
                on_trip_count: roster.on_trip_count(),
                waitlisted_count: roster.waitlisted_count(),
                attempts,
                error: None,
            },
        );
    }

    pub fn record_failed(&mut self, trip: TripId, algorithm: Algorithm, attempts: u32, error: impl Into<String>) {
        self.per_trip.insert(
            trip,
            TripReport {
                status: TripStatus::Failed,
                algorithm,
                on_trip_count: 0,
                waitlisted_count: 0,
                attempts,
                error: Some(error.into()),
            },
        );
        if let Err(idx) = self.failures.binary_search(&trip) {
            self.failures.insert(idx, trip);
        }
    }

    pub fn committed(&self) -> Vec<TripId> {
        self.per_trip
            .iter()
            .filter(|(_, r)| r.status == TripStatus::Committed)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use summit_core::ParticipantId;
    use summit_state::Candidate;

    fn window() -> Window {
        Window::single_day(NaiveDate::from_ymd_opt(2025, 1, 11).unwrap())
    }

    #[test]
    fn failures_stay_sorted_and_unique() {
        let mut report = RunReport::new(window(), 7);
        report.record_failed(TripId(9), Algorithm::Lottery, 2, "capacity conflict");
        report.record_failed(TripId(3), Algorithm::Fcfs, 1, "duplicate rank");
        report.record_failed(TripId(9), Algorithm::Lottery, 2, "capacity conflict");
        assert_eq!(report.failures, vec![TripId(3), TripId(9)]);
        assert!(!report.is_clean());
    }

    #[test]
    fn json_round_trip() {
        let mut roster = TripRoster::empty(TripId(1), 2);
        roster.on_trip.push(Candidate::pair(ParticipantId(1), ParticipantId(2)));

        let mut report = RunReport::new(window(), 7);
        report.record_committed(Algorithm::Lottery, &roster, 1);
        report.pairing_warnings.push("mutual pairing dropped".to_string());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"committed\""));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.committed(), vec![TripId(1)]);
        assert_eq!(back.per_trip[&TripId(1)].on_trip_count, 2);
    }
}
