//! Identifiers and small value types shared by every Summit crate.
//!
//! The newtypes keep participant and trip identifiers from being mixed up
//! at call sites that take both.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A club member who signs up for trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "par-{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(n: u64) -> Self {
        ParticipantId(n)
    }
}

/// A scheduled trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub u64);

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trip-{}", self.0)
    }
}

impl From<u64> for TripId {
    fn from(n: u64) -> Self {
        TripId(n)
    }
}

/// Inclusive range of trip dates whose results are computed in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// A window covering exactly one day.
    pub fn single_day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Key used for the run-lock table.
    pub fn key(&self) -> String {
        format!("{}..{}", self.start, self.end)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Activity category a trip belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Biking,
    Boating,
    Cabin,
    Climbing,
    Hiking,
    #[default]
    WinterSchool,
    Circus,
    OfficialEvent,
    Course,
}

/// How a trip's roster is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Lottery,
    Fcfs,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Lottery => f.write_str("lottery"),
            Algorithm::Fcfs => f.write_str("fcfs"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lottery" => Ok(Algorithm::Lottery),
            "fcfs" => Ok(Algorithm::Fcfs),
            other => Err(format!("unknown algorithm: {other}")),
        }
    }
}

/// Whether a participant can drive to the trailhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    Own,
    Rent,
    #[default]
    None,
}

impl CarStatus {
    /// Owners and renters both count as drivers.
    pub fn is_driver(self) -> bool {
        matches!(self, CarStatus::Own | CarStatus::Rent)
    }
}
