//! Runner error types.

use summit_core::{ParticipantId, TripId};
use summit_lottery::{ValidationError, WaitlistError};
use summit_state::StateError;
use thiserror::Error;

/// Errors surfaced by assignment runs and waitlist operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("capacity of {trip} changed from {expected} to {actual} during the run")]
    CapacityConflict { trip: TripId, expected: u32, actual: u32 },

    #[error("{} participants cancelled on {trip} during the run", .cancelled.len())]
    SignupsChanged { trip: TripId, cancelled: Vec<ParticipantId> },

    #[error("an assignment run for {window} is already in progress ({holder})")]
    ConcurrentRunConflict { window: String, holder: String },

    #[error("trip not found: {0}")]
    TripNotFound(TripId),

    #[error("signups for {0} are closed")]
    SignupsClosed(TripId),

    #[error("{0} is not a first-come-first-served trip")]
    NotFcfs(TripId),

    #[error("waitlist error: {0}")]
    Waitlist(#[from] WaitlistError),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("draw task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StateError> for RunnerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::CapacityConflict { trip, expected, actual } => {
                RunnerError::CapacityConflict { trip, expected, actual }
            }
            StateError::SignupsChanged { trip, cancelled } => {
                RunnerError::SignupsChanged { trip, cancelled }
            }
            StateError::RunLockHeld { window, holder } => {
                RunnerError::ConcurrentRunConflict { window, holder }
            }
            other => RunnerError::State(other),
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
