//! Error types for the Summit state store.

use summit_core::{ParticipantId, TripId};
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("capacity of {trip} changed from {expected} to {actual}")]
    CapacityConflict {
        trip: TripId,
        expected: u32,
        actual: u32,
    },

    #[error("{} listed participants on {trip} no longer have a signup", .cancelled.len())]
    SignupsChanged {
        trip: TripId,
        cancelled: Vec<ParticipantId>,
    },

    #[error("invalid roster for {trip}: {reason}")]
    InvalidRoster { trip: TripId, reason: String },

    #[error("run lock for window {window} held by {holder}")]
    RunLockHeld { window: String, holder: String },
}
