//! Assignment error types.

use summit_core::{ParticipantId, TripId};
use thiserror::Error;

/// Malformed input rejected before a run draws anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} requested to be paired with themselves")]
    SelfPairing(ParticipantId),

    #[error("{participant} signed up for {trip} more than once")]
    DuplicateSignup { participant: ParticipantId, trip: TripId },

    #[error("{participant} ranked more than one trip as #{order}")]
    DuplicateRank { participant: ParticipantId, order: u32 },
}

/// Errors from direct waitlist operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitlistError {
    #[error("{participant} is already on {trip} or its waitlist")]
    AlreadyListed { trip: TripId, participant: ParticipantId },

    #[error("{participant} is not waitlisted for {trip}")]
    NotWaitlisted { trip: TripId, participant: ParticipantId },

    #[error("{trip} has no room for {needed} more")]
    NoRoom { trip: TripId, needed: u32 },
}
