//! Summit trip assignment — pairing, lottery draw, FCFS, waitlists.
//!
//! Everything in this crate is synchronous and free of I/O. It takes
//! trips, signups, and pair requests as loaded by the runner and produces
//! [`TripDraw`]s: the roster a trip would have, plus a per-participant
//! outcome for auditing. Committing a draw is the runner's job.
//!
//! # Components
//!
//! - **`pairing`** — Reciprocal pair resolution with a deterministic tie-break
//! - **`waitlist`** — Per-trip on-trip set and FIFO waitlist with pair-atomic promotion
//! - **`pool`** — Candidate arena with ranked preferences and consumption flags
//! - **`lottery`** — Seeded per-date lottery draw in fairness order
//! - **`fcfs`** — Timestamp-ordered placement for first-come-first-served trips
//! - **`validate`** — Input checks that exclude offending trips before a run

pub mod draw;
pub mod error;
pub mod fcfs;
pub mod lottery;
pub mod pairing;
pub mod pool;
pub mod seed;
pub mod validate;
pub mod waitlist;

pub use draw::{DrawState, Outcome, TripDraw};
pub use error::{ValidationError, WaitlistError};
pub use fcfs::FcfsAssigner;
pub use lottery::{BatchDraw, LotteryBatch, LotteryEngine};
pub use pairing::{PairingAmbiguity, PairingOutcome, PairingResolver, ResolvedPair};
pub use pool::{CandidatePool, ranked_preferences};
pub use seed::{derive_seed, shuffle_units};
pub use validate::validate_inputs;
pub use waitlist::{Removed, Waitlist};
