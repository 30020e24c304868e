//! Summit assignment runner.
//!
//! Ties the pure algorithms in `summit-lottery` to a [`SignupRepository`]:
//! scheduled runs with a per-window lock, per-trip commits with
//! capacity-conflict retry, and serialized waitlist edits.
//!
//! [`SignupRepository`]: summit_state::SignupRepository

pub mod error;
pub mod manager;
pub mod report;
pub mod runner;

pub use error::{RunnerError, RunnerResult};
pub use manager::{Placement, WaitlistManager};
pub use report::{RunReport, TripReport, TripStatus};
pub use runner::AssignmentRunner;
