//! summit-state — embedded signup store for Summit.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for participants, trips, signups, pairing requests, committed
//! trip rosters, and run locks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{trip}:{participant}`, `{requester}:{requested}`) are
//! zero-padded so prefix scans return related records in id order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements [`SignupRepository`], the boundary the assignment engine
//! reads from and commits to.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::SignupRepository;
pub use store::StateStore;
pub use types::*;
