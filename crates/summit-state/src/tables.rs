//! redb table definitions for the Summit state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Numeric ids inside keys are zero-padded to 20 digits.

use redb::TableDefinition;

/// Participants keyed by `{participant}`.
pub const PARTICIPANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("participants");

/// Trips keyed by `{trip}`.
pub const TRIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("trips");

/// Signups keyed by `{trip}:{participant}`.
pub const SIGNUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("signups");

/// Pairing requests keyed by `{requester}:{requested}`.
pub const PAIR_REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("pair_requests");

/// Committed rosters (on-trip set and waitlist) keyed by `{trip}`.
pub const ROSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("rosters");

/// Run-lock leases keyed by window key.
pub const RUN_LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("run_locks");

/// Zero-padded key fragment for a numeric id.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
