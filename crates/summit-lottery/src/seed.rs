//! Reproducible randomness for lottery draws.
//!
//! Each trip draw gets its own RNG seeded from the run seed, the trip id,
//! and a stream tag. Draws can therefore run in any order, or in parallel,
//! and still produce the same shuffle for the same run seed.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use summit_core::TripId;
use summit_state::Candidate;

/// Stream tag for the primary draw of a trip.
pub const STREAM_DRAW: &str = "draw";

/// Stream tag for leftover-seat filling after a batch's primary draws.
pub const STREAM_LEFTOVER: &str = "leftover";

/// Derive a per-trip seed from the run seed.
pub fn derive_seed(run_seed: u64, trip: TripId, stream: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(run_seed.to_le_bytes());
    hasher.update(trip.0.to_le_bytes());
    hasher.update(stream.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Sort units into canonical order, then shuffle them with `seed`.
///
/// Sorting first makes the result independent of how the caller collected
/// the units.
pub fn shuffle_units(units: &mut [Candidate], seed: u64) {
    units.sort_by_key(Candidate::anchor);
    let mut rng = StdRng::seed_from_u64(seed);
    units.shuffle(&mut rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use summit_core::ParticipantId;

    fn units(ids: &[u64]) -> Vec<Candidate> {
        ids.iter().map(|&n| Candidate::single(ParticipantId(n))).collect()
    }

    #[test]
    fn derived_seeds_differ_by_trip_and_stream() {
        let a = derive_seed(7, TripId(1), STREAM_DRAW);
        assert_eq!(a, derive_seed(7, TripId(1), STREAM_DRAW));
        assert_ne!(a, derive_seed(7, TripId(2), STREAM_DRAW));
        assert_ne!(a, derive_seed(7, TripId(1), STREAM_LEFTOVER));
        assert_ne!(a, derive_seed(8, TripId(1), STREAM_DRAW));
    }

    #[test]
    fn shuffle_ignores_input_order() {
        let mut forward = units(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut backward = units(&[8, 7, 6, 5, 4, 3, 2, 1]);
        shuffle_units(&mut forward, 42);
        shuffle_units(&mut backward, 42);
        assert_eq!(forward, backward);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut shuffled = units(&[3, 1, 2, 5, 4]);
        shuffle_units(&mut shuffled, 9);
        let mut sorted = shuffled.clone();
        sorted.sort();
        assert_eq!(sorted, units(&[1, 2, 3, 4, 5]));
    }
}
