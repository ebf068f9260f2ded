//! Deterministic hash bucketing for percentage inclusion and weighted allocation.
//!
//! Every decision here is a pure function of `(seed, experiment, identity)`:
//!
//! ```text
//! input  = seed + ":" + experiment + ":" + identity     (missing seed = "")
//! digest = SHA-256(input as UTF-8)
//! value  = i32::from_le_bytes(digest[0..4])
//! bucket = |value| mod 100
//! ```
//!
//! Because the bucket is fixed for a given key, raising a percentage only ever adds
//! identities (`bucket < p1` implies `bucket < p2` for `p2 > p1`), so staged rollouts never
//! eject anyone who was already included.

use sha2::{Digest, Sha256};

/// Number of buckets identities are spread over.
pub const BUCKETS: u32 = 100;

/// Deterministic bucket in `[0, 100)` for an identity within an experiment.
///
/// Different `experiment` or `seed` values produce independent buckets for the same identity.
/// Empty identities are valid and hash like any other string.
#[must_use]
pub fn hash_bucket(identity: &str, experiment: &str, seed: Option<&str>) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(seed.unwrap_or("").as_bytes());
    hasher.update(b":");
    hasher.update(experiment.as_bytes());
    hasher.update(b":");
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();

    let value = i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value.unsigned_abs() % BUCKETS
}

/// Whether `identity` falls inside the first `percentage` buckets.
///
/// `percentage <= 0` is never included and `percentage >= 100` is always included; neither
/// case hashes.
#[must_use]
pub fn is_included(identity: &str, experiment: &str, percentage: i32, seed: Option<&str>) -> bool {
    if percentage <= 0 {
        return false;
    }
    if percentage >= BUCKETS as i32 {
        return true;
    }
    hash_bucket(identity, experiment, seed) < percentage as u32
}

/// Index of the weight band containing the identity's bucket.
///
/// Walks cumulative weights and returns the first index with `bucket < cumulative`. When the
/// weights sum to less than 100 and the bucket lands past the total, the last index is
/// returned. Empty `weights` yield `0`; callers validate weights before traffic flows.
#[must_use]
pub fn allocate_bucket(identity: &str, experiment: &str, weights: &[u32], seed: Option<&str>) -> usize {
    let bucket = hash_bucket(identity, experiment, seed);
    let mut cumulative: u32 = 0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative = cumulative.saturating_add(w);
        if bucket < cumulative {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_in_range_and_stable() {
        for i in 0..500 {
            let id = format!("user-{i}");
            let b = hash_bucket(&id, "exp", Some("s"));
            assert!(b < BUCKETS);
            assert_eq!(b, hash_bucket(&id, "exp", Some("s")));
        }
    }

    #[test]
    fn missing_seed_hashes_like_empty_seed() {
        assert_eq!(hash_bucket("u", "exp", None), hash_bucket("u", "exp", Some("")));
    }

    #[test]
    fn percentage_boundaries_short_circuit() {
        for i in 0..200 {
            let id = format!("id{i}");
            assert!(!is_included(&id, "exp", 0, None));
            assert!(!is_included(&id, "exp", -5, None));
            assert!(is_included(&id, "exp", 100, None));
            assert!(is_included(&id, "exp", 250, None));
        }
    }

    #[test]
    fn empty_identity_is_valid() {
        let b = hash_bucket("", "exp", None);
        assert!(b < BUCKETS);
        assert_eq!(is_included("", "exp", 50, None), b < 50);
    }

    #[test]
    fn allocate_bucket_matches_cumulative_bands() {
        for i in 0..300 {
            let id = format!("user-{i}");
            let b = hash_bucket(&id, "exp", None);
            let idx = allocate_bucket(&id, "exp", &[20, 30, 50], None);
            let expected = if b < 20 {
                0
            } else if b < 50 {
                1
            } else {
                2
            };
            assert_eq!(idx, expected, "bucket={b}");
        }
    }

    #[test]
    fn allocate_bucket_short_weights_fall_back_to_last_index() {
        // Weights sum to 10: anyone with bucket >= 10 lands on the last arm.
        for i in 0..300 {
            let id = format!("user-{i}");
            let b = hash_bucket(&id, "exp", None);
            let idx = allocate_bucket(&id, "exp", &[5, 5], None);
            if b >= 10 {
                assert_eq!(idx, 1);
            }
        }
        assert_eq!(allocate_bucket("u", "exp", &[], None), 0);
    }
}
