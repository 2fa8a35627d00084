//! Sharder implementation.
//!
//! Bucket assignment is a compatibility contract: every rollout and variant split depends on it,
//! so changing the hash, seeds or input layout silently moves users between buckets.
use std::io::Cursor;

use murmur3::murmur3_32;

/// Seed used for rollout percentages.
pub const ROLLOUT_SEED: u32 = 0;
/// Seed used for variant selection, so variant buckets are independent of rollout buckets.
pub const VARIANT_SEED: u32 = 86_028_157;

/// Maps arbitrary input onto a fixed number of shards, stably across processes.
pub trait Sharder {
    /// Map `input` into `[0, total_shards)`. `total_shards` must be non-zero.
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32;
}

/// MurmurHash3 (x86, 32-bit) sharder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Murmur3Sharder {
    seed: u32,
}

impl Murmur3Sharder {
    #[allow(missing_docs)]
    pub const fn new(seed: u32) -> Self {
        Murmur3Sharder { seed }
    }

    /// Bucket for `value` within hash group `group_id`.
    pub fn bucket(&self, group_id: &str, value: &str, total_shards: u32) -> u32 {
        self.get_shard(format!("{group_id}:{value}"), total_shards)
    }
}

impl Sharder for Murmur3Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u32) -> u32 {
        // Reading from an in-memory cursor cannot fail.
        let hash = murmur3_32(&mut Cursor::new(input.as_ref()), self.seed).unwrap_or(0);
        hash % total_shards
    }
}

pub(crate) const ROLLOUT: Murmur3Sharder = Murmur3Sharder::new(ROLLOUT_SEED);
pub(crate) const VARIANTS: Murmur3Sharder = Murmur3Sharder::new(VARIANT_SEED);
