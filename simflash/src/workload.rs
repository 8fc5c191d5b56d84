//! Deterministic random workload generation.
//!
//! The filesystem's crash-safety and wear-leveling properties
//! (scenarios 4-6) are exercised with a seeded PRNG so failures are
//! reproducible. This module only generates the *workload description*
//! (which file, how much data, which operation); `sffs`'s test suite
//! drives the actual filesystem calls, since this crate has no
//! knowledge of `sffs`'s types.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// One step of a randomized workload against a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Rewrite the whole file with freshly generated content.
    Rewrite,
    /// Remove the file.
    Delete,
    /// Check that `file_size` matches the model's expectation.
    SizeCheck,
    /// Read the whole file back and compare against the model.
    Verify,
}

/// Generates a reproducible sequence of `(file_index, Op)` pairs plus
/// the random bytes needed to realize `Rewrite` operations, using the
/// weights from §8 scenario 4: p=0.1 rewrite, p=0.1 delete, p=0.1
/// size-check, else verify.
pub struct WorkloadGen {
    rng: Xoshiro256Plus,
    file_count: usize,
}

impl WorkloadGen {
    pub fn new(seed: u64, file_count: usize) -> Self {
        Self { rng: Xoshiro256Plus::seed_from_u64(seed), file_count }
    }

    /// Generate the next `(file_index, Op)` step.
    pub fn next_step(&mut self) -> (usize, Op) {
        let file_index = (self.rng.next_u32() as usize) % self.file_count;
        let roll = self.rng.next_u32() % 100;
        let op = if roll < 10 {
            Op::Rewrite
        } else if roll < 20 {
            Op::Delete
        } else if roll < 30 {
            Op::SizeCheck
        } else {
            Op::Verify
        };
        (file_index, op)
    }

    /// Fill `buf` with the next chunk of pseudo-random file content.
    pub fn fill_content(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    /// Pick a content length in `[min, max)`, per the "~500-1500 bytes"
    /// sizing in scenario 4.
    pub fn content_len(&mut self, min: usize, max: usize) -> usize {
        min + (self.rng.next_u32() as usize) % (max - min)
    }
}
