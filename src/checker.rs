//! Plaintext verification of a revealed sum.
//!
//! Only used for validation runs. In a real deployment neither party knows
//! the other's set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Match,
    Mismatch,
}

impl Verdict {
    pub fn is_match(self) -> bool {
        self == Verdict::Match
    }
}

/// The sum both sets should produce.
pub fn expected_sum(garbler_set: &[u64], evaluator_set: &[u64]) -> u128 {
    garbler_set
        .iter()
        .chain(evaluator_set)
        .map(|&x| x as u128)
        .sum()
}

/// Compares the revealed output with the plaintext sum of both declared sets.
pub fn check(garbler_set: &[u64], evaluator_set: &[u64], revealed: u64) -> Verdict {
    if expected_sum(garbler_set, evaluator_set) == revealed as u128 {
        Verdict::Match
    } else {
        Verdict::Mismatch
    }
}
