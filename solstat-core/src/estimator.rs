//! Derived-metric estimation for categories reported only as a total.
//!
//! The upstream system does not always break a category down into
//! approved / rejected / in-progress. When it doesn't, the missing parts are
//! derived from fixed proportions and the result is marked
//! [`CountProvenance::Estimated`] so callers can tell it apart from exact
//! counts. All arithmetic is integer per-mille math, so the parts always sum
//! to the total exactly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{CanonicalCategoryCount, CountProvenance};

/// Default share of approved requests, per mille.
///
/// The 70/10/20 split has no recorded justification upstream; it is kept
/// as a named, configurable heuristic until historical ratios are available.
pub const APPROVED_PER_MILLE: u64 = 700;
/// Default share of rejected requests, per mille.
pub const REJECTED_PER_MILLE: u64 = 100;
/// Default share of in-progress requests, per mille.
pub const IN_PROGRESS_PER_MILLE: u64 = 200;

/// Proportions used when a breakdown has to be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationRatios {
    pub approved_per_mille: u64,
    pub rejected_per_mille: u64,
    pub in_progress_per_mille: u64,
}

impl Default for EstimationRatios {
    fn default() -> Self {
        Self {
            approved_per_mille: APPROVED_PER_MILLE,
            rejected_per_mille: REJECTED_PER_MILLE,
            in_progress_per_mille: IN_PROGRESS_PER_MILLE,
        }
    }
}

impl EstimationRatios {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let sum = self
            .approved_per_mille
            .saturating_add(self.rejected_per_mille)
            .saturating_add(self.in_progress_per_mille);
        if sum != 1000 {
            problems.push(format!("estimation ratios must sum to 1000 per mille, got {sum}"));
        }
        problems
    }

    fn weights(&self) -> [u64; 3] {
        [
            self.approved_per_mille,
            self.rejected_per_mille,
            self.in_progress_per_mille,
        ]
    }
}

/// An approved / rejected / in-progress split of some total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakdown {
    pub approved: u64,
    pub rejected: u64,
    pub in_progress: u64,
    pub provenance: CountProvenance,
}

impl Breakdown {
    pub fn total(&self) -> u64 {
        self.approved + self.rejected + self.in_progress
    }

    /// Copy the split onto a category entry whose `total` is already set.
    pub fn apply_to(&self, count: &mut CanonicalCategoryCount) {
        count.approved = self.approved;
        count.rejected = self.rejected;
        count.in_progress = self.in_progress;
        count.provenance = self.provenance;
    }
}

/// Derives missing breakdown parts from a total.
#[derive(Debug, Clone, Default)]
pub struct Estimator {
    ratios: EstimationRatios,
}

impl Estimator {
    pub fn new(ratios: EstimationRatios) -> Self {
        Self { ratios }
    }

    pub fn ratios(&self) -> &EstimationRatios {
        &self.ratios
    }

    /// Split `total` into parts, keeping whichever explicit values are usable.
    ///
    /// Guarantees `approved + rejected + in_progress == total`.
    pub fn estimate(
        &self,
        total: u64,
        approved: Option<u64>,
        rejected: Option<u64>,
        in_progress: Option<u64>,
    ) -> Breakdown {
        let mut known = [approved, rejected, in_progress];

        if let [Some(a), Some(r), Some(p)] = known {
            if a.checked_add(r).and_then(|s| s.checked_add(p)) == Some(total) {
                return Breakdown {
                    approved: a,
                    rejected: r,
                    in_progress: p,
                    provenance: CountProvenance::Exact,
                };
            }
            // In-progress is the least reliable figure upstream; let it absorb the gap.
            debug!(total, approved = a, rejected = r, in_progress = p, "explicit breakdown does not sum to total");
            known[2] = None;
        }

        let known_sum = known
            .iter()
            .flatten()
            .try_fold(0u64, |acc, v| acc.checked_add(*v));
        if known_sum.is_none_or(|sum| sum > total) {
            debug!(total, ?known_sum, "explicit parts exceed total, discarding them");
            known = [None, None, None];
        }

        let parts = self.split(total, known);
        Breakdown {
            approved: parts[0],
            rejected: parts[1],
            in_progress: parts[2],
            provenance: CountProvenance::Estimated,
        }
    }

    /// Estimate a category entry in place from its total and optional parts.
    pub fn fill(
        &self,
        count: &mut CanonicalCategoryCount,
        approved: Option<u64>,
        rejected: Option<u64>,
        in_progress: Option<u64>,
    ) {
        self.estimate(count.total, approved, rejected, in_progress)
            .apply_to(count);
    }

    /// Distribute the residual over the unknown slots by renormalized weight.
    /// The last unknown slot takes whatever rounding leaves behind.
    ///
    /// Callers guarantee the known parts sum to at most `total`. Shares are
    /// computed in `u128`, so any `u64` total splits without overflow.
    fn split(&self, total: u64, known: [Option<u64>; 3]) -> [u64; 3] {
        let weights = self.ratios.weights();
        let residual = total - known.iter().flatten().sum::<u64>();
        let unknown: Vec<usize> = (0..3).filter(|&i| known[i].is_none()).collect();
        let weight_sum: u128 = unknown.iter().map(|&i| u128::from(weights[i])).sum();

        let mut parts = [known[0].unwrap_or(0), known[1].unwrap_or(0), known[2].unwrap_or(0)];
        let Some((&last, rest)) = unknown.split_last() else {
            return parts;
        };

        let mut assigned = 0;
        for &i in rest {
            let share = if weight_sum == 0 {
                0
            } else {
                // weights[i] <= weight_sum, so the share never exceeds the residual.
                let share = u128::from(residual) * u128::from(weights[i]) / weight_sum;
                u64::try_from(share).unwrap_or(residual)
            };
            parts[i] = share;
            assigned += share;
        }
        parts[last] = residual - assigned;
        parts
    }
}
