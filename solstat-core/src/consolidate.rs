//! Builds a consolidated view from a usable primary endpoint body.
//!
//! Shared by the fallback orchestrator, which runs the same normalize-then-
//! estimate step per sub-source before merging.

use chrono::Utc;
use std::collections::BTreeSet;
use tracing::debug;

use crate::estimator::Estimator;
use crate::normalizer::CategoryNormalizer;
use crate::types::{
    CanonicalCategoryCount, ConsolidatedStatistics, GLOBAL_KEY, ResolutionPath, StatisticsBody,
};

/// Normalizer + estimator pipeline for one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    normalizer: CategoryNormalizer,
    estimator: Estimator,
}

impl Consolidator {
    pub fn new(estimator: Estimator) -> Self {
        Self {
            normalizer: CategoryNormalizer::new(),
            estimator,
        }
    }

    pub fn normalizer(&self) -> &CategoryNormalizer {
        &self.normalizer
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Build the global totals entry, estimating whatever is missing.
    pub fn global_totals(
        &self,
        total: u64,
        approved: Option<u64>,
        rejected: Option<u64>,
        in_progress: Option<u64>,
    ) -> CanonicalCategoryCount {
        let mut global = CanonicalCategoryCount::zero(GLOBAL_KEY, "All requests");
        global.total = total;
        self.estimator
            .fill(&mut global, approved, rejected, in_progress);
        global
    }

    /// Fill the breakdown of totals-only entries.
    pub fn estimate_totals(
        &self,
        counts: Vec<CanonicalCategoryCount>,
    ) -> Vec<CanonicalCategoryCount> {
        counts
            .into_iter()
            .map(|mut c| {
                self.estimator.fill(&mut c, None, None, None);
                c
            })
            .collect()
    }

    /// Global totals derived from summed per-category counts.
    ///
    /// Returns `None` when there is nothing to sum. The result is estimated
    /// whenever any of the summed parts was.
    pub fn global_from_categories(
        &self,
        counts: &[CanonicalCategoryCount],
    ) -> Option<CanonicalCategoryCount> {
        if counts.is_empty() {
            return None;
        }
        let mut sum = CanonicalCategoryCount::zero(GLOBAL_KEY, "All requests");
        for c in counts {
            sum.absorb(c);
        }
        let mut global = self.global_totals(
            sum.total,
            Some(sum.approved),
            Some(sum.rejected),
            Some(sum.in_progress),
        );
        global.provenance = global.provenance.combine(sum.provenance);
        Some(global)
    }

    /// Consolidate a body the classifier accepted.
    ///
    /// A body that reports no `totalSolicitudes` but carries category maps
    /// takes its global total from the status map, then from the process
    /// map, so a usable body never collapses to an all-zero view.
    pub fn from_body(
        &self,
        body: &StatisticsBody,
        resolution: ResolutionPath,
    ) -> ConsolidatedStatistics {
        let by_process = body
            .by_process_type
            .as_ref()
            .map(|m| {
                self.estimate_totals(self.normalizer.normalize(m.iter().map(|(k, v)| (k, *v))))
            })
            .unwrap_or_default();
        let by_program = body
            .by_program
            .as_ref()
            .map(|m| {
                self.estimate_totals(
                    self.normalizer
                        .normalize_programs(m.iter().map(|(k, v)| (k, *v))),
                )
            })
            .unwrap_or_default();

        let global_totals = match body.total_requests.filter(|&t| t > 0) {
            Some(total) => {
                let (approved, rejected, in_progress) = self.explicit_breakdown(body, total);
                self.global_totals(total, approved, rejected, in_progress)
            }
            None => self.derived_global_totals(body, &by_process),
        };

        ConsolidatedStatistics {
            global_totals,
            by_process,
            by_program,
            partial_failures: BTreeSet::new(),
            sources_attempted: 0,
            resolution,
            as_of: Utc::now(),
        }
    }

    /// Global totals for a body without a usable `totalSolicitudes`.
    fn derived_global_totals(
        &self,
        body: &StatisticsBody,
        by_process: &[CanonicalCategoryCount],
    ) -> CanonicalCategoryCount {
        let status = body.by_status.as_ref().map(|m| {
            self.normalizer
                .status_totals(m.iter().map(|(k, v)| (k, *v)))
        });
        if let Some(s) = status.filter(|s| s.total() > 0) {
            debug!(total = s.total(), "deriving global total from status distribution");
            return self.global_totals(
                s.total(),
                Some(s.approved),
                Some(s.rejected),
                Some(s.in_progress),
            );
        }
        if let Some(global) = self
            .global_from_categories(by_process)
            .filter(|g| g.total > 0)
        {
            debug!(total = global.total, "deriving global total from process types");
            return global;
        }
        self.global_totals(0, None, None, None)
    }

    /// Pick explicit global parts from the body.
    ///
    /// Prefers the `total*` fields. "Submitted" requests count as in
    /// progress. With no totals at all, falls back to the status map, then
    /// to the reported approval percentage.
    fn explicit_breakdown(
        &self,
        body: &StatisticsBody,
        total: u64,
    ) -> (Option<u64>, Option<u64>, Option<u64>) {
        let in_progress = match (body.total_in_progress, body.total_submitted) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
        if body.total_approved.is_some() || body.total_rejected.is_some() {
            return (body.total_approved, body.total_rejected, in_progress);
        }

        if let Some(by_status) = body.by_status.as_ref().filter(|m| !m.is_empty()) {
            let totals = self
                .normalizer
                .status_totals(by_status.iter().map(|(k, v)| (k, *v)));
            debug!(
                approved = totals.approved,
                rejected = totals.rejected,
                in_progress = totals.in_progress,
                "using status distribution for global breakdown"
            );
            return (
                Some(totals.approved),
                Some(totals.rejected),
                Some(totals.in_progress),
            );
        }

        let approved = body
            .approval_percentage
            .filter(|pct| (0.0..=100.0).contains(pct))
            .map(|pct| ((total as f64 * pct / 100.0).round() as u64).min(total));
        (approved, None, in_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CountProvenance;
    use serde_json::json;

    fn body(value: serde_json::Value) -> StatisticsBody {
        StatisticsBody::from_value(&value).unwrap()
    }

    #[test]
    fn test_exact_global_totals() {
        let stats = Consolidator::default().from_body(
            &body(json!({
                "totalSolicitudes": 20,
                "totalAprobadas": 12,
                "totalRechazadas": 3,
                "totalEnviadas": 2,
                "totalEnProceso": 3
            })),
            ResolutionPath::Primary,
        );
        let g = &stats.global_totals;
        assert_eq!((g.total, g.approved, g.rejected, g.in_progress), (20, 12, 3, 5));
        assert_eq!(g.provenance, CountProvenance::Exact);
    }

    #[test]
    fn test_categories_are_estimated_and_consistent() {
        let stats = Consolidator::default().from_body(
            &body(json!({
                "totalSolicitudes": 30,
                "porTipoProceso": { "Reingreso": 10, "REINGRESO": 10, "Homologación": 10 },
                "porPrograma": { "Derecho": 30 }
            })),
            ResolutionPath::Degraded,
        );
        assert_eq!(stats.by_process.len(), 2);
        assert_eq!(stats.by_process[1].canonical_key, "re_entry");
        assert_eq!(stats.by_process[1].total, 20);
        assert_eq!(stats.by_process[1].approved, 14);
        assert_eq!(stats.by_program[0].approved, 21);
        assert!(stats.is_consistent());
        assert_eq!(stats.resolution, ResolutionPath::Degraded);
    }

    #[test]
    fn test_status_map_feeds_global_breakdown() {
        let stats = Consolidator::default().from_body(
            &body(json!({
                "totalSolicitudes": 10,
                "porEstado": { "APROBADA": 4, "RECHAZADA": 4, "EN_PROCESO": 2 }
            })),
            ResolutionPath::Primary,
        );
        let g = &stats.global_totals;
        assert_eq!((g.approved, g.rejected, g.in_progress), (4, 4, 2));
        assert_eq!(stats.approval_rate(), Some(0.4));
    }

    #[test]
    fn test_approval_percentage_fallback() {
        let stats = Consolidator::default().from_body(
            &body(json!({ "totalSolicitudes": 10, "porcentajeAprobacion": 30.0 })),
            ResolutionPath::Primary,
        );
        let g = &stats.global_totals;
        assert_eq!(g.approved, 3);
        assert!(g.is_consistent());
        assert_eq!(g.provenance, CountProvenance::Estimated);
    }

    #[test]
    fn test_maps_only_body_derives_global_from_statuses() {
        let stats = Consolidator::default().from_body(
            &body(json!({
                "totalSolicitudes": 0,
                "porTipoProceso": { "Reingreso": 10 },
                "porEstado": { "APROBADA": 2, "RECHAZADA": 8 }
            })),
            ResolutionPath::Degraded,
        );
        let g = &stats.global_totals;
        assert_eq!((g.total, g.approved, g.rejected, g.in_progress), (10, 2, 8, 0));
        assert_eq!(g.provenance, CountProvenance::Exact);
        assert_eq!(stats.by_process[0].total, 10);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_process_map_only_derives_estimated_global() {
        let stats = Consolidator::default().from_body(
            &body(json!({ "porTipoProceso": { "Reingreso": 10, "Verano": 10 } })),
            ResolutionPath::Degraded,
        );
        let g = &stats.global_totals;
        assert_eq!(g.total, 20);
        assert_eq!(g.approved, 14);
        assert_eq!(g.provenance, CountProvenance::Estimated);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_zero_body_is_all_zero() {
        let stats = Consolidator::default()
            .from_body(&body(json!({ "totalSolicitudes": 0 })), ResolutionPath::Primary);
        assert_eq!(stats.global_totals.total, 0);
        assert!(stats.by_process.is_empty());
        assert!(stats.is_consistent());
        assert!(stats.partial_failures.is_empty());
    }
}
