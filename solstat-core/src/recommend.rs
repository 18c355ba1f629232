//! Rule-based recommendations from aggregates and trend classifications.
//!
//! Every rule is evaluated independently and all applicable rules fire.
//! Only exact `(kind, title)` matches are deduplicated.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    ConsolidatedStatistics, Priority, Recommendation, TrendClassification, TrendDirection,
};

pub const KIND_DATA_UNAVAILABLE: &str = "data_unavailable";
pub const KIND_CONCENTRATION: &str = "concentration";
pub const KIND_SELECTION_CRITERIA: &str = "selection_criteria";
pub const KIND_EXPAND_CAPACITY: &str = "expand_capacity";
pub const KIND_REEVALUATE_OFFERING: &str = "reevaluate_offering";

/// Thresholds for the recommendation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Share of the global total (0.0-1.0) at which one process category
    /// counts as concentrated.
    pub concentration_share: f64,
    /// Global approval rate (0.0-1.0) below which selection criteria should
    /// be reviewed.
    pub min_approval_rate: f64,
    /// Percent variation at or above which a growing entity needs capacity.
    pub surge_variation_pct: f64,
    /// Percent variation at or below which a declining entity is re-evaluated.
    pub decline_variation_pct: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            concentration_share: 0.40,
            min_approval_rate: 0.50,
            surge_variation_pct: 30.0,
            decline_variation_pct: -30.0,
        }
    }
}

impl RecommendationConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..=1.0).contains(&self.concentration_share) {
            problems.push("recommendations.concentration_share must be within 0.0-1.0".into());
        }
        if !(0.0..=1.0).contains(&self.min_approval_rate) {
            problems.push("recommendations.min_approval_rate must be within 0.0-1.0".into());
        }
        if self.surge_variation_pct < 0.0 {
            problems.push("recommendations.surge_variation_pct must not be negative".into());
        }
        if self.decline_variation_pct > 0.0 {
            problems.push("recommendations.decline_variation_pct must not be positive".into());
        }
        problems
    }
}

/// Produces the prioritized recommendation list for a dashboard refresh.
#[derive(Debug, Clone, Default)]
pub struct RecommendationGenerator {
    config: RecommendationConfig,
}

impl RecommendationGenerator {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    /// Run every rule, merge exact duplicates, and order by priority.
    pub fn generate(
        &self,
        consolidated: &ConsolidatedStatistics,
        trends: &[TrendClassification],
    ) -> Vec<Recommendation> {
        let mut generated = Vec::new();
        self.data_availability(consolidated, &mut generated);
        self.concentration(consolidated, &mut generated);
        self.approval_rate(consolidated, &mut generated);
        self.trend_rules(trends, &mut generated);

        let mut recommendations = dedup(generated);
        // `sort_by_key` is stable, so equal priorities keep generation order.
        recommendations.sort_by_key(|r| r.priority);
        debug!(count = recommendations.len(), "generated recommendations");
        recommendations
    }

    fn data_availability(&self, stats: &ConsolidatedStatistics, out: &mut Vec<Recommendation>) {
        if !stats.is_total_failure() {
            return;
        }
        let failed: Vec<&str> = stats.partial_failures.iter().map(|id| id.as_str()).collect();
        out.push(Recommendation {
            kind: KIND_DATA_UNAVAILABLE.to_string(),
            title: "Statistics unavailable".to_string(),
            description: format!(
                "No statistics source responded ({}). Figures shown are not real zeros.",
                failed.join(", ")
            ),
            priority: Priority::Critical,
            suggested_actions: vec![
                "Check the statistics service status".to_string(),
                "Retry the refresh once the backend is reachable".to_string(),
            ],
        });
    }

    fn concentration(&self, stats: &ConsolidatedStatistics, out: &mut Vec<Recommendation>) {
        let total = stats.global_totals.total;
        if total == 0 {
            return;
        }
        for category in &stats.by_process {
            let share = category.total as f64 / total as f64;
            if share >= self.config.concentration_share {
                out.push(Recommendation {
                    kind: KIND_CONCENTRATION.to_string(),
                    title: format!("Demand concentrated in {}", category.display_name),
                    description: format!(
                        "{} accounts for {:.1}% of all requests ({} of {}).",
                        category.display_name,
                        share * 100.0,
                        category.total,
                        total
                    ),
                    priority: Priority::High,
                    suggested_actions: vec![
                        format!("Assign additional reviewers to {}", category.display_name),
                        "Publish clearer requirements to reduce incomplete requests".to_string(),
                    ],
                });
            }
        }
    }

    fn approval_rate(&self, stats: &ConsolidatedStatistics, out: &mut Vec<Recommendation>) {
        let Some(rate) = stats.approval_rate() else {
            return;
        };
        if rate < self.config.min_approval_rate {
            out.push(Recommendation {
                kind: KIND_SELECTION_CRITERIA.to_string(),
                title: "Review selection criteria".to_string(),
                description: format!(
                    "Only {:.1}% of requests were approved.",
                    rate * 100.0
                ),
                priority: Priority::Medium,
                suggested_actions: vec![
                    "Audit the most common rejection reasons".to_string(),
                    "Clarify eligibility requirements for applicants".to_string(),
                ],
            });
        }
    }

    fn trend_rules(&self, trends: &[TrendClassification], out: &mut Vec<Recommendation>) {
        for trend in trends {
            match trend.direction {
                TrendDirection::Growing
                    if trend.percent_variation >= self.config.surge_variation_pct =>
                {
                    out.push(Recommendation {
                        kind: KIND_EXPAND_CAPACITY.to_string(),
                        title: format!("Expand capacity for {}", trend.entity_name),
                        description: format!(
                            "Demand for {} is projected at {} next period ({:+.1}%).",
                            trend.entity_name, trend.estimated_next_demand, trend.percent_variation
                        ),
                        priority: Priority::High,
                        suggested_actions: vec![
                            format!("Open additional sections of {}", trend.entity_name),
                            "Confirm instructor availability for the next period".to_string(),
                        ],
                    });
                }
                TrendDirection::Declining
                    if trend.percent_variation <= self.config.decline_variation_pct =>
                {
                    out.push(Recommendation {
                        kind: KIND_REEVALUATE_OFFERING.to_string(),
                        title: format!("Re-evaluate offering of {}", trend.entity_name),
                        description: format!(
                            "Demand for {} is projected at {} next period ({:+.1}%).",
                            trend.entity_name, trend.estimated_next_demand, trend.percent_variation
                        ),
                        priority: Priority::Low,
                        suggested_actions: vec![format!(
                            "Consider merging or rescheduling sections of {}",
                            trend.entity_name
                        )],
                    });
                }
                _ => {}
            }
        }
    }
}

/// Merge recommendations with identical `(kind, title)`.
///
/// Distinct descriptions are concatenated, actions are unioned in order, and
/// the most urgent priority wins. The first occurrence keeps its position.
fn dedup(generated: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut merged: Vec<Recommendation> = Vec::with_capacity(generated.len());
    for rec in generated {
        match merged
            .iter_mut()
            .find(|m| m.kind == rec.kind && m.title == rec.title)
        {
            Some(existing) => {
                if !existing.description.contains(&rec.description) {
                    existing.description.push(' ');
                    existing.description.push_str(&rec.description);
                }
                for action in rec.suggested_actions {
                    if !existing.suggested_actions.contains(&action) {
                        existing.suggested_actions.push(action);
                    }
                }
                existing.priority = existing.priority.min(rec.priority);
            }
            None => merged.push(rec),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalCategoryCount, ResolutionPath, SubSourceId};

    fn stats(total: u64, approved: u64, processes: &[(&str, u64)]) -> ConsolidatedStatistics {
        let mut stats = ConsolidatedStatistics::empty(ResolutionPath::Primary);
        stats.global_totals.total = total;
        stats.global_totals.approved = approved;
        stats.global_totals.in_progress = total - approved;
        stats.by_process = processes
            .iter()
            .map(|(name, count)| {
                let mut c = CanonicalCategoryCount::zero(name.to_lowercase(), *name);
                c.total = *count;
                c.approved = *count;
                c
            })
            .collect();
        stats
    }

    fn trend(name: &str, direction: TrendDirection, variation: f64) -> TrendClassification {
        TrendClassification {
            entity_name: name.to_string(),
            current_demand: 10,
            estimated_next_demand: (10.0 * (1.0 + variation / 100.0)).round() as u64,
            direction,
            percent_variation: variation,
            peak: None,
        }
    }

    #[test]
    fn test_concentration_rule() {
        let recs = RecommendationGenerator::default()
            .generate(&stats(100, 80, &[("Reingreso", 40), ("Verano", 39)]), &[]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, KIND_CONCENTRATION);
        assert!(recs[0].title.contains("Reingreso"));
        assert_eq!(recs[0].priority, Priority::High);
    }

    #[test]
    fn test_low_approval_rule() {
        let recs = RecommendationGenerator::default().generate(&stats(100, 49, &[]), &[]);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, KIND_SELECTION_CRITERIA);
        assert_eq!(recs[0].priority, Priority::Medium);

        let none = RecommendationGenerator::default().generate(&stats(100, 50, &[]), &[]);
        assert!(none.is_empty());
    }

    #[test]
    fn test_zero_total_fires_nothing() {
        let recs = RecommendationGenerator::default().generate(&stats(0, 0, &[]), &[]);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_trend_rules_and_thresholds() {
        let trends = vec![
            trend("Calculus", TrendDirection::Growing, 50.0),
            trend("Algebra", TrendDirection::Growing, 29.9),
            trend("Latin", TrendDirection::Declining, -30.0),
            trend("Greek", TrendDirection::Declining, -10.0),
        ];
        let recs = RecommendationGenerator::default().generate(&stats(10, 10, &[]), &trends);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].kind, KIND_EXPAND_CAPACITY);
        assert!(recs[0].description.contains("15"));
        assert_eq!(recs[1].kind, KIND_REEVALUATE_OFFERING);
        assert_eq!(recs[1].priority, Priority::Low);
    }

    #[test]
    fn test_priority_ordering_is_stable() {
        let trends = vec![
            trend("Latin", TrendDirection::Declining, -40.0),
            trend("Calculus", TrendDirection::Growing, 50.0),
            trend("Physics", TrendDirection::Growing, 35.0),
        ];
        let recs = RecommendationGenerator::default()
            .generate(&stats(100, 20, &[("Reingreso", 60)]), &trends);
        let order: Vec<(Priority, &str)> = recs
            .iter()
            .map(|r| (r.priority, r.kind.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::High, KIND_CONCENTRATION),
                (Priority::High, KIND_EXPAND_CAPACITY),
                (Priority::High, KIND_EXPAND_CAPACITY),
                (Priority::Medium, KIND_SELECTION_CRITERIA),
                (Priority::Low, KIND_REEVALUATE_OFFERING),
            ]
        );
        assert!(recs[1].title.contains("Calculus"));
        assert!(recs[2].title.contains("Physics"));
    }

    #[test]
    fn test_duplicates_are_merged() {
        let trends = vec![
            trend("Calculus", TrendDirection::Growing, 50.0),
            trend("Calculus", TrendDirection::Growing, 40.0),
            trend("Calculus", TrendDirection::Growing, 50.0),
        ];
        let recs = RecommendationGenerator::default().generate(&stats(10, 10, &[]), &trends);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].description.contains("+50.0%"));
        assert!(recs[0].description.contains("+40.0%"));
        assert_eq!(recs[0].description.matches("+50.0%").count(), 1);
        assert_eq!(recs[0].suggested_actions.len(), 2);
    }

    #[test]
    fn test_total_failure_is_critical_and_first() {
        let mut failed = ConsolidatedStatistics::empty(ResolutionPath::Fallback);
        failed.sources_attempted = 4;
        failed.partial_failures.extend(SubSourceId::ALL);
        let trends = vec![trend("Calculus", TrendDirection::Growing, 50.0)];
        let recs = RecommendationGenerator::default().generate(&failed, &trends);
        assert_eq!(recs[0].priority, Priority::Critical);
        assert_eq!(recs[0].kind, KIND_DATA_UNAVAILABLE);
        assert!(recs[0].description.contains("status-distribution"));
    }

    #[test]
    fn test_config_validation() {
        assert!(RecommendationConfig::default().validate().is_empty());
        let bad = RecommendationConfig {
            concentration_share: 1.5,
            decline_variation_pct: 10.0,
            ..Default::default()
        };
        assert_eq!(bad.validate().len(), 2);
    }
}
