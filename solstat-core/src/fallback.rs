//! Fallback resolution over independent per-metric endpoints.
//!
//! When the primary endpoint is unusable, every per-metric source is queried
//! concurrently. Sources succeed or fail on their own; failures are recorded
//! in `partial_failures` and never propagate past this module.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::consolidate::Consolidator;
use crate::error::SourceError;
use crate::normalizer::{StatusTotals, merge_counts};
use crate::types::{
    CanonicalCategoryCount, ConsolidatedStatistics, ResolutionPath, SubSourceId, add_saturating,
};

/// One row of the per-process detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDetailEntry {
    #[serde(alias = "proceso", alias = "tipoProceso")]
    pub label: String,
    pub total: u64,
    #[serde(default, alias = "aprobadas")]
    pub approved: Option<u64>,
    #[serde(default, alias = "rechazadas")]
    pub rejected: Option<u64>,
    #[serde(default, alias = "enProceso")]
    pub in_progress: Option<u64>,
}

impl ProcessDetailEntry {
    pub fn totals_only(label: impl Into<String>, total: u64) -> Self {
        Self {
            label: label.into(),
            total,
            approved: None,
            rejected: None,
            in_progress: None,
        }
    }
}

/// What a per-metric endpoint returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubSourcePayload {
    TotalStudents { total: u64 },
    StudentsByProgram(BTreeMap<String, u64>),
    ProcessDetail(Vec<ProcessDetailEntry>),
    StatusDistribution(BTreeMap<String, u64>),
}

impl SubSourcePayload {
    /// The source this payload shape belongs to.
    pub fn source_id(&self) -> SubSourceId {
        match self {
            SubSourcePayload::TotalStudents { .. } => SubSourceId::TotalStudents,
            SubSourcePayload::StudentsByProgram(_) => SubSourceId::StudentsByProgram,
            SubSourcePayload::ProcessDetail(_) => SubSourceId::ProcessDetail,
            SubSourcePayload::StatusDistribution(_) => SubSourceId::StatusDistribution,
        }
    }
}

/// An independently callable per-metric endpoint.
#[async_trait]
pub trait SubSource: Send + Sync {
    /// Which metric this source provides.
    fn id(&self) -> SubSourceId;

    /// Fetch the metric. Timeouts and transport failures are plain errors.
    async fn fetch(&self) -> Result<SubSourcePayload, SourceError>;
}

/// Runs every sub-source, waits for all of them, and merges what arrived.
#[derive(Debug, Clone, Default)]
pub struct FallbackOrchestrator {
    consolidator: Consolidator,
    source_timeout: Option<Duration>,
}

impl FallbackOrchestrator {
    pub fn new(consolidator: Consolidator) -> Self {
        Self {
            consolidator,
            source_timeout: None,
        }
    }

    /// Bound each fetch; an elapsed timeout counts as a failure.
    pub fn with_source_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Resolve statistics from the given sub-sources.
    ///
    /// Always returns a result. If every source fails the result is all-zero
    /// with every source listed in `partial_failures`.
    pub async fn resolve(&self, sources: &[Arc<dyn SubSource>]) -> ConsolidatedStatistics {
        info!(sources = sources.len(), "resolving statistics via fallback endpoints");

        let fetches = sources.iter().map(|source| {
            let source = Arc::clone(source);
            let timeout = self.source_timeout;
            async move {
                let id = source.id();
                (id, fetch_one(source.as_ref(), timeout).await)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut partial_failures = BTreeSet::new();
        let mut payloads = Vec::new();
        for (id, result) in results {
            match result {
                Ok(payload) if payload.source_id() == id => payloads.push(payload),
                Ok(payload) => {
                    let err = SourceError::WrongPayload {
                        source_id: id,
                        got: payload.source_id(),
                    };
                    warn!(source = %id, error = %err, "discarding fallback payload");
                    partial_failures.insert(id);
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "fallback source failed");
                    partial_failures.insert(id);
                }
            }
        }

        let mut stats = self.merge(payloads);
        stats.partial_failures = partial_failures;
        stats.sources_attempted = sources.len();

        if stats.is_total_failure() {
            warn!("every fallback source failed, no statistics available");
        } else {
            info!(
                failed = stats.partial_failures.len(),
                total = stats.global_totals.total,
                "fallback resolution complete"
            );
        }
        stats
    }

    /// Merge successful payloads into one consolidated result.
    fn merge(&self, payloads: Vec<SubSourcePayload>) -> ConsolidatedStatistics {
        let normalizer = self.consolidator.normalizer();
        let mut student_total: Option<u64> = None;
        let mut status: Option<StatusTotals> = None;
        let mut process_sources = Vec::new();
        let mut program_sources = Vec::new();

        for payload in payloads {
            match payload {
                SubSourcePayload::TotalStudents { total } => {
                    if add_saturating(student_total.get_or_insert(0), total) {
                        warn!(total, "student total overflowed, clamping");
                    }
                }
                SubSourcePayload::StatusDistribution(map) => {
                    let totals = normalizer.status_totals(map.iter().map(|(k, v)| (k, *v)));
                    status
                        .get_or_insert_with(StatusTotals::default)
                        .accumulate(&totals);
                }
                SubSourcePayload::ProcessDetail(entries) => {
                    process_sources.push(self.process_counts(&entries));
                }
                SubSourcePayload::StudentsByProgram(map) => {
                    program_sources.push(self.consolidator.estimate_totals(
                        normalizer.normalize_programs(map.iter().map(|(k, v)| (k, *v))),
                    ));
                }
            }
        }

        let by_process = merge_counts(process_sources);
        let by_program = merge_counts(program_sources);

        // Total precedence: explicit total, status sum, per-process sum.
        let process_sum = self.consolidator.global_from_categories(&by_process);
        let global_totals = match (student_total, status, process_sum) {
            (Some(total), Some(s), _) => self.consolidator.global_totals(
                total,
                Some(s.approved),
                Some(s.rejected),
                Some(s.in_progress),
            ),
            (Some(total), None, _) => self.consolidator.global_totals(total, None, None, None),
            (None, Some(s), _) => self.consolidator.global_totals(
                s.total(),
                Some(s.approved),
                Some(s.rejected),
                Some(s.in_progress),
            ),
            (None, None, Some(global)) => global,
            (None, None, None) => self.consolidator.global_totals(0, None, None, None),
        };

        ConsolidatedStatistics {
            global_totals,
            by_process,
            by_program,
            partial_failures: BTreeSet::new(),
            sources_attempted: 0,
            resolution: ResolutionPath::Fallback,
            as_of: Utc::now(),
        }
    }

    /// Canonicalize and estimate per-process rows, keeping explicit parts.
    fn process_counts(&self, entries: &[ProcessDetailEntry]) -> Vec<CanonicalCategoryCount> {
        let normalizer = self.consolidator.normalizer();
        let estimator = self.consolidator.estimator();
        let rows = entries.iter().filter_map(|entry| {
            let mut rows = normalizer.normalize([(entry.label.as_str(), entry.total)]);
            let mut row = rows.pop()?;
            estimator.fill(&mut row, entry.approved, entry.rejected, entry.in_progress);
            Some(vec![row])
        });
        merge_counts(rows)
    }
}

async fn fetch_one(
    source: &dyn SubSource,
    timeout: Option<Duration>,
) -> Result<SubSourcePayload, SourceError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                source_id: source.id(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        },
        None => source.fetch().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailingSubSource, StaticSubSource};
    use crate::types::CountProvenance;

    fn programs() -> Arc<dyn SubSource> {
        Arc::new(StaticSubSource::new(SubSourcePayload::StudentsByProgram(
            BTreeMap::from([("Derecho".to_string(), 10), ("DERECHO".to_string(), 5)]),
        )))
    }

    fn process_detail() -> Arc<dyn SubSource> {
        Arc::new(StaticSubSource::new(SubSourcePayload::ProcessDetail(vec![
            ProcessDetailEntry {
                label: "Reingreso".into(),
                total: 10,
                approved: Some(6),
                rejected: Some(2),
                in_progress: Some(2),
            },
            ProcessDetailEntry::totals_only("Homologación", 10),
            ProcessDetailEntry::totals_only("Cafetería", 99),
        ])))
    }

    #[tokio::test]
    async fn test_all_sources_fail() {
        let sources: Vec<Arc<dyn SubSource>> = SubSourceId::ALL
            .iter()
            .map(|id| Arc::new(FailingSubSource::new(*id)) as Arc<dyn SubSource>)
            .collect();
        let stats = FallbackOrchestrator::default().resolve(&sources).await;
        assert!(stats.is_total_failure());
        assert_eq!(stats.partial_failures.len(), 4);
        assert_eq!(stats.global_totals.total, 0);
        assert!(stats.is_consistent());
        assert_eq!(stats.resolution, ResolutionPath::Fallback);
    }

    #[tokio::test]
    async fn test_process_detail_only_drives_global_totals() {
        let stats = FallbackOrchestrator::default()
            .resolve(&[process_detail()])
            .await;
        assert!(stats.partial_failures.is_empty());
        assert_eq!(stats.by_process.len(), 2);
        let re_entry = &stats.by_process[1];
        assert_eq!(re_entry.canonical_key, "re_entry");
        assert_eq!((re_entry.approved, re_entry.rejected), (6, 2));
        assert_eq!(re_entry.provenance, CountProvenance::Exact);
        assert_eq!(stats.by_process[0].provenance, CountProvenance::Estimated);
        assert_eq!(stats.global_totals.total, 20);
        assert_eq!(stats.global_totals.approved, 6 + 7);
        assert_eq!(stats.global_totals.provenance, CountProvenance::Estimated);
        assert!(stats.is_consistent());
    }

    #[tokio::test]
    async fn test_programs_merge_across_labels() {
        let stats = FallbackOrchestrator::default().resolve(&[programs()]).await;
        assert_eq!(stats.by_program.len(), 1);
        assert_eq!(stats.by_program[0].total, 15);
        assert_eq!(stats.global_totals.total, 0);
    }

    #[tokio::test]
    async fn test_total_and_status_combine() {
        let sources: Vec<Arc<dyn SubSource>> = vec![
            Arc::new(StaticSubSource::new(SubSourcePayload::TotalStudents {
                total: 10,
            })),
            Arc::new(StaticSubSource::new(SubSourcePayload::StatusDistribution(
                BTreeMap::from([
                    ("APROBADA".to_string(), 5),
                    ("RECHAZADA".to_string(), 3),
                    ("EN_PROCESO".to_string(), 2),
                ]),
            ))),
        ];
        let stats = FallbackOrchestrator::default().resolve(&sources).await;
        let g = &stats.global_totals;
        assert_eq!((g.total, g.approved, g.rejected, g.in_progress), (10, 5, 3, 2));
        assert_eq!(g.provenance, CountProvenance::Exact);
    }

    #[tokio::test]
    async fn test_wrong_payload_counts_as_failure() {
        let mismatched: Arc<dyn SubSource> = Arc::new(StaticSubSource::with_id(
            SubSourceId::TotalStudents,
            SubSourcePayload::StatusDistribution(BTreeMap::new()),
        ));
        let stats = FallbackOrchestrator::default()
            .resolve(&[mismatched, programs()])
            .await;
        assert_eq!(
            stats.partial_failures,
            BTreeSet::from([SubSourceId::TotalStudents])
        );
        assert!(stats.is_partial());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let slow: Arc<dyn SubSource> = Arc::new(
            StaticSubSource::new(SubSourcePayload::TotalStudents { total: 3 })
                .with_delay(Duration::from_millis(500)),
        );
        let stats = FallbackOrchestrator::default()
            .with_source_timeout(Some(Duration::from_millis(20)))
            .resolve(&[slow, programs()])
            .await;
        assert!(stats.partial_failures.contains(&SubSourceId::TotalStudents));
        assert_eq!(stats.by_program[0].total, 15);
    }

    #[tokio::test]
    async fn test_sub_second_timeout_is_reported_in_millis() {
        let slow = StaticSubSource::new(SubSourcePayload::TotalStudents { total: 3 })
            .with_delay(Duration::from_millis(500));
        let err = fetch_one(&slow, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Source 'total-students' timed out after 20ms"
        );
    }

    #[tokio::test]
    async fn test_huge_counts_clamp_across_sources() {
        let sources: Vec<Arc<dyn SubSource>> = vec![
            Arc::new(StaticSubSource::new(SubSourcePayload::ProcessDetail(vec![
                ProcessDetailEntry::totals_only("Reingreso", u64::MAX),
                ProcessDetailEntry::totals_only("Verano", u64::MAX),
            ]))),
            Arc::new(StaticSubSource::new(SubSourcePayload::StatusDistribution(
                BTreeMap::from([
                    ("APROBADA".to_string(), u64::MAX),
                    ("RECHAZADA".to_string(), u64::MAX),
                ]),
            ))),
        ];
        let stats = FallbackOrchestrator::default().resolve(&sources).await;
        assert_eq!(stats.global_totals.total, u64::MAX);
        assert!(stats.is_consistent());
    }

    #[tokio::test]
    async fn test_no_sources_is_empty_not_failure() {
        let stats = FallbackOrchestrator::default().resolve(&[]).await;
        assert!(!stats.is_total_failure());
        assert_eq!(stats.global_totals.total, 0);
    }
}
