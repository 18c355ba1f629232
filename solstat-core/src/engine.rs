//! The refresh pipeline tying every component together.
//!
//! One `refresh()` call fetches the primary endpoint, classifies it, resolves
//! statistics through the primary body or the fallback orchestrator, runs
//! trend classification and recommendation generation, and publishes a
//! snapshot. Refreshes are sequenced: a refresh that finishes after a newer
//! one has started is discarded instead of overwriting fresher data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::classifier::classify;
use crate::config::{DashboardRole, SolstatConfig};
use crate::consolidate::Consolidator;
use crate::error::SourceError;
use crate::estimator::Estimator;
use crate::fallback::{FallbackOrchestrator, SubSource};
use crate::normalizer::fold_label;
use crate::recommend::RecommendationGenerator;
use crate::trend::TrendClassifier;
use crate::types::{
    ClassificationVerdict, ConsolidatedStatistics, EntitySeries, RawStatisticsResponse,
    Recommendation, ResolutionPath, StatisticsBody, TrendClassification,
};

/// The primary "global statistics" endpoint.
#[async_trait]
pub trait PrimarySource: Send + Sync {
    /// Fetch the raw response. An `Err` means the transport itself failed.
    async fn fetch_global(&self) -> Result<RawStatisticsResponse, SourceError>;
}

/// Per-entity historical demand.
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    async fn fetch_series(&self) -> Result<Vec<EntitySeries>, SourceError>;
}

/// Everything the presentation layer needs from one refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub refresh_id: Uuid,
    pub sequence: u64,
    pub role: DashboardRole,
    pub verdict: ClassificationVerdict,
    pub statistics: ConsolidatedStatistics,
    pub trends: Vec<TrendClassification>,
    pub recommendations: Vec<Recommendation>,
}

impl DashboardSnapshot {
    /// Pretty-printed JSON for export.
    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a refresh.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The snapshot is now the latest one.
    Published(Arc<DashboardSnapshot>),
    /// A newer refresh started before this one finished; the result was dropped.
    Stale { sequence: u64, latest: u64 },
}

impl RefreshOutcome {
    pub fn snapshot(&self) -> Option<&Arc<DashboardSnapshot>> {
        match self {
            RefreshOutcome::Published(snapshot) => Some(snapshot),
            RefreshOutcome::Stale { .. } => None,
        }
    }
}

/// Which programs a dashboard is allowed to see.
#[derive(Debug, Clone)]
struct ProgramScope {
    role: DashboardRole,
    program_key: Option<String>,
}

impl ProgramScope {
    fn apply(&self, mut stats: ConsolidatedStatistics) -> ConsolidatedStatistics {
        if let Some(key) = &self.program_key {
            stats.by_program.retain(|c| &c.canonical_key == key);
        }
        stats
    }
}

/// One parameterized engine for every dashboard role.
pub struct StatisticsEngine {
    primary: Arc<dyn PrimarySource>,
    fallback_sources: Vec<Arc<dyn SubSource>>,
    series_source: Option<Arc<dyn TimeSeriesSource>>,
    consolidator: Consolidator,
    orchestrator: FallbackOrchestrator,
    trend_classifier: TrendClassifier,
    recommender: RecommendationGenerator,
    scope: ProgramScope,
    sequence: AtomicU64,
    latest: RwLock<Option<Arc<DashboardSnapshot>>>,
}

impl StatisticsEngine {
    pub fn new(config: &SolstatConfig, primary: Arc<dyn PrimarySource>) -> Self {
        let consolidator = Consolidator::new(Estimator::new(config.estimation));
        let orchestrator = FallbackOrchestrator::new(consolidator.clone()).with_source_timeout(
            config.fallback.source_timeout_secs.map(Duration::from_secs),
        );
        Self {
            primary,
            fallback_sources: Vec::new(),
            series_source: None,
            consolidator,
            orchestrator,
            trend_classifier: TrendClassifier::new(config.trends.threshold_pct),
            recommender: RecommendationGenerator::new(config.recommendations.clone()),
            scope: ProgramScope {
                role: config.endpoint.role,
                program_key: config.endpoint.program_scope.as_deref().map(fold_label),
            },
            sequence: AtomicU64::new(0),
            latest: RwLock::new(None),
        }
    }

    pub fn with_fallback_sources(mut self, sources: Vec<Arc<dyn SubSource>>) -> Self {
        self.fallback_sources = sources;
        self
    }

    pub fn with_series_source(mut self, source: Arc<dyn TimeSeriesSource>) -> Self {
        self.series_source = Some(source);
        self
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<DashboardSnapshot>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run one refresh. Never fails: upstream trouble shows up as the verdict,
    /// `partial_failures`, or an empty trend list.
    pub async fn refresh(&self) -> RefreshOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh_id = Uuid::new_v4();
        let span = info_span!("refresh", %refresh_id, sequence);

        async move {
            let (verdict, statistics) = self.resolve_statistics().await;
            let trends = self.classify_trends().await;
            let statistics = self.scope.apply(statistics);
            let recommendations = self.recommender.generate(&statistics, &trends);

            let snapshot = Arc::new(DashboardSnapshot {
                refresh_id,
                sequence,
                role: self.scope.role,
                verdict,
                statistics,
                trends,
                recommendations,
            });
            self.publish(snapshot)
        }
        .instrument(span)
        .await
    }

    async fn resolve_statistics(&self) -> (ClassificationVerdict, ConsolidatedStatistics) {
        let response = match self.primary.fetch_global().await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "primary statistics endpoint unreachable");
                None
            }
        };

        let verdict = response
            .as_ref()
            .map(classify)
            .unwrap_or(ClassificationVerdict::Unusable);
        info!(%verdict, "classified primary response");

        let resolution = match verdict {
            ClassificationVerdict::Trustworthy => Some(ResolutionPath::Primary),
            ClassificationVerdict::DegradedUsable => Some(ResolutionPath::Degraded),
            ClassificationVerdict::Unusable => None,
        };
        let body = response
            .as_ref()
            .and_then(|r| StatisticsBody::from_value(&r.body).ok());

        let statistics = match (resolution, body) {
            (Some(path), Some(body)) => self.consolidator.from_body(&body, path),
            _ => self.orchestrator.resolve(&self.fallback_sources).await,
        };
        (verdict, statistics)
    }

    async fn classify_trends(&self) -> Vec<TrendClassification> {
        let Some(source) = &self.series_source else {
            return Vec::new();
        };
        match source.fetch_series().await {
            Ok(series) => self.trend_classifier.classify_all(&series),
            Err(e) => {
                warn!(error = %e, "time-series source failed, skipping trends");
                Vec::new()
            }
        }
    }

    fn publish(&self, snapshot: Arc<DashboardSnapshot>) -> RefreshOutcome {
        let sequence = snapshot.sequence;
        let current = self.sequence.load(Ordering::SeqCst);
        if current != sequence {
            debug!(sequence, latest = current, "discarding stale refresh");
            return RefreshOutcome::Stale {
                sequence,
                latest: current,
            };
        }

        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = latest.as_ref().filter(|s| s.sequence > sequence) {
            return RefreshOutcome::Stale {
                sequence,
                latest: existing.sequence,
            };
        }
        *latest = Some(Arc::clone(&snapshot));
        RefreshOutcome::Published(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::SubSourcePayload;
    use crate::mock::{
        FailingSubSource, StaticPrimarySource, StaticSubSource, StaticTimeSeriesSource,
        UnreachablePrimarySource,
    };
    use crate::types::{SubSourceId, TimeSeriesPoint};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn primary(status: u16, body: serde_json::Value) -> Arc<dyn PrimarySource> {
        Arc::new(StaticPrimarySource::new(RawStatisticsResponse::new(status, body)))
    }

    #[tokio::test]
    async fn test_trustworthy_primary_path() {
        let engine = StatisticsEngine::new(
            &SolstatConfig::default(),
            primary(200, json!({ "totalSolicitudes": 10, "porTipoProceso": { "Reingreso": 10 } })),
        );
        let outcome = engine.refresh().await;
        let snapshot = outcome.snapshot().unwrap();
        assert_eq!(snapshot.verdict, ClassificationVerdict::Trustworthy);
        assert_eq!(snapshot.statistics.resolution, ResolutionPath::Primary);
        assert_eq!(snapshot.sequence, 1);
        assert!(engine.latest().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_primary_uses_fallback() {
        let engine = StatisticsEngine::new(&SolstatConfig::default(), Arc::new(UnreachablePrimarySource))
            .with_fallback_sources(vec![
                Arc::new(StaticSubSource::new(SubSourcePayload::TotalStudents { total: 8 })),
                Arc::new(FailingSubSource::new(SubSourceId::ProcessDetail)),
            ]);
        let snapshot = engine.refresh().await.snapshot().cloned().unwrap();
        assert_eq!(snapshot.verdict, ClassificationVerdict::Unusable);
        assert_eq!(snapshot.statistics.resolution, ResolutionPath::Fallback);
        assert_eq!(snapshot.statistics.global_totals.total, 8);
        assert!(snapshot.statistics.partial_failures.contains(&SubSourceId::ProcessDetail));
    }

    #[tokio::test]
    async fn test_program_scope_filters_programs() {
        let mut config = SolstatConfig::default();
        config.endpoint.role = DashboardRole::Coordinator;
        config.endpoint.program_scope = Some("Ingeniería de Sistemas".to_string());
        let engine = StatisticsEngine::new(
            &config,
            primary(
                200,
                json!({
                    "totalSolicitudes": 10,
                    "porPrograma": { "INGENIERIA DE SISTEMAS": 6, "Derecho": 4 }
                }),
            ),
        );
        let snapshot = engine.refresh().await.snapshot().cloned().unwrap();
        assert_eq!(snapshot.role, DashboardRole::Coordinator);
        assert_eq!(snapshot.statistics.by_program.len(), 1);
        assert_eq!(snapshot.statistics.by_program[0].total, 6);
    }

    #[tokio::test]
    async fn test_trends_feed_recommendations() {
        let series = vec![EntitySeries {
            entity: "Calculus I".to_string(),
            points: vec![TimeSeriesPoint::new("Jan", 4), TimeSeriesPoint::new("Feb", 6)],
        }];
        let engine = StatisticsEngine::new(
            &SolstatConfig::default(),
            primary(200, json!({ "totalSolicitudes": 0 })),
        )
        .with_series_source(Arc::new(StaticTimeSeriesSource::new(series)));
        let snapshot = engine.refresh().await.snapshot().cloned().unwrap();
        assert_eq!(snapshot.trends.len(), 1);
        assert_eq!(snapshot.recommendations.len(), 1);
        assert!(snapshot.recommendations[0].title.contains("Calculus I"));
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded() {
        let source = Arc::new(StaticPrimarySource::new(RawStatisticsResponse::new(
            200,
            json!({ "totalSolicitudes": 2 }),
        )));
        source.queue_response(
            RawStatisticsResponse::new(200, json!({ "totalSolicitudes": 1 })),
            Duration::from_millis(200),
        );
        let engine = StatisticsEngine::new(&SolstatConfig::default(), source)
            .with_fallback_sources(vec![Arc::new(StaticSubSource::new(
                SubSourcePayload::StatusDistribution(BTreeMap::new()),
            ))]);

        let (slow, fast) = tokio::join!(engine.refresh(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.refresh().await
        });

        assert!(matches!(slow, RefreshOutcome::Stale { sequence: 1, latest: 2 }));
        let fast = fast.snapshot().cloned().unwrap();
        assert_eq!(fast.statistics.global_totals.total, 2);
        assert_eq!(engine.latest().unwrap().sequence, 2);
    }
}
