//! # Solstat Core
//!
//! Core library for the Solstat statistics engine.
//! Classifies the primary statistics response, normalizes category labels,
//! estimates missing status breakdowns, reconstructs statistics from
//! per-metric sources when the primary endpoint is unusable, and derives
//! demand trends and prioritized recommendations.

pub mod classifier;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod fallback;
pub mod http;
pub mod mock;
pub mod normalizer;
pub mod recommend;
pub mod trend;
pub mod types;

// Re-export commonly used types at the crate root.
pub use classifier::classify;
pub use config::{DashboardRole, SolstatConfig, load_config};
pub use consolidate::Consolidator;
pub use engine::{
    DashboardSnapshot, PrimarySource, RefreshOutcome, StatisticsEngine, TimeSeriesSource,
};
pub use error::{AnalysisError, ConfigError, Result, SolstatError, SourceError};
pub use estimator::{Breakdown, EstimationRatios, Estimator};
pub use fallback::{FallbackOrchestrator, ProcessDetailEntry, SubSource, SubSourcePayload};
pub use http::HttpBackend;
pub use normalizer::{CategoryNormalizer, fold_label, merge_counts};
pub use recommend::{RecommendationConfig, RecommendationGenerator};
pub use trend::TrendClassifier;
pub use types::{
    CanonicalCategoryCount, ClassificationVerdict, ConsolidatedStatistics, CountProvenance,
    EntitySeries, Priority, RawStatisticsResponse, Recommendation, ResolutionPath, SubSourceId,
    TimeSeriesPoint, TrendClassification, TrendDirection,
};
